//! Errors a proxy may report while applying a topology command.

use thiserror::Error;

/// Failure reported by a connection proxy when a group pushes a host change
/// into it. The group logs these and moves on; they never undo the group's
/// own topology change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    #[error("proxy is closed")]
    Closed,

    #[error("host {0} is not in the proxy's live pool")]
    UnknownHost(String),

    #[error("{0}")]
    Other(String),
}
