use loadbal_types::ProxyId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("Cannot remove host, only one configured host active.")]
    LastHost,

    #[error("Host is not configured: {0}")]
    HostNotConfigured(String),

    #[error("proxy {0} is not registered with this group")]
    ProxyNotRegistered(ProxyId),

    #[error("a group needs at least one host to start with")]
    EmptyHostList,

    #[error("group {0} already exists")]
    DuplicateGroup(String),

    #[error("config error: {0}")]
    Config(String),
}
