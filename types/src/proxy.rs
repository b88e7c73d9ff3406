//! The capability set a connection group needs from a load-balanced proxy.

use crate::error::ProxyError;
use crate::id::ProxyId;

/// A load-balanced logical connection, as seen by the group it registers in.
///
/// Implementations are owned elsewhere and shared with the group behind an
/// `Arc`. Every method may block or take the proxy's own locks, so a group
/// never calls into a proxy while holding one of its internal locks.
pub trait ConnectionProxy: Send + Sync {
    /// The id the group returned when this proxy registered.
    fn registration_id(&self) -> ProxyId;

    /// Physical connections currently open by this proxy.
    fn active_physical_connection_count(&self) -> u64;

    /// Physical connections ever opened by this proxy.
    fn total_physical_connection_count(&self) -> u64;

    /// Transactions ever run through this proxy.
    fn transaction_count(&self) -> u64;

    /// Make `host` available to this proxy's live pool.
    fn add_host(&self, host: &str) -> Result<(), ProxyError>;

    /// Drop `host` from the live pool now, invalidating connections on it.
    fn remove_host(&self, host: &str) -> Result<(), ProxyError>;

    /// Drop `host` from the live pool once no connection is using it.
    fn remove_host_when_not_in_use(&self, host: &str) -> Result<(), ProxyError>;
}
