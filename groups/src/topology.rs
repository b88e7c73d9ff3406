//! Topology command options and the outcome of pushing them into proxies.

use loadbal_types::{ProxyError, ProxyId};

/// What happens to proxies already connected to a host being removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RemovalMode {
    /// Only future routing stops using the host. Attached proxies keep their
    /// connections until they drain the host themselves.
    #[default]
    KeepExisting,
    /// Every attached proxy drops the host once no connection is using it.
    Graceful,
    /// Every attached proxy drops the host now, invalidating its connections.
    Immediate,
}

impl RemovalMode {
    /// Map the `killExistingConnections` / `waitForGracefulFailover` flag
    /// pair onto a mode. `wait_for_graceful` only matters when killing.
    pub fn from_flags(kill_existing: bool, wait_for_graceful: bool) -> Self {
        match (kill_existing, wait_for_graceful) {
            (false, _) => Self::KeepExisting,
            (true, true) => Self::Graceful,
            (true, false) => Self::Immediate,
        }
    }

    /// Whether attached proxies are told about the removal.
    pub fn notifies_proxies(&self) -> bool {
        !matches!(self, Self::KeepExisting)
    }
}

/// Result of pushing a host change into the proxies attached to a group.
///
/// Failures belong to the proxies that reported them; the group's own
/// topology change stands regardless.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Propagation {
    /// Proxies the command was delivered to, successfully or not.
    pub notified: usize,
    pub failures: Vec<(ProxyId, ProxyError)>,
}

impl Propagation {
    /// Nothing was pushed (the command did not target existing proxies).
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn succeeded(&self) -> usize {
        self.notified - self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another group's propagation into this one.
    pub fn merge(&mut self, other: Propagation) {
        self.notified += other.notified;
        self.failures.extend(other.failures);
    }
}
