//! Statistics snapshots exposed to monitoring callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Point-in-time view of one connection group.
///
/// Scanning fields (`active_physical_connections`, `total_physical_connections`,
/// `total_transactions`) are true at some instant during the snapshot, not
/// necessarily the same instant as the counter fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    /// Group name.
    pub name: String,
    /// Hosts currently configured, sorted.
    pub hosts: Vec<String>,
    /// Hosts removed at some point, sorted.
    pub closed_hosts: Vec<String>,
    pub active_host_count: usize,
    /// Logical connections ever registered.
    pub total_logical_connections: u64,
    /// Logical connections registered and not yet closed.
    pub active_logical_connections: u64,
    pub active_physical_connections: u64,
    /// Physical connections ever opened, including those of closed proxies.
    pub total_physical_connections: u64,
    /// Transactions ever run, including those of closed proxies.
    pub total_transactions: u64,
}

/// How many groups are configured with each host.
///
/// Renders as `host(n),host(m)` in host order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUsage(BTreeMap<String, usize>);

impl HostUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more group using `host`.
    pub fn record(&mut self, host: &str) {
        *self.0.entry(host.to_string()).or_insert(0) += 1;
    }

    /// Number of groups using `host`.
    pub fn groups_using(&self, host: &str) -> usize {
        self.0.get(host).copied().unwrap_or(0)
    }

    /// Number of distinct hosts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(host, count)| (host.as_str(), *count))
    }
}

impl fmt::Display for HostUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (host, count)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{host}({count})")?;
        }
        Ok(())
    }
}
