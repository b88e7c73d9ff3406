//! Group manager — look up connection groups by name and act on many at once.
//!
//! Commands and aggregate queries take a group filter: `None` or an empty
//! name selects every group, any other name selects that group only (and
//! nothing if no such group exists).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use loadbal_types::{GroupStats, HostUsage};
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::error::GroupError;
use crate::group::ConnectionGroup;
use crate::topology::{Propagation, RemovalMode};

/// Registry of connection groups keyed by name.
///
/// Not a process-wide singleton: create one and hand it to whatever needs
/// to find groups by name.
#[derive(Debug, Default)]
pub struct GroupManager {
    groups: RwLock<HashMap<String, Arc<ConnectionGroup>>>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager holding the pre-seeded groups from `config`.
    pub fn from_config(config: &RegistryConfig) -> Result<Self, GroupError> {
        config.validate()?;
        let manager = Self::new();
        for group in &config.groups {
            let seeded = ConnectionGroup::with_hosts(group.name.clone(), group.hosts.as_slice())?;
            manager.insert(seeded)?;
        }
        info!(groups = config.groups.len(), "group manager configured");
        Ok(manager)
    }

    /// The group called `name`, created empty if it does not exist yet.
    pub fn group(&self, name: &str) -> Arc<ConnectionGroup> {
        if let Some(group) = self.read().get(name) {
            return Arc::clone(group);
        }
        let mut groups = self.write();
        Arc::clone(groups.entry(name.to_string()).or_insert_with(|| {
            debug!(group = name, "connection group created");
            Arc::new(ConnectionGroup::new(name))
        }))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ConnectionGroup>> {
        self.read().get(name).cloned()
    }

    /// Add an already-built group. Fails if the name is taken.
    pub fn insert(&self, group: ConnectionGroup) -> Result<Arc<ConnectionGroup>, GroupError> {
        let mut groups = self.write();
        if groups.contains_key(group.name()) {
            return Err(GroupError::DuplicateGroup(group.name().to_string()));
        }
        let group = Arc::new(group);
        groups.insert(group.name().to_string(), Arc::clone(&group));
        debug!(group = group.name(), "connection group added");
        Ok(group)
    }

    /// Names of all groups, sorted.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all groups, sorted and comma-separated.
    pub fn registered_groups(&self) -> String {
        self.group_names().join(",")
    }

    /// Groups selected by `filter`, sorted by name.
    pub fn matching(&self, filter: Option<&str>) -> Vec<Arc<ConnectionGroup>> {
        let groups = self.read();
        let mut selected: Vec<Arc<ConnectionGroup>> = match filter {
            None | Some("") => groups.values().cloned().collect(),
            Some(name) => groups.get(name).cloned().into_iter().collect(),
        };
        selected.sort_by(|a, b| a.name().cmp(b.name()));
        selected
    }

    // ── Fan-out commands ───────────────────────────────────────────────

    /// Add `host` to every selected group.
    pub fn add_host(&self, filter: Option<&str>, host: &str, for_existing: bool) -> Propagation {
        let mut outcome = Propagation::skipped();
        for group in self.matching(filter) {
            outcome.merge(group.add_host(host, for_existing));
        }
        outcome
    }

    /// Remove `host` from every selected group, stopping at the first group
    /// that refuses. Groups handled before the refusal keep the change.
    pub fn remove_host(
        &self,
        filter: Option<&str>,
        host: &str,
        mode: RemovalMode,
    ) -> Result<Propagation, GroupError> {
        let mut outcome = Propagation::skipped();
        for group in self.matching(filter) {
            outcome.merge(group.remove_host(host, mode)?);
        }
        Ok(outcome)
    }

    // ── Aggregates ─────────────────────────────────────────────────────

    /// Distinct hosts across the selected groups.
    pub fn active_host_count(&self, filter: Option<&str>) -> usize {
        let hosts: BTreeSet<String> = self
            .matching(filter)
            .iter()
            .flat_map(|group| group.initial_hosts())
            .collect();
        hosts.len()
    }

    /// For each host, how many selected groups are configured with it.
    pub fn active_host_lists(&self, filter: Option<&str>) -> HostUsage {
        let mut usage = HostUsage::new();
        for group in self.matching(filter) {
            for host in group.initial_hosts() {
                usage.record(&host);
            }
        }
        usage
    }

    pub fn total_logical_connection_count(&self, filter: Option<&str>) -> u64 {
        self.sum(filter, ConnectionGroup::total_logical_connection_count)
    }

    pub fn active_logical_connection_count(&self, filter: Option<&str>) -> u64 {
        self.sum(filter, ConnectionGroup::active_logical_connection_count)
    }

    pub fn active_physical_connection_count(&self, filter: Option<&str>) -> u64 {
        self.sum(filter, ConnectionGroup::active_physical_connection_count)
    }

    pub fn total_physical_connection_count(&self, filter: Option<&str>) -> u64 {
        self.sum(filter, ConnectionGroup::total_physical_connection_count)
    }

    pub fn total_transaction_count(&self, filter: Option<&str>) -> u64 {
        self.sum(filter, ConnectionGroup::total_transaction_count)
    }

    /// One snapshot per selected group, sorted by name.
    pub fn stats(&self, filter: Option<&str>) -> Vec<GroupStats> {
        self.matching(filter).iter().map(|group| group.stats()).collect()
    }

    fn sum(&self, filter: Option<&str>, count: impl Fn(&ConnectionGroup) -> u64) -> u64 {
        self.matching(filter)
            .iter()
            .fold(0u64, |sum, group| sum.saturating_add(count(&**group)))
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ConnectionGroup>>> {
        self.groups.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ConnectionGroup>>> {
        self.groups.write().unwrap_or_else(PoisonError::into_inner)
    }
}
