//! The connection group registry.
//!
//! Two locks guard a group:
//! - the group lock covers topology (host sets, host count), id allocation
//!   and every counter;
//! - the structural lock covers only the shape of the id → proxy map, so
//!   readers can copy it and release before calling into any proxy.
//!
//! Lock order is always group lock, then structural lock. No lock is held
//! while a proxy method runs.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use loadbal_types::{ConnectionProxy, GroupStats, ProxyError, ProxyId};
use tracing::{debug, info, warn};

use crate::error::GroupError;
use crate::topology::{Propagation, RemovalMode};

type ProxyMap = HashMap<ProxyId, Arc<dyn ConnectionProxy>>;
type ProxySnapshot = Vec<(ProxyId, Arc<dyn ConnectionProxy>)>;

/// State serialised behind the group lock.
struct GroupState {
    initialized: bool,
    hosts: BTreeSet<String>,
    closed_hosts: BTreeSet<String>,
    /// Always equal to `hosts.len()`; kept so the count is a plain read.
    active_hosts: usize,
    /// Registrations ever made. Doubles as the last id handed out.
    connections: u64,
    active_connections: u64,
    closed_proxy_physical_connections: u64,
    closed_proxy_transactions: u64,
}

impl GroupState {
    fn new() -> Self {
        Self {
            initialized: false,
            hosts: BTreeSet::new(),
            closed_hosts: BTreeSet::new(),
            active_hosts: 0,
            connections: 0,
            active_connections: 0,
            closed_proxy_physical_connections: 0,
            closed_proxy_transactions: 0,
        }
    }

    fn seed<S: AsRef<str>>(&mut self, hosts: &[S]) {
        self.hosts.extend(hosts.iter().map(|h| h.as_ref().to_string()));
        self.active_hosts = self.hosts.len();
        self.initialized = true;
    }

    /// Returns `true` if the host was not configured before.
    fn insert_host(&mut self, host: &str) -> bool {
        if self.hosts.insert(host.to_string()) {
            self.active_hosts += 1;
            true
        } else {
            false
        }
    }
}

/// A named registry of load-balanced connection proxies and the hosts they
/// route across.
///
/// Shared between proxies (which register and close) and monitoring callers
/// (which query statistics and push topology changes), typically behind an
/// `Arc`.
pub struct ConnectionGroup {
    name: String,
    state: Mutex<GroupState>,
    proxies: Mutex<ProxyMap>,
}

impl ConnectionGroup {
    /// Create an empty group. Its hosts are seeded by the first proxy that
    /// registers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(GroupState::new()),
            proxies: Mutex::new(HashMap::new()),
        }
    }

    /// Create a group whose hosts are already known. Later registrations do
    /// not re-seed it.
    pub fn with_hosts<S: AsRef<str>>(
        name: impl Into<String>,
        hosts: &[S],
    ) -> Result<Self, GroupError> {
        if hosts.is_empty() {
            return Err(GroupError::EmptyHostList);
        }
        let group = Self::new(name);
        group.state().seed(hosts);
        Ok(group)
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Attach a proxy and return the id it must present when it closes.
    ///
    /// The first registration seeds the group's hosts from `initial_hosts`;
    /// after that the group's own topology is authoritative and
    /// `initial_hosts` is ignored. Id allocation, seeding and both logical
    /// connection counters move together in one step.
    pub fn register_connection_proxy<S: AsRef<str>>(
        &self,
        proxy: Arc<dyn ConnectionProxy>,
        initial_hosts: &[S],
    ) -> Result<ProxyId, GroupError> {
        let id = {
            let mut state = self.state();
            if !state.initialized {
                if initial_hosts.is_empty() {
                    return Err(GroupError::EmptyHostList);
                }
                state.seed(initial_hosts);
                debug!(group = %self.name, hosts = state.active_hosts, "group hosts seeded");
            }
            state.connections += 1;
            state.active_connections += 1;
            let id = ProxyId::new(state.connections);
            self.proxies().insert(id, proxy);
            id
        };

        debug!(group = %self.name, proxy = %id, "connection proxy registered");
        Ok(id)
    }

    /// Detach a proxy and fold its final physical connection and transaction
    /// counts into the group's lifetime totals.
    ///
    /// Fails with [`GroupError::ProxyNotRegistered`] if this exact proxy is
    /// not attached under its id, which covers closing twice. Nothing is
    /// counted in that case.
    pub fn close_connection_proxy(&self, proxy: &dyn ConnectionProxy) -> Result<(), GroupError> {
        let id = proxy.registration_id();
        if !id.is_assigned() {
            warn!(group = %self.name, "close of never-registered proxy rejected");
            return Err(GroupError::ProxyNotRegistered(id));
        }
        let physical = proxy.total_physical_connection_count();
        let transactions = proxy.transaction_count();

        {
            let mut state = self.state();
            let mut proxies = self.proxies();
            let attached = proxies
                .get(&id)
                .is_some_and(|entry| same_proxy(entry, proxy));
            if !attached {
                warn!(group = %self.name, proxy = %id, "close of unregistered proxy rejected");
                return Err(GroupError::ProxyNotRegistered(id));
            }
            proxies.remove(&id);
            state.active_connections -= 1;
            state.closed_proxy_physical_connections =
                state.closed_proxy_physical_connections.saturating_add(physical);
            state.closed_proxy_transactions =
                state.closed_proxy_transactions.saturating_add(transactions);
        }

        debug!(
            group = %self.name,
            proxy = %id,
            physical,
            transactions,
            "connection proxy closed"
        );
        Ok(())
    }

    // ── Topology ───────────────────────────────────────────────────────

    /// Add a host to the group. Adding a configured host changes nothing.
    ///
    /// With `for_existing` unset only connections made from now on can use
    /// the host. With it set, every attached proxy is also told to add the
    /// host to its live pool, whether or not the host was new.
    pub fn add_host(&self, host: &str, for_existing: bool) -> Propagation {
        let added = self.state().insert_host(host);
        if added {
            info!(group = %self.name, host, "host added");
        }

        if !for_existing {
            return Propagation::skipped();
        }
        self.propagate(host, "add", |proxy| proxy.add_host(host))
    }

    /// Remove a host from the group and record it as closed.
    ///
    /// Refuses to remove the last configured host, and refuses hosts that
    /// are not configured; neither refusal changes any state. `mode` decides
    /// whether attached proxies are told to drop the host, and how. A proxy
    /// failing to apply the removal does not undo it.
    pub fn remove_host(&self, host: &str, mode: RemovalMode) -> Result<Propagation, GroupError> {
        {
            let mut state = self.state();
            if state.active_hosts == 1 {
                warn!(group = %self.name, host, "refusing to remove the only configured host");
                return Err(GroupError::LastHost);
            }
            if !state.hosts.remove(host) {
                warn!(group = %self.name, host, "refusing to remove unconfigured host");
                return Err(GroupError::HostNotConfigured(host.to_string()));
            }
            state.active_hosts -= 1;
            state.closed_hosts.insert(host.to_string());
        }
        info!(group = %self.name, host, ?mode, "host removed");

        if !mode.notifies_proxies() {
            return Ok(Propagation::skipped());
        }
        let outcome = if mode == RemovalMode::Graceful {
            self.propagate(host, "remove_when_not_in_use", |proxy| {
                proxy.remove_host_when_not_in_use(host)
            })
        } else {
            self.propagate(host, "remove", |proxy| proxy.remove_host(host))
        };
        Ok(outcome)
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hosts currently configured, sorted. Starts as the seeded host list
    /// and follows every add and remove since.
    pub fn initial_hosts(&self) -> Vec<String> {
        self.state().hosts.iter().cloned().collect()
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.state().hosts.contains(host)
    }

    /// Whether the host set has been seeded.
    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn active_host_count(&self) -> usize {
        self.state().active_hosts
    }

    /// Hosts removed at some point, sorted. A host re-added after removal
    /// stays listed here.
    pub fn closed_hosts(&self) -> Vec<String> {
        self.state().closed_hosts.iter().cloned().collect()
    }

    pub fn total_logical_connection_count(&self) -> u64 {
        self.state().connections
    }

    pub fn active_logical_connection_count(&self) -> u64 {
        self.state().active_connections
    }

    /// Ids of the proxies attached right now, ascending.
    pub fn registered_proxy_ids(&self) -> Vec<ProxyId> {
        let mut ids: Vec<ProxyId> = self.proxies().keys().copied().collect();
        ids.sort();
        ids
    }

    // ── Aggregation ────────────────────────────────────────────────────

    /// Physical connections currently open across attached proxies.
    pub fn active_physical_connection_count(&self) -> u64 {
        self.snapshot()
            .iter()
            .fold(0u64, |sum, (_, proxy)| {
                sum.saturating_add(proxy.active_physical_connection_count())
            })
    }

    /// Physical connections ever opened, including by closed proxies.
    pub fn total_physical_connection_count(&self) -> u64 {
        let (carried, live) = self.snapshot_with(|state| state.closed_proxy_physical_connections);
        live.iter().fold(carried, |sum, (_, proxy)| {
            sum.saturating_add(proxy.total_physical_connection_count())
        })
    }

    /// Transactions ever run, including by closed proxies.
    pub fn total_transaction_count(&self) -> u64 {
        let (carried, live) = self.snapshot_with(|state| state.closed_proxy_transactions);
        live.iter().fold(carried, |sum, (_, proxy)| {
            sum.saturating_add(proxy.transaction_count())
        })
    }

    /// Every accessor at once, from a single copy of the registry.
    pub fn stats(&self) -> GroupStats {
        let (mut stats, live) = self.snapshot_with(|state| GroupStats {
            name: self.name.clone(),
            hosts: state.hosts.iter().cloned().collect(),
            closed_hosts: state.closed_hosts.iter().cloned().collect(),
            active_host_count: state.active_hosts,
            total_logical_connections: state.connections,
            active_logical_connections: state.active_connections,
            active_physical_connections: 0,
            total_physical_connections: state.closed_proxy_physical_connections,
            total_transactions: state.closed_proxy_transactions,
        });

        for (_, proxy) in &live {
            stats.active_physical_connections = stats
                .active_physical_connections
                .saturating_add(proxy.active_physical_connection_count());
            stats.total_physical_connections = stats
                .total_physical_connections
                .saturating_add(proxy.total_physical_connection_count());
            stats.total_transactions = stats
                .total_transactions
                .saturating_add(proxy.transaction_count());
        }
        stats
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn proxies(&self) -> MutexGuard<'_, ProxyMap> {
        self.proxies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the registry under the structural lock only.
    fn snapshot(&self) -> ProxySnapshot {
        copy_sorted(&self.proxies())
    }

    /// Copy the registry and read group state in one critical section, so a
    /// proxy closing concurrently is seen either attached or folded into the
    /// carry-forward totals, never both.
    fn snapshot_with<T>(&self, read: impl FnOnce(&GroupState) -> T) -> (T, ProxySnapshot) {
        let state = self.state();
        let live = copy_sorted(&self.proxies());
        (read(&state), live)
    }

    fn propagate<F>(&self, host: &str, command: &'static str, apply: F) -> Propagation
    where
        F: Fn(&dyn ConnectionProxy) -> Result<(), ProxyError>,
    {
        let mut outcome = Propagation::default();
        for (id, proxy) in self.snapshot() {
            outcome.notified += 1;
            if let Err(e) = apply(proxy.as_ref()) {
                warn!(
                    group = %self.name,
                    proxy = %id,
                    host,
                    command,
                    error = %e,
                    "proxy did not apply host change"
                );
                outcome.failures.push((id, e));
            }
        }
        debug!(
            group = %self.name,
            host,
            command,
            notified = outcome.notified,
            failed = outcome.failures.len(),
            "host change propagated"
        );
        outcome
    }
}

impl fmt::Debug for ConnectionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGroup")
            .field("name", &self.name)
            .field("active_hosts", &self.active_host_count())
            .field("active_connections", &self.active_logical_connection_count())
            .finish()
    }
}

fn copy_sorted(proxies: &ProxyMap) -> ProxySnapshot {
    let mut live: ProxySnapshot = proxies
        .iter()
        .map(|(id, proxy)| (*id, Arc::clone(proxy)))
        .collect();
    live.sort_by_key(|(id, _)| *id);
    live
}

fn same_proxy(attached: &Arc<dyn ConnectionProxy>, proxy: &dyn ConnectionProxy) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(attached), proxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadbal_nullables::{HostCommand, NullProxy};

    fn attach(group: &ConnectionGroup, hosts: &[&str]) -> Arc<NullProxy> {
        let proxy = Arc::new(NullProxy::with_hosts(hosts));
        let id = group
            .register_connection_proxy(proxy.clone(), hosts)
            .expect("registration should succeed");
        proxy.assign_id(id);
        proxy
    }

    #[test]
    fn first_registration_seeds_hosts() {
        let group = ConnectionGroup::new("G");
        assert!(!group.is_initialized());

        let p1 = attach(&group, &["A", "B"]);
        assert_eq!(p1.registration_id(), ProxyId::new(1));
        assert!(group.is_initialized());
        assert_eq!(group.initial_hosts(), vec!["A", "B"]);
        assert_eq!(group.active_host_count(), 2);

        // Later host lists are ignored.
        let p2 = attach(&group, &["C"]);
        assert_eq!(p2.registration_id(), ProxyId::new(2));
        assert_eq!(group.initial_hosts(), vec!["A", "B"]);
        assert_eq!(group.active_host_count(), 2);
    }

    #[test]
    fn duplicate_seed_hosts_count_once() {
        let group = ConnectionGroup::new("G");
        attach(&group, &["A", "A", "B"]);
        assert_eq!(group.active_host_count(), 2);
    }

    #[test]
    fn empty_seed_is_rejected() {
        let group = ConnectionGroup::new("G");
        let proxy: Arc<NullProxy> = Arc::new(NullProxy::new());
        let empty: &[&str] = &[];
        assert_eq!(
            group.register_connection_proxy(proxy, empty),
            Err(GroupError::EmptyHostList)
        );
        assert_eq!(group.total_logical_connection_count(), 0);
        assert!(!group.is_initialized());
    }

    #[test]
    fn empty_host_list_is_fine_once_initialized() {
        let group = ConnectionGroup::with_hosts("G", &["A"]).unwrap();
        let proxy: Arc<NullProxy> = Arc::new(NullProxy::new());
        let empty: &[&str] = &[];
        assert_eq!(
            group.register_connection_proxy(proxy, empty),
            Ok(ProxyId::new(1))
        );
    }

    #[test]
    fn with_hosts_requires_a_host() {
        let empty: &[&str] = &[];
        assert_eq!(
            ConnectionGroup::with_hosts("G", empty).unwrap_err(),
            GroupError::EmptyHostList
        );
    }

    #[test]
    fn close_folds_final_stats_into_totals() {
        let group = ConnectionGroup::new("G");
        let p1 = attach(&group, &["A", "B"]);
        let p2 = attach(&group, &["A", "B"]);

        p1.set_stats(1, 5, 3);
        p2.set_stats(2, 2, 1);
        assert_eq!(group.active_physical_connection_count(), 3);
        assert_eq!(group.total_physical_connection_count(), 7);

        group.close_connection_proxy(&*p1).unwrap();
        assert_eq!(group.total_physical_connection_count(), 7);
        assert_eq!(group.total_transaction_count(), 4);
        assert_eq!(group.active_physical_connection_count(), 2);
        assert_eq!(group.active_logical_connection_count(), 1);
        assert_eq!(group.total_logical_connection_count(), 2);
        assert_eq!(group.registered_proxy_ids(), vec![ProxyId::new(2)]);

        // Stats moving after close no longer count.
        p1.set_stats(0, 50, 30);
        assert_eq!(group.total_physical_connection_count(), 7);
    }

    #[test]
    fn double_close_is_rejected_without_counting_twice() {
        let group = ConnectionGroup::new("G");
        let proxy = attach(&group, &["A"]);
        proxy.set_stats(0, 4, 4);

        group.close_connection_proxy(&*proxy).unwrap();
        assert_eq!(
            group.close_connection_proxy(&*proxy),
            Err(GroupError::ProxyNotRegistered(ProxyId::new(1)))
        );
        assert_eq!(group.active_logical_connection_count(), 0);
        assert_eq!(group.total_transaction_count(), 4);
    }

    #[test]
    fn close_with_foreign_proxy_is_rejected() {
        let group = ConnectionGroup::new("G");
        let attached = attach(&group, &["A"]);

        // Same id, different object.
        let impostor = NullProxy::new();
        impostor.assign_id(attached.registration_id());
        impostor.set_stats(0, 9, 9);

        assert!(matches!(
            group.close_connection_proxy(&impostor),
            Err(GroupError::ProxyNotRegistered(_))
        ));
        assert_eq!(group.active_logical_connection_count(), 1);
        assert_eq!(group.total_transaction_count(), 0);
    }

    #[test]
    fn unassigned_proxy_cannot_close() {
        let group = ConnectionGroup::new("G");
        attach(&group, &["A"]);
        let stranger = NullProxy::new();
        assert_eq!(
            group.close_connection_proxy(&stranger),
            Err(GroupError::ProxyNotRegistered(ProxyId::UNASSIGNED))
        );
    }

    #[test]
    fn huge_proxy_counts_saturate_instead_of_overflowing() {
        let group = ConnectionGroup::new("G");
        let p1 = attach(&group, &["A"]);
        let p2 = attach(&group, &["A"]);
        p1.set_stats(u64::MAX, u64::MAX, u64::MAX);
        p2.set_stats(1, 1, 1);

        assert_eq!(group.active_physical_connection_count(), u64::MAX);
        assert_eq!(group.total_physical_connection_count(), u64::MAX);
        assert_eq!(group.total_transaction_count(), u64::MAX);
        assert_eq!(group.stats().total_transactions, u64::MAX);

        group.close_connection_proxy(&*p1).unwrap();
        group.close_connection_proxy(&*p2).unwrap();
        assert_eq!(group.total_physical_connection_count(), u64::MAX);
        assert_eq!(group.total_transaction_count(), u64::MAX);
    }

    #[test]
    fn add_host_is_idempotent() {
        let group = ConnectionGroup::with_hosts("G", &["A"]).unwrap();
        group.add_host("B", false);
        group.add_host("B", false);
        assert_eq!(group.active_host_count(), 2);
        assert_eq!(group.initial_hosts(), vec!["A", "B"]);
    }

    #[test]
    fn add_host_without_for_existing_leaves_proxies_alone() {
        let group = ConnectionGroup::new("G");
        let proxy = attach(&group, &["A"]);

        let outcome = group.add_host("B", false);
        assert_eq!(outcome, Propagation::skipped());
        assert!(proxy.commands().is_empty());
        assert_eq!(proxy.live_hosts(), vec!["A"]);
    }

    #[test]
    fn add_host_for_existing_reaches_every_proxy() {
        let group = ConnectionGroup::new("G");
        let p1 = attach(&group, &["A"]);
        let p2 = attach(&group, &["A"]);

        let outcome = group.add_host("B", true);
        assert_eq!(outcome.notified, 2);
        assert!(outcome.is_clean());
        for proxy in [&p1, &p2] {
            assert_eq!(proxy.commands(), vec![HostCommand::Add("B".to_string())]);
            assert_eq!(proxy.live_hosts(), vec!["A", "B"]);
        }

        // Already configured: set unchanged, proxies still told.
        let again = group.add_host("B", true);
        assert_eq!(again.notified, 2);
        assert_eq!(group.active_host_count(), 2);
        assert_eq!(p1.commands().len(), 2);
    }

    #[test]
    fn cannot_remove_last_host() {
        let group = ConnectionGroup::with_hosts("G", &["A"]).unwrap();
        for host in ["A", "Z"] {
            assert_eq!(
                group.remove_host(host, RemovalMode::Immediate),
                Err(GroupError::LastHost)
            );
        }
        assert_eq!(group.initial_hosts(), vec!["A"]);
        assert!(group.closed_hosts().is_empty());
    }

    #[test]
    fn cannot_remove_unconfigured_host() {
        let group = ConnectionGroup::with_hosts("G", &["A", "B"]).unwrap();
        assert_eq!(
            group.remove_host("C", RemovalMode::KeepExisting),
            Err(GroupError::HostNotConfigured("C".to_string()))
        );
        assert_eq!(group.active_host_count(), 2);
        assert!(group.closed_hosts().is_empty());
    }

    #[test]
    fn remove_host_modes_drive_the_right_proxy_command() {
        let group = ConnectionGroup::new("G");
        let proxy = attach(&group, &["A", "B", "C", "D"]);

        let keep = group.remove_host("B", RemovalMode::KeepExisting).unwrap();
        assert_eq!(keep.notified, 0);

        let graceful = group.remove_host("C", RemovalMode::Graceful).unwrap();
        assert_eq!(graceful.notified, 1);

        let immediate = group.remove_host("D", RemovalMode::Immediate).unwrap();
        assert_eq!(immediate.notified, 1);

        assert_eq!(
            proxy.commands(),
            vec![
                HostCommand::RemoveWhenNotInUse("C".to_string()),
                HostCommand::Remove("D".to_string()),
            ]
        );
        assert_eq!(group.initial_hosts(), vec!["A"]);
        assert_eq!(group.closed_hosts(), vec!["B", "C", "D"]);
    }

    #[test]
    fn proxy_failure_does_not_roll_back_removal() {
        let group = ConnectionGroup::new("G");
        let healthy = attach(&group, &["A", "B"]);
        let broken = attach(&group, &["A", "B"]);
        broken.fail_commands(true);

        let outcome = group.remove_host("B", RemovalMode::Immediate).unwrap();
        assert_eq!(outcome.notified, 2);
        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.failures[0].0, broken.registration_id());

        assert!(!group.has_host("B"));
        assert_eq!(group.closed_hosts(), vec!["B"]);
        assert_eq!(healthy.live_hosts(), vec!["A"]);
    }

    #[test]
    fn readded_host_stays_in_closed_set() {
        let group = ConnectionGroup::with_hosts("G", &["A", "B"]).unwrap();
        group.remove_host("B", RemovalMode::KeepExisting).unwrap();
        group.add_host("B", false);
        assert!(group.has_host("B"));
        assert_eq!(group.closed_hosts(), vec!["B"]);

        group.remove_host("B", RemovalMode::KeepExisting).unwrap();
        assert_eq!(group.closed_hosts(), vec!["B"]);
        assert_eq!(group.active_host_count(), 1);
    }

    #[test]
    fn stats_snapshot_matches_accessors() {
        let group = ConnectionGroup::new("orders");
        let p1 = attach(&group, &["db1", "db2"]);
        let p2 = attach(&group, &["db1", "db2"]);
        p1.set_stats(1, 5, 3);
        p2.set_stats(2, 2, 1);
        group.close_connection_proxy(&*p1).unwrap();
        group.remove_host("db2", RemovalMode::KeepExisting).unwrap();

        let stats = group.stats();
        assert_eq!(stats.name, "orders");
        assert_eq!(stats.hosts, vec!["db1"]);
        assert_eq!(stats.closed_hosts, vec!["db2"]);
        assert_eq!(stats.active_host_count, 1);
        assert_eq!(stats.total_logical_connections, 2);
        assert_eq!(stats.active_logical_connections, 1);
        assert_eq!(stats.active_physical_connections, 2);
        assert_eq!(stats.total_physical_connections, 7);
        assert_eq!(stats.total_transactions, 4);
    }
}
