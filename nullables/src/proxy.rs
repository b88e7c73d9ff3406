//! Nullable connection proxy — settable statistics, recorded host commands.

use loadbal_types::{ConnectionProxy, ProxyError, ProxyId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// A host command a group pushed into a proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostCommand {
    Add(String),
    Remove(String),
    RemoveWhenNotInUse(String),
}

/// A test proxy that keeps a pretend live pool and records what it is told.
///
/// Thread-safe, so it can be registered from many threads at once.
pub struct NullProxy {
    id: AtomicU64,
    live_hosts: Mutex<BTreeSet<String>>,
    /// Open connections per host.
    in_use: Mutex<BTreeMap<String, u64>>,
    /// Hosts waiting for their last connection to be released.
    draining: Mutex<BTreeSet<String>>,
    commands: Mutex<Vec<HostCommand>>,
    active_physical: AtomicU64,
    total_physical: AtomicU64,
    transactions: AtomicU64,
    fail_commands: AtomicBool,
}

impl NullProxy {
    pub fn new() -> Self {
        Self {
            id: AtomicU64::new(ProxyId::UNASSIGNED.as_u64()),
            live_hosts: Mutex::new(BTreeSet::new()),
            in_use: Mutex::new(BTreeMap::new()),
            draining: Mutex::new(BTreeSet::new()),
            commands: Mutex::new(Vec::new()),
            active_physical: AtomicU64::new(0),
            total_physical: AtomicU64::new(0),
            transactions: AtomicU64::new(0),
            fail_commands: AtomicBool::new(false),
        }
    }

    /// A proxy whose live pool starts with `hosts`.
    pub fn with_hosts(hosts: &[&str]) -> Self {
        let proxy = Self::new();
        proxy
            .live_hosts
            .lock()
            .unwrap()
            .extend(hosts.iter().map(|h| h.to_string()));
        proxy
    }

    /// Store the id the group handed out on registration.
    pub fn assign_id(&self, id: ProxyId) {
        self.id.store(id.as_u64(), Ordering::SeqCst);
    }

    /// Overwrite all three statistics.
    pub fn set_stats(&self, active_physical: u64, total_physical: u64, transactions: u64) {
        self.active_physical.store(active_physical, Ordering::SeqCst);
        self.total_physical.store(total_physical, Ordering::SeqCst);
        self.transactions.store(transactions, Ordering::SeqCst);
    }

    /// Open a physical connection to `host`.
    pub fn open_physical(&self, host: &str) {
        self.active_physical.fetch_add(1, Ordering::SeqCst);
        self.total_physical.fetch_add(1, Ordering::SeqCst);
        *self.in_use.lock().unwrap().entry(host.to_string()).or_insert(0) += 1;
    }

    /// Release one connection to `host`. Releasing the last one finishes a
    /// pending graceful removal. Does nothing if no connection is open.
    pub fn release_physical(&self, host: &str) {
        let remaining = {
            let mut in_use = self.in_use.lock().unwrap();
            let Some(open) = in_use.get_mut(host) else {
                return;
            };
            *open -= 1;
            let remaining = *open;
            if remaining == 0 {
                in_use.remove(host);
            }
            remaining
        };
        self.drop_active(1);
        if remaining == 0 && self.draining.lock().unwrap().remove(host) {
            self.live_hosts.lock().unwrap().remove(host);
        }
    }

    /// Connections open on `host` right now.
    pub fn open_on(&self, host: &str) -> u64 {
        self.in_use.lock().unwrap().get(host).copied().unwrap_or(0)
    }

    pub fn run_transactions(&self, count: u64) {
        self.transactions.fetch_add(count, Ordering::SeqCst);
    }

    /// Make every subsequent host command fail (after being recorded).
    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// All host commands received, in order.
    pub fn commands(&self) -> Vec<HostCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Hosts in the live pool, sorted.
    pub fn live_hosts(&self) -> Vec<String> {
        self.live_hosts.lock().unwrap().iter().cloned().collect()
    }

    /// Hosts waiting to be dropped once idle, sorted.
    pub fn draining_hosts(&self) -> Vec<String> {
        self.draining.lock().unwrap().iter().cloned().collect()
    }

    fn drop_active(&self, count: u64) {
        let _ = self
            .active_physical
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                Some(active.saturating_sub(count))
            });
    }

    fn record(&self, command: HostCommand) -> Result<(), ProxyError> {
        self.commands.lock().unwrap().push(command);
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(ProxyError::Other("injected failure".to_string()));
        }
        Ok(())
    }
}

impl Default for NullProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionProxy for NullProxy {
    fn registration_id(&self) -> ProxyId {
        ProxyId::new(self.id.load(Ordering::SeqCst))
    }

    fn active_physical_connection_count(&self) -> u64 {
        self.active_physical.load(Ordering::SeqCst)
    }

    fn total_physical_connection_count(&self) -> u64 {
        self.total_physical.load(Ordering::SeqCst)
    }

    fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    fn add_host(&self, host: &str) -> Result<(), ProxyError> {
        self.record(HostCommand::Add(host.to_string()))?;
        self.live_hosts.lock().unwrap().insert(host.to_string());
        Ok(())
    }

    fn remove_host(&self, host: &str) -> Result<(), ProxyError> {
        self.record(HostCommand::Remove(host.to_string()))?;
        if !self.live_hosts.lock().unwrap().remove(host) {
            return Err(ProxyError::UnknownHost(host.to_string()));
        }
        // Connections on the host are invalidated.
        let open = self.in_use.lock().unwrap().remove(host).unwrap_or(0);
        self.drop_active(open);
        self.draining.lock().unwrap().remove(host);
        Ok(())
    }

    fn remove_host_when_not_in_use(&self, host: &str) -> Result<(), ProxyError> {
        self.record(HostCommand::RemoveWhenNotInUse(host.to_string()))?;
        if !self.live_hosts.lock().unwrap().contains(host) {
            return Err(ProxyError::UnknownHost(host.to_string()));
        }
        if self.in_use.lock().unwrap().contains_key(host) {
            self.draining.lock().unwrap().insert(host.to_string());
        } else {
            self.live_hosts.lock().unwrap().remove(host);
        }
        Ok(())
    }
}
