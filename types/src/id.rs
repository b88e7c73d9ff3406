//! Registration identifiers handed out by a connection group.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle a group assigns to a proxy when it registers.
///
/// Ids start at 1 and increase by one per registration within a group.
/// They are never reused, even after the proxy holding one has closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProxyId(u64);

impl ProxyId {
    /// Placeholder for a proxy that has not been registered yet.
    /// No group ever hands this value out.
    pub const UNASSIGNED: Self = Self(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
