//! Connection groups — the membership and statistics registry shared by
//! load-balanced connection proxies.
//!
//! A [`ConnectionGroup`] answers three questions at any instant:
//! - which hosts currently back the group,
//! - which proxies are currently attached to it,
//! - how many logical connections, physical connections and transactions
//!   the group has seen over its lifetime, including proxies that have
//!   already closed.
//!
//! Topology changes (adding or removing a host) are pushed into every
//! attached proxy on request. A [`GroupManager`] keeps groups by name and
//! fans commands and aggregate queries out across them.

pub mod config;
pub mod error;
pub mod group;
pub mod manager;
pub mod topology;

pub use config::{GroupConfig, RegistryConfig};
pub use error::GroupError;
pub use group::ConnectionGroup;
pub use manager::GroupManager;
pub use topology::{Propagation, RemovalMode};
