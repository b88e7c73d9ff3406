//! Fundamental types for the loadbal workspace.
//!
//! This crate defines what every other crate in the workspace agrees on:
//! registration ids, the capability set a load-balanced connection proxy
//! exposes to its group, and the serialisable statistics snapshots handed
//! to monitoring callers.

pub mod error;
pub mod id;
pub mod proxy;
pub mod stats;

pub use error::ProxyError;
pub use id::ProxyId;
pub use proxy::ConnectionProxy;
pub use stats::{GroupStats, HostUsage};
