//! Nullable infrastructure for deterministic testing.
//!
//! Inspired by the "A-frame architecture" pattern: the collaborators a
//! connection group talks to are abstracted behind traits, and this crate
//! provides test-friendly implementations that:
//! - Report statistics you set programmatically
//! - Record every command they receive
//! - Never open a socket
//!
//! Usage: register nullables with a group in place of real proxies.

pub mod proxy;

pub use proxy::{HostCommand, NullProxy};
