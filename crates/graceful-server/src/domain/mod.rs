//! Domain layer for graceful-server.
//!
//! Pure configuration types with no dependency on sockets, TLS, or the
//! async runtime.  The lifecycle vocabulary itself lives in `graceful-core`
//! and is re-exported here so callers can stay within one crate.

pub mod config;

pub use config::ServerConfig;
pub use graceful_core::{ConnectionId, LifecycleState};
