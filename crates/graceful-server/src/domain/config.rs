//! Server configuration types.
//!
//! [`ServerConfig`] holds every setting the lifecycle manager reads.  It is
//! fixed at construction of a [`GracefulServer`](crate::GracefulServer) and
//! never mutated afterwards.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes the server easy to embed in tests.
//! The binary is responsible for populating it from CLI args or a settings
//! file.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port used by [`ServerConfig::default`].
pub const DEFAULT_PORT: u16 = 8080;

/// All runtime configuration for one graceful server instance.
///
/// # Example
///
/// ```rust
/// use graceful_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::for_port(1337);
/// assert_eq!(cfg.bind_addr.port(), 1337);
/// assert!(cfg.bind_addr.ip().is_unspecified());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the plain and TLS start operations bind.
    ///
    /// Ignored by [`serve`](crate::GracefulServer::serve), which adopts a
    /// listener the caller already bound.
    pub bind_addr: SocketAddr,

    /// Upper bound on one TLS handshake.  A client that has not completed
    /// its handshake within this time is dropped without ever reaching the
    /// handler.
    pub handshake_timeout: Duration,

    /// Maximum number of simultaneously tracked connections.
    ///
    /// When reached, the accept loop pauses until a connection closes.
    /// `None` means unlimited.
    pub max_connections: Option<usize>,
}

impl ServerConfig {
    /// Default configuration listening on `port` on all interfaces.
    pub fn for_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    /// | Field             | Default        |
    /// |-------------------|----------------|
    /// | bind_addr         | `0.0.0.0:8080` |
    /// | handshake_timeout | 10 seconds     |
    /// | max_connections   | unlimited      |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            handshake_timeout: Duration::from_secs(10),
            max_connections: None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
