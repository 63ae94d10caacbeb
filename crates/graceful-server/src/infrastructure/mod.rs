//! Infrastructure layer for graceful-server.
//!
//! Everything that touches sockets, TLS, files, or the async runtime.
//!
//! # Responsibilities
//!
//! - Binding plain TCP listeners and adopting pre-bound ones
//! - Loading PEM material and running TLS handshakes off the accept path
//! - Tracking open connections so a stop can wait for them
//! - The accept loop and the bounded drain ([`GracefulServer`])
//! - Reading the binary's TOML settings file
//!
//! # What does NOT belong here?
//!
//! - Lifecycle transition rules (the application layer's coordinator)
//! - What a connection's bytes mean (the [`Handler`](crate::Handler))

pub mod listener;
pub mod server;
pub mod settings;
pub mod tls;
pub mod tracker;

pub use listener::{bind_plain, use_existing, BindError, Listener};
pub use server::{GracefulServer, ServerError};
pub use settings::{Settings, SettingsError};
pub use tls::{bind_tls_from_config, bind_tls_from_files, load_server_config, CertError, TlsListener};
pub use tracker::{ConnectionGuard, ConnectionTracker};
