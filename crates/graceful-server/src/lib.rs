//! graceful-server library crate.
//!
//! A lifecycle manager for plain and TLS TCP servers.  A [`GracefulServer`]
//! accepts connections until [`stop`](GracefulServer::stop) is called, then
//! refuses new connections and gives the open ones a bounded grace period
//! before force-closing them.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use graceful_server::{FixedResponse, GracefulServer};
//!
//! # async fn run() -> Result<(), graceful_server::ServerError> {
//! let server = Arc::new(GracefulServer::new(8080, FixedResponse::new("Foobar")));
//!
//! let stopper = Arc::clone(&server);
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     stopper.stop(Duration::from_secs(10));
//! });
//!
//! server.listen_and_serve().await
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! [graceful-server]
//!   ├── domain/           ServerConfig (+ lifecycle vocabulary from graceful-core)
//!   ├── application/      Handler contract, ShutdownCoordinator, FixedResponse
//!   └── infrastructure/
//!         ├── listener/   Listener trait, plain TCP binding
//!         ├── tls/        PEM loading, TlsListener
//!         ├── tracker/    Open-connection registry
//!         ├── server/     GracefulServer: accept loop and drain
//!         └── settings/   TOML settings for the binary
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `graceful-core`; it never binds
//!   a socket.
//! - `infrastructure` depends on all other layers plus `tokio` and `rustls`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: handler contract and shutdown state machine.
pub mod application;

/// Infrastructure layer: listeners, TLS, tracking, and the server itself.
pub mod infrastructure;

pub use application::{handler_fn, Connection, FixedResponse, Handler, HandlerFn, Stream};
pub use domain::{ConnectionId, LifecycleState, ServerConfig};
pub use infrastructure::{
    bind_plain, bind_tls_from_config, bind_tls_from_files, use_existing, BindError, CertError,
    ConnectionTracker, GracefulServer, Listener, ServerError, TlsListener,
};
