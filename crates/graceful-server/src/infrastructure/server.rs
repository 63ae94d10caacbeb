//! GracefulServer: start operations, the accept loop, and the bounded drain.
//!
//! This module composes the other three pieces:
//!
//! ```text
//!  listen_and_serve*  ──▶ bind_plain / bind_tls_*  ──┐
//!  serve(listener)   ───────────────────────────────┤
//!                                                   ▼
//!                         ShutdownCoordinator::begin_serving
//!                                                   │
//!                         accept loop ◀─────────────┘
//!                           ├─ accept  → ConnectionTracker::track → spawn handler
//!                           └─ stop    → drop listener
//!                                                   │
//!                         drain (≤ timeout) → abort leftovers → Stopped
//! ```
//!
//! Every start operation is an `async fn` that resolves only once the
//! instance is Stopped or Failed.  [`GracefulServer::stop`] is synchronous
//! and non-blocking: it flips the state and publishes the timeout; the serve
//! call does the draining and is the only thing that observes its completion.
//!
//! # Distinguishing real failures
//!
//! `Ok(())` means the serve call ended because of `stop`; a listener that
//! errors after a stop was requested is part of that stop.  A bind,
//! certificate or fatal accept error leaves the instance
//! [`Failed`](LifecycleState::Failed), which does not report as stopped, so
//! checking [`is_stopped`](GracefulServer::is_stopped) next to the error
//! never hides a real failure:
//!
//! ```rust,no_run
//! # use graceful_server::{FixedResponse, GracefulServer};
//! # async fn run() {
//! let server = GracefulServer::new(1337, FixedResponse::new("Foo bar"));
//! if let Err(e) = server.listen_and_serve().await {
//!     if !server.is_stopped() {
//!         panic!("server failed: {e}");
//!     }
//! }
//! # }
//! ```
//!
//! The one `Err` that can coexist with `is_stopped() == true` is
//! [`ServerError::InvalidState`] for a start on an instance that was stopped
//! before it ever served.

use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use graceful_core::LifecycleState;

use crate::application::coordinator::ShutdownCoordinator;
use crate::application::handler::{Connection, Handler};
use crate::domain::config::ServerConfig;
use crate::infrastructure::listener::{bind_plain, BindError, Listener};
use crate::infrastructure::tls::{bind_tls_from_config, bind_tls_from_files, CertError};
use crate::infrastructure::tracker::ConnectionTracker;

/// First delay after a transient accept error; doubles up to the maximum.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Why a start operation returned an error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Cert(#[from] CertError),

    /// The listener failed for a reason other than a requested stop.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The instance already served (or was stopped before starting).
    #[error("server cannot start from the {0} state")]
    InvalidState(LifecycleState),
}

/// A single-use server that accepts connections until told to stop, then
/// drains them within a bounded grace period.
///
/// Share it behind an `Arc` to call [`stop`](Self::stop) or
/// [`is_stopped`](Self::is_stopped) from other tasks or threads while a start
/// operation is running.
pub struct GracefulServer {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    signal_handling: bool,
    coordinator: ShutdownCoordinator,
    tracker: ConnectionTracker,
    local_addr: OnceLock<SocketAddr>,
}

impl GracefulServer {
    /// Creates a server that will listen on `port` on all interfaces.
    pub fn new(port: u16, handler: impl Handler) -> Self {
        Self::with_config(ServerConfig::for_port(port), handler)
    }

    /// Creates a server from an explicit configuration.
    pub fn with_config(config: ServerConfig, handler: impl Handler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            // Shutdown is triggered only through `stop`; process signals are
            // the embedding application's business.
            signal_handling: false,
            coordinator: ShutdownCoordinator::new(),
            tracker: ConnectionTracker::new(),
            local_addr: OnceLock::new(),
        }
    }

    /// Configured bind address, fixed at construction.
    pub fn address(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// The configuration this instance was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Always `false`: this server never installs OS signal handlers.
    pub fn signal_handling_enabled(&self) -> bool {
        self.signal_handling
    }

    /// Address actually bound, once a start operation owns a listener.
    /// Differs from [`address`](Self::address) when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// `true` while Idle or Stopped; `false` while Serving or Stopping and
    /// after a failed start.
    pub fn is_stopped(&self) -> bool {
        self.coordinator.is_stopped()
    }

    /// Full lifecycle state (distinguishes never-started from shut down).
    pub fn state(&self) -> LifecycleState {
        self.coordinator.state()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.coordinator.subscribe()
    }

    /// Resolves once the instance is Stopped or Failed.
    pub async fn wait_stopped(&self) {
        self.coordinator.wait_stopped().await;
    }

    /// Number of connections currently open.
    pub fn active_connections(&self) -> usize {
        self.tracker.count()
    }

    /// Stops accepting and gives open connections up to `timeout` to finish.
    ///
    /// Returns immediately; the running start operation resolves once the
    /// drain completes.  A zero timeout force-closes every connection at
    /// once.  Only the first call has an effect.  Calling it before any
    /// start operation marks the instance Stopped.
    pub fn stop(&self, timeout: Duration) {
        self.coordinator.request_stop(timeout);
    }

    /// Binds [`address`](Self::address) and serves plain TCP until stopped.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound, otherwise as
    /// [`serve`](Self::serve).
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        self.ensure_idle()?;
        let listener = bind_plain(self.config.bind_addr)
            .await
            .map_err(|e| self.start_failed(e))?;
        self.serve(listener).await
    }

    /// Binds [`address`](Self::address) and serves TLS using PEM files.
    ///
    /// # Errors
    ///
    /// [`ServerError::Cert`] if the certificate or key cannot be loaded,
    /// [`ServerError::Bind`] if the address cannot be bound, otherwise as
    /// [`serve`](Self::serve).
    pub async fn listen_and_serve_tls(
        &self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        self.ensure_idle()?;
        let listener = bind_plain(self.config.bind_addr)
            .await
            .map_err(|e| self.start_failed(e))?;
        let tls = bind_tls_from_files(
            listener,
            cert_path,
            key_path,
            self.config.handshake_timeout,
        )
        .map_err(|e| self.start_failed(e))?;
        self.serve(tls).await
    }

    /// Binds [`address`](Self::address) and serves TLS with a caller-built
    /// rustls configuration, used as-is.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound, otherwise as
    /// [`serve`](Self::serve).
    pub async fn listen_and_serve_tls_config(
        &self,
        tls_config: Arc<rustls::ServerConfig>,
    ) -> Result<(), ServerError> {
        self.ensure_idle()?;
        let listener = bind_plain(self.config.bind_addr)
            .await
            .map_err(|e| self.start_failed(e))?;
        let tls = bind_tls_from_config(listener, tls_config, self.config.handshake_timeout);
        self.serve(tls).await
    }

    fn ensure_idle(&self) -> Result<(), ServerError> {
        self.coordinator
            .ensure_idle()
            .map_err(ServerError::InvalidState)
    }

    /// Records a start that failed before serving: Idle → Failed.
    fn start_failed(&self, e: impl Into<ServerError>) -> ServerError {
        let e = e.into();
        error!("start failed: {e}");
        self.coordinator.fail();
        e
    }

    /// Serves on a listener the caller already bound, taking ownership of it
    /// until the instance is Stopped.
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidState`] if this instance is not Idle;
    /// [`ServerError::Accept`] if the listener fails for a reason other than
    /// `stop`.
    pub async fn serve<L: Listener>(&self, mut listener: L) -> Result<(), ServerError> {
        let bound = listener.local_addr();
        // Published before the state flips so observers of Serving can read it.
        if let (Ok(addr), LifecycleState::Idle) = (&bound, self.coordinator.state()) {
            let _ = self.local_addr.set(*addr);
        }

        self.coordinator
            .begin_serving()
            .map_err(ServerError::InvalidState)?;

        match bound {
            Ok(addr) => info!(%addr, "serving"),
            Err(e) => warn!("serving on listener with unknown address: {e}"),
        }

        let mut tasks = JoinSet::new();
        let outcome = self.accept_loop(&mut listener, &mut tasks).await;

        // Closing the listener refuses any connection not yet accepted.
        drop(listener);

        let grace = match &outcome {
            Ok(timeout) => *timeout,
            Err(_) => Duration::ZERO,
        };
        self.drain(&mut tasks, grace).await;
        match &outcome {
            Ok(_) => self.coordinator.finish(),
            Err(_) => {
                self.coordinator.fail();
            }
        }

        outcome.map(|_| ())
    }

    /// Accepts until a stop is requested (returning its drain timeout) or
    /// the listener fails.
    async fn accept_loop<L: Listener>(
        &self,
        listener: &mut L,
        tasks: &mut JoinSet<()>,
    ) -> Result<Duration, ServerError> {
        let limit = self.config.max_connections;
        let mut backoff = ACCEPT_BACKOFF_MIN;

        loop {
            let accept = async {
                if let Some(limit) = limit {
                    self.tracker.wait_below(limit).await;
                }
                listener.accept().await
            };

            tokio::select! {
                // Stop wins over a simultaneously ready accept.
                biased;

                timeout = self.coordinator.stop_requested() => return Ok(timeout),

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("connection task panicked: {e}");
                        }
                    }
                }

                accepted = accept => match accepted {
                    Ok((io, peer)) => {
                        backoff = ACCEPT_BACKOFF_MIN;
                        self.dispatch(Box::new(io), peer, tasks);
                    }
                    Err(e) if is_transient(&e) => {
                        warn!(?backoff, "transient accept error: {e}");
                        tokio::select! {
                            biased;
                            timeout = self.coordinator.stop_requested() => return Ok(timeout),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    }
                    Err(e) => {
                        if !self.coordinator.state().is_accepting() {
                            // Raced a stop request: not a fault.
                            return Ok(self.coordinator.stop_requested().await);
                        }
                        error!("accept failed: {e}");
                        return Err(ServerError::Accept(e));
                    }
                },
            }
        }
    }

    /// Registers the connection and runs the handler on its own task.
    fn dispatch(
        &self,
        stream: Box<dyn crate::application::handler::Stream>,
        peer: SocketAddr,
        tasks: &mut JoinSet<()>,
    ) {
        let guard = self.tracker.track(peer);
        let id = guard.id();
        let conn = Connection::new(id, peer, stream);
        let handler = Arc::clone(&self.handler);

        tasks.spawn(async move {
            // Held until the task ends or is aborted by a forced close.
            let _guard = guard;
            match AssertUnwindSafe(handler.handle(conn)).catch_unwind().await {
                Ok(Ok(())) => debug!(conn = %id, %peer, "handler finished"),
                Ok(Err(e)) => warn!(conn = %id, %peer, "handler failed: {e:#}"),
                Err(_) => error!(conn = %id, %peer, "handler panicked"),
            }
        });
    }

    /// Waits up to `grace` for open connections, then aborts the rest.
    async fn drain(&self, tasks: &mut JoinSet<()>, grace: Duration) {
        let open = self.tracker.count();
        if open > 0 && !grace.is_zero() {
            info!(open, ?grace, "draining connections");
            match tokio::time::timeout(grace, self.tracker.wait_idle()).await {
                Ok(()) => info!("all connections finished"),
                Err(_) => warn!(
                    remaining = self.tracker.count(),
                    "drain timeout elapsed; force-closing remaining connections"
                ),
            }
        } else if open > 0 {
            info!(open, "force-closing connections");
        }

        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("connection task panicked: {e}");
                }
            }
        }
        debug!(remaining = self.tracker.count(), "drain complete");
    }
}

/// Accept errors that concern one would-be connection, or a momentary
/// resource shortage, rather than the listening socket itself.
fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    if matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock | TimedOut
    ) {
        return true;
    }
    // EMFILE / ENFILE: out of file descriptors until connections close.
    matches!(e.raw_os_error(), Some(23) | Some(24))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
