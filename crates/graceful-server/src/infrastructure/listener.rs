//! Listener abstraction and plain TCP binding.
//!
//! The serve loop only needs "accept the next connection" and "what address
//! am I bound to".  [`Listener`] captures exactly that, so the same loop runs
//! over a plain `TcpListener`, a [`TlsListener`](super::tls::TlsListener), or
//! a test double.  Closing a listener is dropping it.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// The listening address could not be bound.
#[derive(Debug, Error)]
#[error("failed to bind {addr}: {source}")]
pub struct BindError {
    pub addr: SocketAddr,
    #[source]
    pub source: io::Error,
}

/// A bound, accept-capable socket.
///
/// `accept` must be cancel-safe: the serve loop races it against the stop
/// signal, and a dropped `accept` future must not lose a connection.
#[async_trait]
pub trait Listener: Send + 'static {
    /// Stream type of an accepted connection.
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Waits for the next connection.
    async fn accept(&mut self) -> io::Result<(Self::Io, SocketAddr)>;

    /// Address this listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Listener for TcpListener {
    type Io = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        // Inherent method; cancel-safe per tokio docs.
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Opens a TCP listening socket on `addr`.
///
/// # Errors
///
/// Returns [`BindError`] if the address is in use, not local, or the process
/// lacks permission to bind it.
pub async fn bind_plain(addr: SocketAddr) -> Result<TcpListener, BindError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| BindError { addr, source })?;
    debug!(%addr, "bound plain listener");
    Ok(listener)
}

/// Adopts a listener the caller bound with the standard library (socket
/// activation, pre-bound test ports).
///
/// The socket is switched to non-blocking mode as tokio requires.  Must be
/// called from within a tokio runtime.
///
/// # Errors
///
/// Returns the I/O error from switching modes or registering the socket with
/// the runtime.
pub fn use_existing(listener: std::net::TcpListener) -> io::Result<TcpListener> {
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
