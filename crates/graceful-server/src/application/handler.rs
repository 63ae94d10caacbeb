//! The handler contract.
//!
//! The lifecycle manager treats the handler as opaque: it hands over one
//! [`Connection`] per accepted socket, waits for the returned future, and
//! then closes and deregisters the connection.  Protocol handling (request
//! parsing, routing) is entirely the handler's business.
//!
//! A handler that never returns keeps its connection open until the drain
//! timeout of a stop force-closes it.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use graceful_core::{ConnectionId, RequestMeta};

/// Byte stream a handler reads from and writes to.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite` type that can
/// move between threads, so both `TcpStream` and TLS streams qualify.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// One accepted connection, handed to the [`Handler`] by value.
///
/// Dropping it closes the underlying socket.  `Connection` implements
/// [`AsyncRead`] and [`AsyncWrite`] by delegating to the inner stream, so
/// `tokio::io::AsyncReadExt`/`AsyncWriteExt` work on it directly.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    stream: Box<dyn Stream>,
}

impl Connection {
    /// Wraps an accepted stream.
    pub fn new(id: ConnectionId, peer_addr: SocketAddr, stream: Box<dyn Stream>) -> Self {
        Self {
            id,
            peer_addr,
            stream,
        }
    }

    /// Tracker identity of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address reported by the listener.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Starts a [`RequestMeta`] for client-IP resolution, seeded with this
    /// connection's peer address.  The handler adds whatever headers it
    /// parsed.
    pub fn request_meta(&self) -> RequestMeta {
        RequestMeta::new(self.peer_addr.to_string())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Caller-supplied logic run once per accepted connection.
///
/// Errors are logged by the server and never end serving.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, conn: Connection) -> anyhow::Result<()>;
}

/// [`Handler`] built from a closure; see [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Adapts an async closure into a [`Handler`].
///
/// # Example
///
/// ```rust
/// use graceful_server::application::handler_fn;
/// use tokio::io::AsyncWriteExt;
///
/// let handler = handler_fn(|mut conn| async move {
///     conn.write_all(b"Foobar").await?;
///     anyhow::Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, conn: Connection) -> anyhow::Result<()> {
        (self.f)(conn).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn peer() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_connection_delegates_reads_and_writes() {
        let (client, server) = duplex(64);
        let mut conn = Connection::new(ConnectionId::new(), peer(), Box::new(server));
        let mut client = client;

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        conn.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_dropping_connection_closes_stream() {
        let (mut client, server) = duplex(64);
        let conn = Connection::new(ConnectionId::new(), peer(), Box::new(server));
        drop(conn);

        let mut buf = Vec::new();
        let n = client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0, "peer must observe EOF once the connection is dropped");
    }

    #[test]
    fn test_request_meta_is_seeded_with_peer_addr() {
        let (_client, server) = duplex(8);
        let conn = Connection::new(ConnectionId::new(), peer(), Box::new(server));
        let meta = conn.request_meta();
        assert_eq!(graceful_core::remote_ip(&meta), "192.0.2.10");
    }

    #[tokio::test]
    async fn test_handler_fn_runs_closure() {
        let handler = handler_fn(|mut conn: Connection| async move {
            conn.write_all(b"Foobar").await?;
            anyhow::Ok(())
        });
        let (mut client, server) = duplex(64);
        let conn = Connection::new(ConnectionId::new(), peer(), Box::new(server));

        handler.handle(conn).await.unwrap();

        let mut body = String::new();
        client.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "Foobar");
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_error() {
        let handler = handler_fn(|_conn| async { Err(anyhow::anyhow!("boom")) });
        let (_client, server) = duplex(8);
        let conn = Connection::new(ConnectionId::new(), peer(), Box::new(server));

        let err = handler.handle(conn).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
