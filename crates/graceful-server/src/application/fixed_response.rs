//! FixedResponse: a minimal HTTP/1.x handler that always answers with one body.
//!
//! It reads the request head, resolves the client IP (honouring
//! `X-Real-Ip`/`X-Forwarded-For`), logs it, writes a `200 OK` with the
//! configured body and closes the connection.  The `graceful-serve` binary
//! serves it; tests use it as a realistic handler.
//!
//! This is deliberately not an HTTP server: no keep-alive, no request body,
//! no routing.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use graceful_core::{remote_ip, RequestMeta};

use crate::application::handler::{Connection, Handler};

/// Largest request head accepted before the request is rejected.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Time a client has to send its request head.
pub const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler that answers every request with the same body.
#[derive(Debug, Clone)]
pub struct FixedResponse {
    body: String,
    head_timeout: Duration,
}

impl FixedResponse {
    /// Creates a handler answering with `body`.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            head_timeout: HEAD_READ_TIMEOUT,
        }
    }

    /// Overrides the request-head read timeout.
    pub fn with_head_timeout(mut self, timeout: Duration) -> Self {
        self.head_timeout = timeout;
        self
    }

    /// The body sent to every client.
    pub fn body(&self) -> &str {
        &self.body
    }

    fn render(&self, status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }
}

#[async_trait]
impl Handler for FixedResponse {
    async fn handle(&self, mut conn: Connection) -> anyhow::Result<()> {
        let peer = conn.peer_addr();
        let head = tokio::time::timeout(self.head_timeout, read_head(&mut conn))
            .await
            .with_context(|| format!("{peer}: timed out waiting for request head"))?
            .with_context(|| format!("{peer}: failed to read request head"))?;

        let response = match head {
            Some(head) => {
                let mut meta = conn.request_meta();
                let request_line = parse_head(&head, &mut meta);
                info!(client_ip = %remote_ip(&meta), %peer, request = %request_line, "request");
                self.render("200 OK", &self.body)
            }
            None => {
                debug!(%peer, "request head too large");
                self.render("431 Request Header Fields Too Large", "")
            }
        };

        conn.write_all(response.as_bytes()).await?;
        conn.shutdown().await?;
        Ok(())
    }
}

/// Reads until the blank line ending the request head.
///
/// Returns `Ok(None)` if the head exceeds [`MAX_HEAD_BYTES`].  EOF before the
/// blank line yields whatever was read.
async fn read_head(conn: &mut Connection) -> std::io::Result<Option<String>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = conn.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buf) {
            buf.truncate(end);
            break;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Ok(None);
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Copies header lines into `meta` and returns the request line.
fn parse_head<'a>(head: &'a str, meta: &mut RequestMeta) -> &'a str {
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().trim();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            meta.push_header(name.trim(), value.trim());
        }
    }
    request_line
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use graceful_core::{ClientAddrSource, ConnectionId};
    use tokio::io::duplex;

    fn connection(stream: tokio::io::DuplexStream) -> Connection {
        Connection::new(
            ConnectionId::new(),
            "198.51.100.4:5555".parse().unwrap(),
            Box::new(stream),
        )
    }

    #[test]
    fn test_parse_head_collects_headers() {
        let mut meta = RequestMeta::new("198.51.100.4:5555");
        let line = parse_head(
            "GET / HTTP/1.1\r\nHost: example.com\r\nX-Real-Ip: 203.0.113.1",
            &mut meta,
        );
        assert_eq!(line, "GET / HTTP/1.1");
        assert_eq!(meta.header("host"), Some("example.com"));
        assert_eq!(remote_ip(&meta), "203.0.113.1");
    }

    #[test]
    fn test_parse_head_skips_lines_without_colon() {
        let mut meta = RequestMeta::default();
        parse_head("GET / HTTP/1.1\r\ngarbage\r\nAccept: */*", &mut meta);
        assert_eq!(meta.header_count(), 1);
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(14));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[tokio::test]
    async fn test_handle_writes_fixed_body() {
        let (mut client, server) = duplex(4096);
        let handler = FixedResponse::new("Foobar");

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        handler.handle(connection(server)).await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 6\r\n"));
        assert!(response.ends_with("\r\n\r\nFoobar"));
    }

    #[tokio::test]
    async fn test_handle_rejects_oversized_head() {
        let (mut client, server) = duplex(64 * 1024);
        let handler = FixedResponse::new("Foobar");

        let mut request = b"GET / HTTP/1.1\r\n".to_vec();
        request.extend(std::iter::repeat(b'a').take(MAX_HEAD_BYTES + 10));
        client.write_all(&request).await.unwrap();
        handler.handle(connection(server)).await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 431 "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_times_out_silent_client() {
        let (_client, server) = duplex(64);
        let handler = FixedResponse::new("x").with_head_timeout(Duration::from_millis(50));

        let err = handler.handle(connection(server)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
