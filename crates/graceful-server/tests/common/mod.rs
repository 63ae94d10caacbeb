//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use graceful_server::{GracefulServer, Handler, LifecycleState, ServerConfig, ServerError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

/// Upper bound on every wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

pub const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

pub fn loopback_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    }
}

pub fn loopback_server(handler: impl Handler) -> Arc<GracefulServer> {
    Arc::new(GracefulServer::with_config(loopback_config(), handler))
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Blocks until the server reaches `want`.
pub async fn wait_for_state(server: &GracefulServer, want: LifecycleState) {
    let mut rx = server.subscribe_state();
    tokio::time::timeout(WAIT, rx.wait_for(|state| *state == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want}"))
        .expect("state channel closed");
}

/// Polls `cond` until it holds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let poll = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Runs `listen_and_serve` on a task and returns once the server is Serving.
pub async fn spawn_plain(
    server: &Arc<GracefulServer>,
) -> (JoinHandle<Result<(), ServerError>>, SocketAddr) {
    let task = {
        let server = Arc::clone(server);
        tokio::spawn(async move { server.listen_and_serve().await })
    };
    wait_for_state(server, LifecycleState::Serving).await;
    let addr = server.local_addr().expect("bound address is known once serving");
    (task, addr)
}

/// Awaits the serve task, failing the test if it does not end in time.
pub async fn join_serve(task: JoinHandle<Result<(), ServerError>>) -> Result<(), ServerError> {
    tokio::time::timeout(WAIT, task)
        .await
        .expect("serve call did not return")
        .expect("serve task panicked")
}

/// Sends a request head and reads the whole response.
pub async fn http_get<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> String {
    stream.write_all(REQUEST).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}
