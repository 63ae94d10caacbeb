//! ConnectionTracker: the set of currently open connections.
//!
//! The accept path registers each connection; the connection's task
//! deregisters it when the handler returns or the task is aborted by a forced
//! close.  The stop path reads the count and waits for it to reach zero.
//! Those three run concurrently, so the set and its size are updated together
//! under one lock and the size is published on a `watch` channel.  Waiting
//! for "count == 0" is then a `wait_for` on that channel: no polling and no
//! lost wake-up between the check and the wait.
//!
//! The tracker never closes connections itself.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::watch;
use tracing::debug;

use graceful_core::ConnectionId;

/// Bookkeeping for one open connection.
#[derive(Debug)]
struct TrackedConnection {
    peer_addr: SocketAddr,
    accepted_at: Instant,
}

#[derive(Debug)]
struct Inner {
    open: Mutex<HashMap<ConnectionId, TrackedConnection>>,
    count: watch::Sender<usize>,
}

/// Thread-safe registry of open connections.  Cloning shares the registry.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<Inner>,
}

impl ConnectionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                open: Mutex::new(HashMap::new()),
                count: watch::Sender::new(0),
            }),
        }
    }

    fn open(&self) -> MutexGuard<'_, HashMap<ConnectionId, TrackedConnection>> {
        // Bookkeeping stays consistent even if a holder panicked: every
        // critical section is a single insert/remove plus a count publish.
        self.inner
            .open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a newly accepted connection and returns its id.
    pub fn on_accept(&self, peer_addr: SocketAddr) -> ConnectionId {
        let id = ConnectionId::new();
        let mut open = self.open();
        open.insert(
            id,
            TrackedConnection {
                peer_addr,
                accepted_at: Instant::now(),
            },
        );
        self.inner.count.send_replace(open.len());
        debug!(conn = %id, %peer_addr, open = open.len(), "connection registered");
        id
    }

    /// Deregisters a connection.  Returns `false` if `id` was not tracked.
    pub fn on_close(&self, id: ConnectionId) -> bool {
        let mut open = self.open();
        let removed = open.remove(&id);
        if let Some(ref conn) = removed {
            self.inner.count.send_replace(open.len());
            debug!(
                conn = %id,
                peer_addr = %conn.peer_addr,
                open = open.len(),
                lifetime = ?conn.accepted_at.elapsed(),
                "connection closed"
            );
        }
        removed.is_some()
    }

    /// Registers a connection and returns a guard that deregisters it on drop.
    pub fn track(&self, peer_addr: SocketAddr) -> ConnectionGuard {
        let id = self.on_accept(peer_addr);
        ConnectionGuard {
            tracker: self.clone(),
            id,
        }
    }

    /// Current number of open connections.
    pub fn count(&self) -> usize {
        *self.inner.count.borrow()
    }

    /// Resolves once no connections are open.  Cancel-safe.
    pub async fn wait_idle(&self) {
        self.wait_until(|count| count == 0).await;
    }

    /// Resolves once fewer than `limit` connections are open.  Cancel-safe.
    pub async fn wait_below(&self, limit: usize) {
        self.wait_until(|count| count < limit).await;
    }

    async fn wait_until(&self, mut ready: impl FnMut(usize) -> bool) {
        let mut rx = self.inner.count.subscribe();
        // The sender lives in `self.inner`, so the channel cannot close here.
        let _ = rx.wait_for(|count| ready(*count)).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration of one connection.
///
/// Dropping the guard (normal return, error, panic unwind, or task abort)
/// deregisters the connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Id assigned at registration.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.on_close(self.id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_new_tracker_is_empty() {
        let t = ConnectionTracker::new();
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn test_accept_and_close_update_count() {
        let t = ConnectionTracker::new();
        let a = t.on_accept(peer(1));
        let b = t.on_accept(peer(2));
        assert_eq!(t.count(), 2);

        assert!(t.on_close(a));
        assert_eq!(t.count(), 1);
        assert!(t.on_close(b));
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn test_double_close_is_ignored() {
        let t = ConnectionTracker::new();
        let id = t.on_accept(peer(1));
        assert!(t.on_close(id));
        assert!(!t.on_close(id));
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn test_guard_deregisters_on_drop() {
        let t = ConnectionTracker::new();
        let guard = t.track(peer(1));
        assert_eq!(t.count(), 1);
        drop(guard);
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn test_clones_share_registry() {
        let t = ConnectionTracker::new();
        let clone = t.clone();
        let _guard = clone.track(peer(1));
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn test_concurrent_accept_and_close_balance() {
        let t = ConnectionTracker::new();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let _guard = t.track(peer(i * 1000 + j));
                    }
                })
            })
            .collect();
        for th in threads {
            th.join().unwrap();
        }
        assert_eq!(t.count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let t = ConnectionTracker::new();
        tokio::time::timeout(Duration::from_millis(100), t.wait_idle())
            .await
            .expect("empty tracker is already idle");
    }

    #[tokio::test]
    async fn test_wait_idle_wakes_on_last_close() {
        let t = ConnectionTracker::new();
        let guard = t.track(peer(1));

        let waiter = {
            let t = t.clone();
            tokio::spawn(async move { t.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle must wake when the last connection closes")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_below_limit() {
        let t = ConnectionTracker::new();
        let a = t.track(peer(1));
        let _b = t.track(peer(2));

        let waiter = {
            let t = t.clone();
            tokio::spawn(async move { t.wait_below(2).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(a);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_below must wake once under the limit")
            .unwrap();
    }
}
