//! ShutdownCoordinator: owns the serving/stopped state and the stop signal.
//!
//! The coordinator is the single place where [`LifecycleState`] changes.  It
//! does no I/O: the serve loop (infrastructure layer) asks it whether it may
//! start, waits on it for a stop request, and reports back when draining is
//! finished.  Everything else (timers, signal tasks, other threads) only
//! calls [`request_stop`](ShutdownCoordinator::request_stop) and the query
//! methods.
//!
//! # Synchronisation
//!
//! State lives in a `tokio::sync::watch` channel.  Every transition runs as
//! a closure under the channel's internal lock (`send_if_modified`) and is
//! checked with [`LifecycleState::can_advance_to`], so a check-then-set is
//! atomic even when `request_stop` races the serve call.
//! The same channel wakes observers, which is how
//! [`wait_stopped`](ShutdownCoordinator::wait_stopped) avoids polling.
//!
//! The requested drain timeout travels on a second watch channel.  A watch
//! keeps its latest value, so a stop requested before the serve loop
//! subscribes is still observed.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use graceful_core::LifecycleState;

/// What a call to [`ShutdownCoordinator::request_stop`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The instance was never started; it is now Stopped with nothing to drain.
    StoppedBeforeStart,
    /// The instance was serving; it is now Stopping and the serve loop will
    /// drain for at most the given timeout.
    Draining,
    /// A stop was already in progress or complete.  Nothing changed.
    AlreadyStopping,
}

/// Serialises lifecycle transitions for one server instance.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: watch::Sender<LifecycleState>,
    stop_request: watch::Sender<Option<Duration>>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator in the Idle state.
    pub fn new() -> Self {
        Self::starting_in(LifecycleState::Idle)
    }

    fn starting_in(state: LifecycleState) -> Self {
        Self {
            state: watch::Sender::new(state),
            stop_request: watch::Sender::new(None),
        }
    }

    /// Test-only constructor that places the coordinator directly in `state`,
    /// bypassing the start/stop protocol.
    #[cfg(test)]
    pub(crate) fn with_state(state: LifecycleState) -> Self {
        Self::starting_in(state)
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// `true` when neither accepting nor draining (Idle or Stopped).
    pub fn is_stopped(&self) -> bool {
        self.state().is_stopped()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Moves to the state `next` picks for the current one, if that move is
    /// legal.  Returns `(from, to)` on success and the unchanged state
    /// otherwise.
    fn advance(
        &self,
        next: impl FnOnce(LifecycleState) -> Option<LifecycleState>,
    ) -> Result<(LifecycleState, LifecycleState), LifecycleState> {
        let mut result = Err(LifecycleState::Idle);
        self.state.send_if_modified(|state| {
            let from = *state;
            result = Err(from);
            match next(from) {
                Some(to) if from.can_advance_to(to) => {
                    *state = to;
                    result = Ok((from, to));
                    true
                }
                _ => false,
            }
        });
        if let Ok((from, to)) = result {
            info!("server state: {from} -> {to}");
        }
        result
    }

    /// Succeeds only while Idle.  Start operations call this before binding
    /// so a used instance never touches the network.
    ///
    /// # Errors
    ///
    /// Returns the current state if it is not Idle.
    pub fn ensure_idle(&self) -> Result<(), LifecycleState> {
        match self.state() {
            LifecycleState::Idle => Ok(()),
            other => Err(other),
        }
    }

    /// Idle → Serving.  Called by a start operation once it owns a listener.
    ///
    /// # Errors
    ///
    /// Returns the current state if it is not Idle: an instance serves at
    /// most once, and a stop issued before start leaves it Stopped.
    pub fn begin_serving(&self) -> Result<(), LifecycleState> {
        self.advance(|_| Some(LifecycleState::Serving)).map(|_| ())
    }

    /// Requests a stop with the given drain timeout.  Never blocks.
    ///
    /// Only the first request that finds the instance Idle or Serving has an
    /// effect; later or concurrent requests return
    /// [`StopOutcome::AlreadyStopping`] and their timeout is ignored.
    pub fn request_stop(&self, timeout: Duration) -> StopOutcome {
        let moved = self.advance(|state| match state {
            LifecycleState::Idle => Some(LifecycleState::Stopped),
            _ => Some(LifecycleState::Stopping),
        });

        match moved {
            Ok((LifecycleState::Idle, _)) => StopOutcome::StoppedBeforeStart,
            Ok(_) => {
                debug!(?timeout, "stop requested; draining");
                // Published after the state change, so a serve loop woken by
                // this value always sees Stopping.
                self.stop_request.send_replace(Some(timeout));
                StopOutcome::Draining
            }
            Err(state) => {
                debug!(?timeout, %state, "stop already in progress; request ignored");
                StopOutcome::AlreadyStopping
            }
        }
    }

    /// Resolves with the drain timeout once a stop has been requested for a
    /// serving instance.  Cancel-safe.
    pub async fn stop_requested(&self) -> Duration {
        let mut rx = self.stop_request.subscribe();
        // The sender lives in `self`, so the channel cannot close while this
        // future is alive.
        match rx.wait_for(Option::is_some).await.map(|timeout| *timeout) {
            Ok(Some(timeout)) => timeout,
            _ => Duration::ZERO,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_stop(&self) -> Option<Duration> {
        *self.stop_request.borrow()
    }

    /// Any live state → Failed.  Used when a start operation fails without a
    /// stop having been requested.
    ///
    /// Returns `false` if the instance was already terminal.
    pub fn fail(&self) -> bool {
        self.advance(|_| Some(LifecycleState::Failed)).is_ok()
    }

    /// Stopping → Stopped.  Called by the serve loop after draining.
    pub fn finish(&self) {
        let _ = self.advance(|state| {
            (state == LifecycleState::Stopping).then_some(LifecycleState::Stopped)
        });
    }

    /// Resolves once the instance reaches a terminal state (Stopped or
    /// Failed).
    pub async fn wait_stopped(&self) {
        let mut rx = self.subscribe();
        // Closed is impossible while `self` is borrowed; treat it as terminal.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
