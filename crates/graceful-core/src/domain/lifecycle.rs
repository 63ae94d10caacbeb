//! Lifecycle state of a graceful server instance.
//!
//! A server instance moves strictly forward through these states:
//!
//! ```text
//! Idle ──start──▶ Serving ──stop──▶ Stopping ──drained / timeout──▶ Stopped
//!   │  │             │                 │                              ▲
//!   │  │             └──── fault ──────┴──────▶ Failed                │
//!   │  └──────── bind / cert fault ────────────▶ Failed                │
//!   └──────────────────────── stop before start ──────────────────────┘
//! ```
//!
//! Idle and Stopped both *report* as stopped (nothing is being accepted or
//! drained), but they remain distinct values so callers that care can tell a
//! freshly constructed instance from one that has shut down.
//!
//! Failed is the end of a start that went wrong without anyone asking it to
//! stop.  It does not report as stopped, so `is_stopped()` checked next to a
//! returned error tells a genuine failure from a requested shutdown.

use std::fmt;

/// Where a server instance currently is in its single-use life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum LifecycleState {
    /// Constructed, never started.
    #[default]
    Idle,
    /// A listener is owned and connections are being accepted.
    Serving,
    /// Stop was requested: no new accepts, in-flight connections draining.
    Stopping,
    /// Terminal. The listener is closed and every connection is gone.
    Stopped,
    /// Terminal. A start operation failed without a stop being requested.
    Failed,
}

impl LifecycleState {
    /// Returns `true` when the instance is neither accepting nor draining.
    ///
    /// This is `true` for both [`Idle`](Self::Idle) and
    /// [`Stopped`](Self::Stopped).
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Returns `true` for [`Stopped`](Self::Stopped) and
    /// [`Failed`](Self::Failed): nothing further can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Returns `true` while new connections may be accepted.
    pub fn is_accepting(self) -> bool {
        self == Self::Serving
    }

    /// Returns `true` if moving from `self` to `next` respects the forward-only
    /// ordering.  Staying in the same state is not a transition.
    ///
    /// `Idle → Stopped` is legal (stop before start); `Serving → Stopped` is
    /// not, because every shutdown of a serving instance passes through
    /// `Stopping`.  Every non-terminal state may fail.
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Serving)
                | (Idle, Stopped)
                | (Serving, Stopping)
                | (Stopping, Stopped)
                | (Idle | Serving | Stopping, Failed)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Serving => "serving",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
