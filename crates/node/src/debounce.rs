//! Per-input debounce with a settle window.
//!
//! ```text
//!            raw != level                   raw == candidate for >= settle
//!  Stable ─────────────────▶ Settling ──────────────────────────────────▶ Stable(candidate)
//!    ▲                          │                                          + Transition
//!    └──────── raw == level ────┘
//! ```
//!
//! `update()` is called from the control loop on every tick with the raw
//! pin level. Bounces shorter than the settle window never leave the
//! tracker.

use std::time::Duration;

use tokio::time::Instant;

/// Settle window used when none is configured.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(50);

/// A confirmed, debounced level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: bool,
    pub to: bool,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stable(bool),
    Settling {
        stable: bool,
        candidate: bool,
        since: Instant,
    },
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    settle: Duration,
    state: State,
    last_change: Option<Instant>,
}

impl Debouncer {
    /// `initial` is the level assumed at startup (high for a pulled-up
    /// button).
    pub fn new(initial: bool, settle: Duration) -> Self {
        Self {
            settle,
            state: State::Stable(initial),
            last_change: None,
        }
    }

    /// Last confirmed level.
    pub fn stable_level(&self) -> bool {
        match self.state {
            State::Stable(level) => level,
            State::Settling { stable, .. } => stable,
        }
    }

    /// When the last confirmed transition happened.
    pub fn last_change(&self) -> Option<Instant> {
        self.last_change
    }

    pub fn is_settling(&self) -> bool {
        matches!(self.state, State::Settling { .. })
    }

    pub fn update(&mut self, now: Instant, raw: bool) -> Option<Transition> {
        match self.state {
            State::Stable(level) => {
                if raw != level {
                    self.state = State::Settling {
                        stable: level,
                        candidate: raw,
                        since: now,
                    };
                }
                None
            }
            State::Settling {
                stable,
                candidate,
                since,
            } => {
                if raw != candidate {
                    // Bounced back before settling.
                    self.state = State::Stable(stable);
                    return None;
                }
                if now.saturating_duration_since(since) < self.settle {
                    return None;
                }
                // Keep the record monotonic even if the caller's clock is not.
                let at = match self.last_change {
                    Some(prev) if prev > now => prev,
                    _ => now,
                };
                self.state = State::Stable(candidate);
                self.last_change = Some(at);
                Some(Transition {
                    from: stable,
                    to: candidate,
                    at,
                })
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
