//! Rate governor: token-paced release of work with 429-triggered backoff
//!
//! One governor exists per run and is owned by the pipeline driving that
//! run; `acquire` calls are serialized by construction (there is exactly
//! one logical pipeline in flight). Normal pacing spaces successive remote
//! calls by at least `delay`; a rate-limit signal opens an exponential
//! backoff window that dominates the normal spacing until the next
//! success.

use crate::shutdown::ShutdownFlag;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of [`RateGovernor::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// The caller may issue its remote call.
    Granted,
    /// The shutdown flag was raised while waiting; the caller must abandon
    /// its unit of work.
    Cancelled,
}

/// Paces release of work and tracks the current backoff window.
///
/// Created per run, discarded when the run ends.
#[derive(Debug)]
pub struct RateGovernor {
    delay: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
    next_release_at: Option<Instant>,
    current_backoff: Duration,
    backoff_deadline: Option<Instant>,
}

impl RateGovernor {
    /// Create a governor with the given inter-request delay and backoff
    /// window. `delay` may be zero; backoff semantics still apply.
    #[must_use]
    pub fn new(delay: Duration, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            delay,
            backoff_base,
            backoff_cap,
            next_release_at: None,
            current_backoff: Duration::ZERO,
            backoff_deadline: None,
        }
    }

    /// The backoff currently in force, zero outside a backoff window.
    #[must_use]
    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }

    /// Block until both the normal spacing deadline and any backoff
    /// deadline have passed, or until the shutdown flag is raised.
    pub async fn acquire(&mut self, shutdown: &ShutdownFlag) -> Permit {
        if shutdown.is_raised() {
            return Permit::Cancelled;
        }

        let deadline = match (self.next_release_at, self.backoff_deadline) {
            (Some(release), Some(backoff)) => Some(release.max(backoff)),
            (Some(release), None) => Some(release),
            (None, backoff) => backoff,
        };

        if let Some(deadline) = deadline {
            if deadline > Instant::now() {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {}
                    () = shutdown.raised() => return Permit::Cancelled,
                }
            }
        }

        if shutdown.is_raised() {
            return Permit::Cancelled;
        }
        Permit::Granted
    }

    /// Record a successful remote call: the backoff window closes and the
    /// normal spacing clock restarts.
    pub fn record_success(&mut self) {
        self.current_backoff = Duration::ZERO;
        self.backoff_deadline = None;
        self.next_release_at = Some(Instant::now() + self.delay);
    }

    /// Record a rate-limit signal: the backoff doubles (bounded by the
    /// cap) and a new deadline opens. Returns the backoff now in force so
    /// the caller can emit its progress event.
    pub fn record_throttled(&mut self) -> Duration {
        let doubled = self
            .current_backoff
            .checked_mul(2)
            .unwrap_or(self.backoff_cap);
        self.current_backoff = self.backoff_cap.min(self.backoff_base.max(doubled));
        self.backoff_deadline = Some(Instant::now() + self.current_backoff);
        warn!(
            backoff_secs = self.current_backoff.as_secs_f64(),
            "Remote rate limit hit, backing off"
        );
        self.current_backoff
    }

    /// Record a non-throttling failure: no backoff growth, normal spacing
    /// only.
    pub fn record_failure(&mut self) {
        debug!("Remote call failed without throttling; keeping normal spacing");
        self.next_release_at = Some(Instant::now() + self.delay);
    }
}
