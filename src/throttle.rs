//! Linear retry throttling.
//!
//! Each failure adds a fixed increment to the delay, saturating at a cap. A successful
//! transport establishment resets it to zero. There is no jitter: the client is a single
//! consumer, and callers that fan out across many clients can add their own.

use std::time::Duration;

use backoff::backoff::Backoff;
use tokio::time::Instant;

use crate::config::BackoffConfig;

/// Delay state between consecutive failed connection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearBackoff {
    increment: Duration,
    cap: Duration,
    current: Duration,
}

impl LinearBackoff {
    #[must_use]
    pub const fn new(increment: Duration, cap: Duration) -> Self {
        Self {
            increment,
            cap,
            current: Duration::ZERO,
        }
    }

    /// Add one increment to the delay, clamped to the cap.
    pub fn increase(&mut self) {
        self.current = self.current.saturating_add(self.increment).min(self.cap);
    }

    /// The delay currently in effect.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }
}

impl From<&BackoffConfig> for LinearBackoff {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(config.increment, config.cap)
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.current = Duration::ZERO;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.increase();
        Some(self.current)
    }
}

/// Stand-in for deadlines that do not fit in an [`Instant`], about 30 years out.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The instant `delay` from now, clamped so oversized delays never overflow.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
