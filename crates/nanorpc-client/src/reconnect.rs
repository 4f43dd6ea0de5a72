//! Reconnect waiters.  The supervisor asks one for a delay after every
//! failed dial and every ended session.

use std::fmt::Debug;
use std::time::Duration;

use rand::Rng;

/// Floor for every reconnect sleep, so a zero delay cannot spin.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);

pub trait Backoff: Send + Sync + Debug + 'static {
    /// Delay before redial number `attempt + 1`.  `attempt` counts failures
    /// since the last session that reached `Running`.  `None` stops the
    /// supervisor with `ReconnectExhausted`.
    fn delay_for_attempt(&self, attempt: u32) -> Option<Duration>;
}

/// Same delay every time, forever.  The default waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff(pub Duration);

impl Backoff for ConstantBackoff {
    fn delay_for_attempt(&self, _attempt: u32) -> Option<Duration> {
        Some(self.0)
    }
}

/// `initial_delay * backoff_factor^attempt`, capped at `max_delay`, plus up
/// to 25% random jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Give up after this many consecutive failures; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl ExponentialBackoff {
    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = self.initial_delay.as_secs_f64() * self.backoff_factor.max(1.0).powi(exp);
        let capped = grown.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

impl Backoff for ExponentialBackoff {
    fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if self.should_give_up(attempt) {
            return None;
        }
        let base = self.base_delay(attempt);
        // Spread redials from many clients that lost the same server.
        let jitter = base.mul_f64(rand::rng().random_range(0.0..0.25));
        Some(base + jitter)
    }
}
