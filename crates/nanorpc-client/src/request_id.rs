//! Client-wide request-ID counter.

use std::sync::atomic::{AtomicI32, Ordering};

use rand::Rng;

/// Monotonic positive 31-bit ID source.
///
/// Seeded from the thread-local CSPRNG so IDs from a restarted client don't
/// line up with stale responses still in flight from the previous process.
/// Never yields `0` or a negative value; wraps from `i32::MAX` to `1`.
#[derive(Debug)]
pub struct RequestCounter {
    last: AtomicI32,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::with_seed(rand::rng().random_range(1..=i32::MAX))
    }

    /// Start from a known value.  Non-positive seeds start at `1`.
    pub fn with_seed(seed: i32) -> Self {
        Self {
            last: AtomicI32::new(seed.max(0)),
        }
    }

    pub fn next(&self) -> i32 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(1) {
                Some(n) if n > 0 => n,
                _ => 1,
            };
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for RequestCounter {
    fn default() -> Self {
        Self::new()
    }
}
