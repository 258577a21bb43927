//! Cooperative cancellation.
//!
//! A [`CancelToken`] wraps a shared "time remaining" counter. The caller owns
//! the clock and decrements the counter; long-running loops poll
//! [`CancelToken::check`] at row / detection granularity and bail out once the
//! budget is non-positive.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::{DeblendError, Result};

#[derive(Clone, Debug)]
pub struct CancelToken {
    remaining: Arc<AtomicI64>,
}

impl CancelToken {
    /// Token with `budget` units of time remaining.
    pub fn new(budget: i64) -> Self {
        Self {
            remaining: Arc::new(AtomicI64::new(budget)),
        }
    }

    /// Token that is never cancelled unless the caller explicitly drains it.
    pub fn unlimited() -> Self {
        Self::new(i64::MAX)
    }

    /// Subtract `units` from the remaining budget.
    pub fn consume(&self, units: i64) {
        self.remaining.fetch_sub(units, Ordering::Relaxed);
    }

    /// Force immediate cancellation.
    pub fn cancel(&self) {
        self.remaining.store(0, Ordering::Relaxed);
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.remaining() <= 0
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DeblendError::Cancelled)
        } else {
            Ok(())
        }
    }
}
