//! Bounded-wait lock.
//!
//! A plain [`tokio::sync::Mutex`] acquired under [`tokio::time::timeout`].
//! The wait budget is expressed the way the flight software always has:
//! a polling delay times a maximum number of tries.  Exhausting it is not an
//! error the caller can handle; the registry turns it into a fatal reset.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

/// Wait budget of a [`TimedLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockBudget {
    pub poll_delay: Duration,
    pub max_tries: u32,
}

impl Default for LockBudget {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_millis(5),
            max_tries: 1000,
        }
    }
}

impl LockBudget {
    /// Longest time a caller may wait for the lock.
    pub fn total(&self) -> Duration {
        self.poll_delay.saturating_mul(self.max_tries)
    }
}

/// Non-reentrant mutex with a bounded acquisition wait.
#[derive(Debug)]
pub struct TimedLock<T> {
    inner: Mutex<T>,
    budget: LockBudget,
}

impl<T> TimedLock<T> {
    pub fn new(value: T, budget: LockBudget) -> Self {
        Self {
            inner: Mutex::new(value),
            budget,
        }
    }

    pub fn budget(&self) -> LockBudget {
        self.budget
    }

    /// Acquire the lock, waiting at most [`LockBudget::total`].
    ///
    /// # Errors
    ///
    /// Returns the time waited when the budget is exhausted.
    pub async fn acquire(&self) -> Result<MutexGuard<'_, T>, Duration> {
        let budget = self.budget.total();
        timeout(budget, self.inner.lock()).await.map_err(|_| budget)
    }
}
