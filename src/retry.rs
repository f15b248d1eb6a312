//! Fixed-budget retry for log operations.
//!
//! [`Retrier`] re-runs an idempotent async operation a bounded number of
//! times with a fixed delay between attempts, propagating the last error
//! once the budget is spent. Acknowledgements and the dead-letter append
//! pipeline run under it so a transient log hiccup does not lose an
//! otherwise-terminal state transition.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY: Duration = Duration::from_millis(50);

/// Bounded retry with a fixed inter-attempt delay.
#[derive(Debug, Clone, Copy)]
pub struct Retrier {
    max_attempts: u32,
    delay: Duration,
}

impl Default for Retrier {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl Retrier {
    /// `max_attempts` is the total number of invocations, including the
    /// first one; it is floored at 1.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }
                    debug!(attempt, error = %e, "operation failed, retrying");
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
