//! Exponential idle-pause controller for polling loops.
//!
//! [`Backoff`] tracks a current pause in `[min, max]`. The pending consumer
//! resets it whenever a claim cycle found work and doubles it otherwise, so
//! idle streams are scanned at a decaying rate while busy streams stay
//! reactive.

use std::time::Duration;

/// Doubling backoff clamped to `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// `max` is raised to `min` when the two are inverted.
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Current pause length.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Back to the minimum.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Double the pause, capped at the maximum.
    pub fn increase(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    /// Sleep for the current pause.
    pub async fn wait(&self) {
        tokio::time::sleep(self.current).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(backoff.current(), Duration::from_secs(1));

        backoff.increase();
        assert_eq!(backoff.current(), Duration::from_secs(2));

        backoff.increase();
        assert_eq!(backoff.current(), Duration::from_secs(4));

        backoff.increase();
        assert_eq!(backoff.current(), Duration::from_secs(5));

        backoff.increase();
        assert_eq!(backoff.current(), Duration::from_secs(5));
    }

    #[test]
    fn reset_returns_to_min() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        backoff.increase();
        backoff.increase();
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn inverted_bounds_collapse_to_min() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        backoff.increase();
        assert_eq!(backoff.current(), Duration::from_secs(5));
    }
}
