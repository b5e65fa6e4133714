use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How the pause after a unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// The full remainder of the interval elapsed, or none was owed.
    Completed,
    /// Cancellation cut the pause short.
    Cancelled,
}

#[derive(Debug)]
pub struct Paced<T> {
    pub output: T,
    /// Time spent in the work itself, excluding the pause.
    pub elapsed: Duration,
    pub pace: Pace,
}

/// Makes every loop iteration take at least `interval` of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    interval: Duration,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Pause still owed once the work took `elapsed`.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.interval.saturating_sub(elapsed)
    }

    /// Runs `work` to completion, then sleeps for whatever is left of the interval.
    /// The work itself is never timed out or interrupted.
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, work: F) -> Paced<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        let output = work().await;
        let elapsed = started.elapsed();

        let remaining = self.remaining(elapsed);
        if remaining.is_zero() {
            trace!(elapsed_ms = elapsed.as_millis(), "Iteration overran interval, no pause");
            return Paced {
                output,
                elapsed,
                pace: Pace::Completed,
            };
        }

        trace!(remaining_ms = remaining.as_millis(), "Pausing until next iteration");
        let pace = tokio::select! {
            biased;
            _ = cancel.cancelled() => Pace::Cancelled,
            _ = sleep(remaining) => Pace::Completed,
        };
        Paced {
            output,
            elapsed,
            pace,
        }
    }
}
