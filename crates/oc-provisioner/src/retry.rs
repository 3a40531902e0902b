use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Multiply the interval by `factor` after every attempt, capped at `max`.
    Exponential { factor: u32, max: Duration },
}

/// Bounded polling: at most `max_attempts` tries with a sleep between them.
///
/// Without a deadline the time spent sleeping is bounded by
/// `max_total_wait`, but slow attempts add to it. A `deadline` caps the
/// wall-clock time of the whole poll, in-flight attempt included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Fixed,
            deadline: None,
        }
    }

    /// Retry every `interval` until `max_wait` of wall-clock time is spent.
    pub fn within(max_wait: Duration, interval: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            (max_wait.as_nanos() / interval.as_nanos()).max(1)
        };
        Self {
            deadline: Some(max_wait),
            ..Self::fixed(u32::try_from(attempts).unwrap_or(u32::MAX), interval)
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max } => {
                let exp = attempt.saturating_sub(1);
                let mult = factor.saturating_pow(exp);
                self.interval.saturating_mul(mult).min(max)
            }
        }
    }

    /// Upper bound on the time spent sleeping across all attempts.
    pub fn max_total_wait(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }

    /// Run `op` until it yields `Some`, an error, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. Returns `Ok(None)` when the
    /// attempts are used up or the deadline passes. Errors are not retried.
    pub async fn poll<T, E, F, Fut>(&self, what: &str, op: F) -> Result<Option<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let Some(limit) = self.deadline else {
            return self.attempts(what, op).await;
        };
        match tokio::time::timeout(limit, self.attempts(what, op)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(what, ?limit, "wait budget elapsed");
                Ok(None)
            }
        }
    }

    async fn attempts<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<Option<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = op(attempt).await? {
                return Ok(Some(value));
            }
            if attempt < self.max_attempts {
                let delay = self.delay_for(attempt);
                debug!(what, attempt, max = self.max_attempts, ?delay, "not ready, retrying");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }
}
