//! Explicit retry policy for upstream calls.
//!
//! GitLab reads use [`RetryPolicy::forever`] with a timeout predicate: a read
//! timeout is repeated with no delay and no attempt limit, every other error
//! propagates on the first failure. The unbounded loop is a known
//! limitation of the GitLab integration, kept visible here rather than
//! hidden inside the client.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

pub struct RetryPolicy<E> {
    /// `None` retries without limit.
    pub max_attempts: Option<u32>,
    /// Sleep between attempts; `None` retries immediately.
    pub delay: Option<Duration>,
    retry_if: fn(&E) -> bool,
}

impl<E: Display> RetryPolicy<E> {
    /// Retry matching errors with no limit and no delay.
    pub fn forever(retry_if: fn(&E) -> bool) -> Self {
        Self {
            max_attempts: None,
            delay: None,
            retry_if,
        }
    }

    #[cfg(test)]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    #[cfg(test)]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn should_retry(&self, error: &E, attempt: u32) -> bool {
        (self.retry_if)(error) && self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Run `op` until it succeeds, fails with a non-matching error, or the
    /// attempt limit is reached.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt) => {
                    tracing::warn!(attempt, error = %e, "Retrying after transient error");
                    crate::metrics::retry_attempted();
                    if let Some(delay) = self.delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
