use crate::FetchError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

type RetryPredicate = Arc<dyn Fn(&FetchError) -> bool + Send + Sync>;
type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// Attempts are counted from 0. A failure of attempt `n` is retried while
/// `n < max_retries` and the predicate accepts the error, so `max_retries = N`
/// allows N retries after the first attempt. `max_retries = 0` makes every
/// failure terminal.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    predicate: RetryPredicate,
    delay_fn: Option<DelayFn>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            predicate: Arc::new(FetchError::is_transient),
            delay_fn: None,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            ..self
        }
    }

    pub fn with_delay(self, base_delay: Duration) -> Self {
        RetryPolicy { base_delay, ..self }
    }

    /// Replaces the transient-error classifier.
    pub fn with_predicate<P>(self, predicate: P) -> Self
    where
        P: Fn(&FetchError) -> bool + Send + Sync + 'static,
    {
        RetryPolicy {
            predicate: Arc::new(predicate),
            ..self
        }
    }

    /// Replaces the constant delay with a function of the attempt index.
    pub fn with_delay_fn<D>(self, delay_fn: D) -> Self
    where
        D: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        RetryPolicy {
            delay_fn: Some(Arc::new(delay_fn)),
            ..self
        }
    }

    /// Doubles `base_delay` on every attempt.
    pub fn exponential(self) -> Self {
        let base = self.base_delay;
        self.with_delay_fn(move |attempt| base.saturating_mul(1u32 << attempt.min(16)))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn is_retryable(&self, error: &FetchError) -> bool {
        (self.predicate)(error)
    }

    pub fn should_retry(&self, attempt: u32, error: &FetchError) -> bool {
        attempt < self.max_retries && self.is_retryable(error)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        match &self.delay_fn {
            Some(delay_fn) => delay_fn(attempt),
            None => self.base_delay,
        }
    }

    /// Drives `operation` until it succeeds or the policy gives up.
    ///
    /// The operation receives the attempt index. The error of the last
    /// attempt is returned when retries run out.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(attempt, &error) => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, ?delay, %error, "attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    debug!(attempt, %error, "attempt failed, giving up");
                    return Err(error);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("custom_delay", &self.delay_fn.is_some())
            .finish()
    }
}
