use crate::{CacheSource, FetchError, Outcome, RetryPolicy};
use std::fmt;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Configuration for [`Reflow`](crate::Reflow) and
/// [`PaginatedReflow`](crate::PaginatedReflow).
///
/// | option | default |
/// |---|---|
/// | `runtime` | the runtime the subscription is created on |
/// | `initial` | [`Outcome::Loading`] |
/// | `should_loading_on_refresh` | `true` |
/// | `cache_source` | none |
/// | `retry` | 3 retries, 2000 ms apart, transient errors only |
/// | `timeout` | none |
/// | `scope` | none |
pub struct ReflowOptions<T> {
    pub(crate) runtime: Option<Handle>,
    pub(crate) initial: Outcome<T>,
    pub(crate) should_loading_on_refresh: bool,
    pub(crate) cache_source: Option<CacheSource<T>>,
    pub(crate) retry: RetryPolicy,
    pub(crate) timeout: Option<Duration>,
    pub(crate) scope: Option<CancellationToken>,
}

impl<T> ReflowOptions<T> {
    pub fn new() -> Self {
        ReflowOptions {
            runtime: None,
            initial: Outcome::Loading,
            should_loading_on_refresh: true,
            cache_source: None,
            retry: RetryPolicy::default(),
            timeout: None,
            scope: None,
        }
    }

    /// Runs fetch cycles on `runtime` instead of the current one.
    pub fn with_runtime(self, runtime: Handle) -> Self {
        ReflowOptions {
            runtime: Some(runtime),
            ..self
        }
    }

    /// Seeds the state. A `Success`/`Failure` seed stays visible until the
    /// first fetch lands.
    pub fn with_initial(self, initial: Outcome<T>) -> Self {
        ReflowOptions { initial, ..self }
    }

    pub fn with_loading_on_refresh(self, should_loading_on_refresh: bool) -> Self {
        ReflowOptions {
            should_loading_on_refresh,
            ..self
        }
    }

    pub fn with_cache_source(self, cache_source: CacheSource<T>) -> Self {
        ReflowOptions {
            cache_source: Some(cache_source),
            ..self
        }
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        ReflowOptions { retry, ..self }
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        let retry = self.retry.clone().with_max_retries(max_retries);
        ReflowOptions { retry, ..self }
    }

    pub fn with_retry_delay(self, delay: Duration) -> Self {
        let retry = self.retry.clone().with_delay(delay);
        ReflowOptions { retry, ..self }
    }

    pub fn with_retry_predicate<P>(self, predicate: P) -> Self
    where
        P: Fn(&FetchError) -> bool + Send + Sync + 'static,
    {
        let retry = self.retry.clone().with_predicate(predicate);
        ReflowOptions { retry, ..self }
    }

    /// Bounds every fetch attempt; an attempt that overruns fails with
    /// [`FetchError::Timeout`].
    pub fn with_timeout(self, timeout: Duration) -> Self {
        ReflowOptions {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Ties the subscription to an owning scope. Cancelling the token stops
    /// the subscription for good.
    pub fn with_scope(self, scope: CancellationToken) -> Self {
        ReflowOptions {
            scope: Some(scope),
            ..self
        }
    }

    pub(crate) fn runtime_handle(&self) -> Handle {
        self.runtime.clone().unwrap_or_else(Handle::current)
    }

    pub(crate) fn scope_token(&self) -> CancellationToken {
        self.scope
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default()
    }
}

impl<T> Default for ReflowOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for ReflowOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflowOptions")
            .field("initial", &self.initial)
            .field("should_loading_on_refresh", &self.should_loading_on_refresh)
            .field("cache_source", &self.cache_source)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}
