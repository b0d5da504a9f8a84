//! Scripted fetch functions for tests and demos.

use crate::{FetchError, PageCursor};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Script<T> {
    queued: VecDeque<Result<T, FetchError>>,
    fallback: Option<Result<T, FetchError>>,
    cursors: Vec<PageCursor>,
}

/// A fetch function that replays a script of results.
///
/// Queued results are handed out once each, in order. When the queue runs dry
/// the fallback (see [`MockFetch::always`]) repeats forever; without one the
/// call fails with a "no scripted result" error.
pub struct MockFetch<T> {
    script: Arc<Mutex<Script<T>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl<T> Clone for MockFetch<T> {
    fn clone(&self) -> Self {
        MockFetch {
            script: self.script.clone(),
            calls: self.calls.clone(),
            delay: self.delay,
        }
    }
}

impl<T: Clone + Send + 'static> MockFetch<T> {
    pub fn new() -> Self {
        MockFetch {
            script: Arc::new(Mutex::new(Script {
                queued: VecDeque::new(),
                fallback: None,
                cursors: Vec::new(),
            })),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script<T>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call take `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        MockFetch {
            delay: Some(delay),
            ..self
        }
    }

    pub fn then_ok(self, value: T) -> Self {
        self.lock().queued.push_back(Ok(value));
        self
    }

    pub fn then_err(self, error: FetchError) -> Self {
        self.lock().queued.push_back(Err(error));
        self
    }

    /// The answer once the queued results are used up.
    pub fn always(self, result: Result<T, FetchError>) -> Self {
        self.lock().fallback = Some(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cursors seen by [`MockFetch::page_fetcher`] calls, oldest first.
    pub fn cursors(&self) -> Vec<PageCursor> {
        self.lock().cursors.clone()
    }

    fn next_result(&self) -> Result<T, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.lock();
        match script.queued.pop_front() {
            Some(result) => result,
            None => script
                .fallback
                .clone()
                .unwrap_or_else(|| Err(FetchError::error("no scripted result"))),
        }
    }

    pub fn call(&self) -> BoxFuture<'static, Result<T, FetchError>> {
        let result = self.next_result();
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }

    /// A zero-argument fetch function backed by this script.
    pub fn fetcher(&self) -> impl Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static
    where
        T: Sync,
    {
        let mock = self.clone();
        move || mock.call()
    }
}

impl<T: Clone + Send + 'static> MockFetch<Vec<T>> {
    /// A page fetch function backed by this script that records each cursor.
    pub fn page_fetcher(
        &self,
    ) -> impl Fn(PageCursor) -> BoxFuture<'static, Result<Vec<T>, FetchError>> + Send + Sync + 'static
    where
        T: Sync,
    {
        let mock = self.clone();
        move |cursor| {
            mock.lock().cursors.push(cursor);
            mock.call()
        }
    }
}

impl<T: Clone + Send + 'static> Default for MockFetch<T> {
    fn default() -> Self {
        Self::new()
    }
}
