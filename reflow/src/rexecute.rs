use crate::{CacheValue, FetchError, FetchResult, KeyedCache, Outcome, RetryPolicy};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type JobOperation = Arc<dyn Fn() -> BoxFuture<'static, Result<CacheValue, FetchError>> + Send + Sync>;
type TerminalFailure = Arc<dyn Fn(&FetchError) + Send + Sync>;
/// Tells a waiting caller how the job it waits on settled.
type Settlement = oneshot::Sender<Result<CacheValue, FetchError>>;

fn settle(waiters: Vec<Settlement>, result: &Result<CacheValue, FetchError>) {
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}

/// Per-submission settings for [`RexecuteQueue::submit`].
#[derive(Clone, Default)]
pub struct RexecuteOptions {
    retry: Option<RetryPolicy>,
    on_terminal_failure: Option<TerminalFailure>,
}

impl RexecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the queue's default retry policy for this submission.
    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        RexecuteOptions {
            retry: Some(retry),
            ..self
        }
    }

    /// Called once when the operation fails for good.
    pub fn with_on_terminal_failure<F>(self, on_terminal_failure: F) -> Self
    where
        F: Fn(&FetchError) + Send + Sync + 'static,
    {
        RexecuteOptions {
            on_terminal_failure: Some(Arc::new(on_terminal_failure)),
            ..self
        }
    }
}

impl fmt::Debug for RexecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RexecuteOptions")
            .field("retry", &self.retry)
            .field("on_terminal_failure", &self.on_terminal_failure.is_some())
            .finish()
    }
}

struct RetryJob {
    id: u64,
    policy: RetryPolicy,
    on_terminal_failure: Option<TerminalFailure>,
    operation: JobOperation,
}

impl RetryJob {
    fn fail(&self, key: &str, error: &FetchError) {
        warn!(key = %key, job = self.id, %error, "rexecute job failed for good");
        if let Some(on_terminal_failure) = &self.on_terminal_failure {
            on_terminal_failure(error);
        }
    }
}

struct PendingJob {
    job: Arc<RetryJob>,
    attempt: u32,
    // Callers of this job and of every job it replaced.
    waiters: Vec<Settlement>,
}

#[derive(Debug, Clone)]
struct Ticket {
    key: String,
    id: u64,
}

struct QueueInner {
    cache: KeyedCache,
    policy: RetryPolicy,
    pending: Mutex<HashMap<String, PendingJob>>,
    tickets: mpsc::UnboundedSender<Ticket>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    runtime: Handle,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingJob>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `job` as the only job for `key`. Callers of a replaced job
    /// wait on the new one.
    fn enqueue(&self, key: String, job: RetryJob, delay: Duration, waiter: Settlement) {
        let ticket = Ticket {
            key: key.clone(),
            id: job.id,
        };
        let mut waiters = vec![waiter];
        {
            let mut pending = self.lock();
            if let Some(previous) = pending.remove(&key) {
                debug!(key = %key, job = previous.job.id, "rexecute job superseded");
                waiters.extend(previous.waiters);
            }
            pending.insert(
                key,
                PendingJob {
                    job: Arc::new(job),
                    attempt: 1,
                    waiters,
                },
            );
        }
        self.schedule(ticket, delay);
    }

    fn schedule(&self, ticket: Ticket, delay: Duration) {
        let tickets = self.tickets.clone();
        let shutdown = self.shutdown.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tickets.send(ticket);
                }
            }
        });
    }

    /// Publishes a value produced outside the queue, retiring any job for
    /// the same key so it cannot overwrite it later.
    fn publish_direct(&self, key: &str, value: CacheValue) {
        let mut pending = self.lock();
        let previous = pending.remove(key);
        self.cache.put_value(key, value.clone());
        if let Some(previous) = previous {
            debug!(key = %key, job = previous.job.id, "rexecute job superseded by a direct result");
            settle(previous.waiters, &Ok(value));
        }
    }

    /// Drops the job for `key` after a newer submission failed for good.
    /// Callers still waiting on the dropped job settle with that failure.
    fn retire(&self, key: &str, error: &FetchError) {
        let previous = self.lock().remove(key);
        if let Some(previous) = previous {
            debug!(key = %key, job = previous.job.id, "rexecute job superseded by a failed submission");
            settle(previous.waiters, &Err(error.clone()));
        }
    }

    fn claim(&self, ticket: &Ticket) -> Option<(Arc<RetryJob>, u32)> {
        self.lock()
            .get(&ticket.key)
            .filter(|entry| entry.job.id == ticket.id)
            .map(|entry| (entry.job.clone(), entry.attempt))
    }

    fn complete(&self, ticket: Ticket, result: Result<CacheValue, FetchError>) {
        let mut pending = self.lock();
        let Some(current) = pending
            .get_mut(&ticket.key)
            .filter(|entry| entry.job.id == ticket.id)
        else {
            debug!(key = %ticket.key, job = ticket.id, "discarding stale rexecute completion");
            return;
        };

        match result {
            Ok(value) => {
                let Some(finished) = pending.remove(&ticket.key) else {
                    return;
                };
                // Still under the pending lock, so no newer submission can
                // publish in between and be overwritten.
                self.cache.put_value(ticket.key.clone(), value.clone());
                debug!(key = %ticket.key, job = ticket.id, "rexecute job succeeded");
                settle(finished.waiters, &Ok(value));
            }
            Err(error) if current.job.policy.should_retry(current.attempt, &error) => {
                let delay = current.job.policy.delay_for(current.attempt);
                warn!(
                    key = %ticket.key,
                    job = ticket.id,
                    attempt = current.attempt,
                    ?delay,
                    %error,
                    "rexecute job failed, retrying"
                );
                current.attempt += 1;
                drop(pending);
                self.schedule(ticket, delay);
            }
            Err(error) => {
                let Some(removed) = pending.remove(&ticket.key) else {
                    return;
                };
                drop(pending);
                removed.job.fail(&ticket.key, &error);
                settle(removed.waiters, &Err(error));
            }
        }
    }
}

async fn run_worker(inner: Arc<QueueInner>, mut tickets: mpsc::UnboundedReceiver<Ticket>) {
    loop {
        let ticket = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            ticket = tickets.recv() => match ticket {
                Some(ticket) => ticket,
                None => break,
            },
        };
        let Some((job, attempt)) = inner.claim(&ticket) else {
            debug!(key = %ticket.key, job = ticket.id, "skipping superseded rexecute job");
            continue;
        };

        debug!(key = %ticket.key, job = ticket.id, attempt, "running rexecute job");
        // A panicking operation fails its job, not the worker.
        let result = match inner.runtime.spawn((job.operation)()).await {
            Ok(result) => result,
            Err(error) => Err(FetchError::error(error.to_string())),
        };
        inner.complete(ticket, result);
    }
    info!("rexecute worker stopped");
}

/// Runs fire-and-forget operations with queued, deduplicated retries.
///
/// Each submission is attempted right away on the caller's task. A retryable
/// failure turns it into a background job keyed by the submission's key; a
/// later submission for the same key replaces that job. One worker task runs
/// background jobs one at a time and publishes successes into the shared
/// [`KeyedCache`], where memory cache sources and waiting callers pick them
/// up.
///
/// The queue lives until [`RexecuteQueue::shutdown`]; it does not follow any
/// subscription's scope.
#[derive(Clone)]
pub struct RexecuteQueue {
    inner: Arc<QueueInner>,
}

impl RexecuteQueue {
    /// Starts a queue on the current tokio runtime.
    pub fn new(cache: KeyedCache, policy: RetryPolicy) -> Self {
        Self::with_runtime(cache, policy, Handle::current())
    }

    pub fn with_runtime(cache: KeyedCache, policy: RetryPolicy, runtime: Handle) -> Self {
        let (tickets, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(QueueInner {
            cache,
            policy,
            pending: Mutex::new(HashMap::new()),
            tickets,
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            runtime,
        });
        inner.runtime.spawn(run_worker(inner.clone(), receiver));
        RexecuteQueue { inner }
    }

    pub fn cache(&self) -> &KeyedCache {
        &self.inner.cache
    }

    /// Runs `operation` now and settles its outcome, waiting on the
    /// background job when the first attempt fails with a retryable error.
    pub async fn submit<T, F, Fut, R>(
        &self,
        key: impl Into<String>,
        options: RexecuteOptions,
        operation: F,
    ) -> Outcome<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: FetchResult<T> + Send + 'static,
    {
        let key = key.into();
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Outcome::failure(FetchError::Cancelled);
        }
        let policy = options.retry.unwrap_or_else(|| inner.policy.clone());
        let operation = Arc::new(operation);

        let error = match operation().await.into_fetch_result() {
            Ok(value) => {
                inner.publish_direct(&key, Arc::new(value.clone()));
                return Outcome::success(value);
            }
            Err(error) => error,
        };

        let job = RetryJob {
            id: inner.next_id.fetch_add(1, Ordering::Relaxed),
            policy,
            on_terminal_failure: options.on_terminal_failure,
            operation: Arc::new(move || {
                let next = operation();
                async move {
                    next.await
                        .into_fetch_result()
                        .map(|value| Arc::new(value) as CacheValue)
                }
                .boxed()
            }),
        };

        if !job.policy.should_retry(0, &error) {
            inner.retire(&key, &error);
            job.fail(&key, &error);
            return Outcome::failure(error);
        }

        let (settled, settlement) = oneshot::channel();
        let delay = job.policy.delay_for(0);
        debug!(key = %key, job = job.id, ?delay, %error, "queueing rexecute job");
        inner.enqueue(key.clone(), job, delay, settled);

        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => Outcome::failure(FetchError::Cancelled),
            settled = settlement => match settled {
                Ok(Ok(value)) => match value.downcast_ref::<T>() {
                    Some(value) => Outcome::success(value.clone()),
                    None => {
                        warn!(key = %key, "rexecute result has an unexpected type");
                        Outcome::failure(FetchError::error("rexecute result has an unexpected type"))
                    }
                },
                Ok(Err(error)) => Outcome::failure(error),
                Err(_) => Outcome::failure(FetchError::Cancelled),
            },
        }
    }

    /// [`RexecuteQueue::submit`] as a stream: `Loading`, then the settled
    /// outcome.
    pub fn rexecute<T, F, Fut, R>(
        &self,
        key: impl Into<String>,
        options: RexecuteOptions,
        operation: F,
    ) -> BoxStream<'static, Outcome<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: FetchResult<T> + Send + 'static,
    {
        let queue = self.clone();
        let key = key.into();
        stream::once(futures::future::ready(Outcome::Loading))
            .chain(stream::once(async move {
                queue.submit(key, options, operation).await
            }))
            .boxed()
    }

    /// Keys with a job pending or waiting out a retry delay.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Stops the worker and drops every pending job. Callers still waiting
    /// on a job observe [`FetchError::Cancelled`].
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let dropped = {
            let mut pending = self.inner.lock();
            let dropped = pending.len();
            pending.clear();
            dropped
        };
        info!(dropped, "rexecute queue shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl fmt::Debug for RexecuteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RexecuteQueue")
            .field("pending", &self.pending_len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
