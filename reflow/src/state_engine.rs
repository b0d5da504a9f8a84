use crate::fetch_result::attempt;
use crate::subscription::{drain, Epoch, Lifecycle};
use crate::{
    CacheSource, FetchError, FetchResult, Observed, Outcome, Payload, ReflowOptions, RetryPolicy,
};
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use futures_signals::signal::{Mutable, MutableSignalCloned, SignalExt, SignalStream};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type StreamFetcher<T> = Arc<dyn Fn() -> BoxStream<'static, Result<T, FetchError>> + Send + Sync>;

struct Engine<T> {
    state: Mutable<Outcome<T>>,
    epoch: Epoch,
    refresh: Notify,
    fetcher: StreamFetcher<T>,
    initial_is_loading: bool,
    should_loading_on_refresh: bool,
    cache_source: Option<CacheSource<T>>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    runtime: Handle,
}

impl<T: Payload> Engine<T> {
    fn emit(&self, generation: u64, outcome: Outcome<T>) -> bool {
        self.epoch.publish_if_current(generation, || {
            self.state.set_neq(outcome);
        })
    }

    fn persist(&self, value: T) {
        let Some(source) = self.cache_source.clone() else {
            return;
        };
        self.runtime.spawn(async move {
            if let Err(error) = source.store(value).await {
                warn!(key = source.key(), %error, "failed to persist fetched value");
            }
        });
    }
}

async fn drive<T: Payload>(engine: Arc<Engine<T>>, stop: CancellationToken, restart: bool) {
    // The launch itself is the pending refresh.
    drain(&engine.refresh);
    let mut first = !restart;
    loop {
        let generation = engine.epoch.advance();
        let cycle = stop.child_token();
        debug!(generation, first, "reflow cycle started");
        engine.runtime.spawn(run_cycle(
            engine.clone(),
            generation,
            first,
            cycle.clone(),
        ));
        first = false;

        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                cycle.cancel();
                engine.epoch.retire(generation);
                debug!(generation, "reflow stopped");
                return;
            }
            _ = engine.refresh.notified() => {
                cycle.cancel();
                debug!(generation, "reflow cycle superseded by refresh");
            }
        }
    }
}

async fn run_cycle<T: Payload>(
    engine: Arc<Engine<T>>,
    generation: u64,
    first: bool,
    token: CancellationToken,
) {
    let show_loading = if first {
        engine.initial_is_loading
    } else {
        engine.should_loading_on_refresh
    };
    if show_loading {
        engine.emit(generation, Outcome::Loading);
    }

    let fetched = Arc::new(AtomicBool::new(false));
    if let Some(source) = &engine.cache_source {
        engine.runtime.spawn(watch_cache(
            engine.clone(),
            source.observe(),
            generation,
            show_loading,
            fetched.clone(),
            token.clone(),
        ));
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => {}
        _ = fetch_with_retry(&engine, generation, &fetched) => {}
    }
}

async fn watch_cache<T: Payload>(
    engine: Arc<Engine<T>>,
    mut cached: BoxStream<'static, Option<T>>,
    generation: u64,
    show_loading: bool,
    fetched: Arc<AtomicBool>,
    token: CancellationToken,
) {
    let mut seeded = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            next = cached.next() => next,
        };
        let Some(value) = next else {
            return;
        };
        let seed = !seeded;
        seeded = true;
        let fetched = fetched.load(Ordering::Acquire);
        match value {
            // The first read of a cycle is older than a network result that
            // already landed; later cache writes are newer and go through.
            Some(_) if seed && fetched => {
                debug!(generation, "dropping cache seed that arrived after the network result");
            }
            Some(value) => {
                engine.emit(generation, Outcome::success(value));
            }
            None if show_loading && !fetched => {
                engine.emit(generation, Outcome::Loading);
            }
            None => {}
        }
    }
}

async fn fetch_with_retry<T: Payload>(engine: &Engine<T>, generation: u64, fetched: &AtomicBool) {
    let mut retries = 0;
    loop {
        let mut values = (engine.fetcher)();
        let error = loop {
            match attempt(engine.timeout, next_value(&mut values)).await {
                Ok(Some(value)) => {
                    fetched.store(true, Ordering::Release);
                    if engine.emit(generation, Outcome::success(value.clone())) {
                        engine.persist(value);
                    }
                }
                Ok(None) => return,
                Err(error) => break error,
            }
        };

        if engine.retry.should_retry(retries, &error) {
            let delay = engine.retry.delay_for(retries);
            warn!(generation, attempt = retries, ?delay, %error, "fetch failed, retrying");
            tokio::time::sleep(delay).await;
            retries += 1;
        } else {
            warn!(generation, attempt = retries, %error, "fetch failed");
            engine.emit(generation, Outcome::failure(error));
            return;
        }
    }
}

async fn next_value<T>(
    values: &mut BoxStream<'static, Result<T, FetchError>>,
) -> Result<Option<T>, FetchError> {
    values.next().await.transpose()
}

/// A subscription that turns a fetch function into an observable
/// [`Outcome`] with retry, caching and refresh.
///
/// Nothing runs until the first observer arrives through [`Reflow::to_stream`]
/// or [`Reflow::to_signal`]. Every refresh, including the implicit first one,
/// starts a new fetch cycle and retires the previous cycle. When the last
/// observer goes away the running cycle is cancelled; the latest state stays
/// readable and a returning observer starts a fresh cycle.
///
/// Must be created inside a tokio runtime unless
/// [`ReflowOptions::with_runtime`] names one.
pub struct Reflow<T: Payload> {
    engine: Arc<Engine<T>>,
    lifecycle: Arc<Lifecycle>,
}

impl<T: Payload> Reflow<T> {
    /// Wraps a fetch function resolving to a single value per call.
    pub fn new<F, Fut, R>(options: ReflowOptions<T>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: FetchResult<T> + 'static,
    {
        let fetcher: StreamFetcher<T> = Arc::new(move || {
            fetch()
                .map(<R as FetchResult<T>>::into_fetch_result)
                .into_stream()
                .boxed()
        });
        Self::with_fetcher(options, fetcher)
    }

    /// Wraps a fetch function producing a stream of values per call. Each
    /// item becomes a `Success`; an error restarts the stream under the
    /// retry policy.
    pub fn from_stream<F, S, R>(options: ReflowOptions<T>, fetch: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = R> + Send + 'static,
        R: FetchResult<T> + 'static,
    {
        let fetcher: StreamFetcher<T> = Arc::new(move || {
            fetch()
                .map(<R as FetchResult<T>>::into_fetch_result)
                .boxed()
        });
        Self::with_fetcher(options, fetcher)
    }

    fn with_fetcher(options: ReflowOptions<T>, fetcher: StreamFetcher<T>) -> Self {
        let runtime = options.runtime_handle();
        let scope = options.scope_token();
        let engine = Arc::new(Engine {
            state: Mutable::new(options.initial.clone()),
            epoch: Epoch::default(),
            refresh: Notify::new(),
            fetcher,
            initial_is_loading: options.initial.is_loading(),
            should_loading_on_refresh: options.should_loading_on_refresh,
            cache_source: options.cache_source,
            retry: options.retry,
            timeout: options.timeout,
            runtime,
        });

        let launched = engine.clone();
        let lifecycle = Lifecycle::new(
            scope,
            Box::new(move |stop, restart| {
                launched
                    .runtime
                    .spawn(drive(launched.clone(), stop, restart));
            }),
        );

        Reflow { engine, lifecycle }
    }

    /// Requests a new fetch cycle. Requests made before the engine picks the
    /// previous one up collapse into one.
    pub fn refresh(&self) {
        debug!("reflow refresh requested");
        self.engine.refresh.notify_one();
    }

    pub fn current_state(&self) -> Outcome<T> {
        self.engine.state.get_cloned()
    }

    pub fn to_signal(&self) -> Observed<MutableSignalCloned<Outcome<T>>> {
        let guard = self.lifecycle.attach();
        Observed::new(self.engine.state.signal_cloned(), guard)
    }

    /// The latest state followed by every change.
    pub fn to_stream(&self) -> Observed<SignalStream<MutableSignalCloned<Outcome<T>>>> {
        let guard = self.lifecycle.attach();
        Observed::new(self.engine.state.signal_cloned().to_stream(), guard)
    }

    /// True while an engine is running on behalf of observers.
    pub fn is_active(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn observer_count(&self) -> usize {
        self.lifecycle.observers()
    }

    /// Ends the subscription's scope. Existing streams keep the last state
    /// and no further cycles run.
    pub fn close(&self) {
        self.lifecycle.close();
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }
}

/// Dropping the subscription ends its scope; open streams keep the last state.
impl<T: Payload> Drop for Reflow<T> {
    fn drop(&mut self) {
        self.lifecycle.close();
    }
}

impl<T: Payload + fmt::Debug> fmt::Debug for Reflow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reflow")
            .field("state", &self.current_state())
            .field("active", &self.is_active())
            .finish()
    }
}
