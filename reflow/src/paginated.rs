use crate::fetch_result::attempt;
use crate::subscription::{drain, Epoch, Lifecycle};
use crate::{
    CacheSource, FetchError, IntoPage, Observed, Outcome, Page, PageCursor, PaginatedOutcome,
    Payload, ReflowOptions, RetryPolicy,
};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use futures::FutureExt;
use futures_signals::signal::{Mutable, MutableSignalCloned, SignalExt, SignalStream};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type PageFetcher<T> =
    Arc<dyn Fn(PageCursor) -> BoxFuture<'static, Result<Page<T>, FetchError>> + Send + Sync>;

/// Items and cursor of one cycle. Guarded by a lock held only while a page
/// is folded in, never across a fetch.
struct Accumulator<T> {
    items: Vec<T>,
    cursor: PageCursor,
    has_more_pages: bool,
    pages_loaded: usize,
}

impl<T: Clone> Accumulator<T> {
    fn new(cursor: PageCursor) -> Self {
        Accumulator {
            items: Vec::new(),
            cursor,
            has_more_pages: true,
            pages_loaded: 0,
        }
    }

    fn snapshot(&self, is_loading_more: bool) -> PaginatedOutcome<T> {
        PaginatedOutcome::new(self.items.clone(), is_loading_more, self.has_more_pages)
    }

    /// Appends a page fetched at `requested` and moves the cursor on.
    fn fold(&mut self, requested: &PageCursor, page: Page<T>) {
        let received = page.items.len();
        self.items.extend(page.items);
        self.pages_loaded += 1;
        if received < requested.page_size() {
            self.has_more_pages = false;
        } else {
            self.cursor = page.next.unwrap_or_else(|| requested.advance());
        }
    }
}

fn lock<T>(accumulator: &Mutex<Accumulator<T>>) -> MutexGuard<'_, Accumulator<T>> {
    accumulator.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PageEngine<T> {
    state: Mutable<Outcome<PaginatedOutcome<T>>>,
    epoch: Epoch,
    refresh: Notify,
    load_more: Notify,
    has_more_pages: AtomicBool,
    is_loading_more: AtomicBool,
    first_cursor: PageCursor,
    fetcher: PageFetcher<T>,
    initial_is_loading: bool,
    should_loading_on_refresh: bool,
    cache_source: Option<CacheSource<Vec<T>>>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    runtime: Handle,
}

impl<T: Payload> PageEngine<T> {
    fn emit(&self, generation: u64, outcome: Outcome<PaginatedOutcome<T>>) -> bool {
        self.epoch.publish_if_current(generation, || {
            match &outcome {
                Outcome::Success { value } => {
                    self.has_more_pages
                        .store(value.has_more_pages, Ordering::Release);
                    self.is_loading_more
                        .store(value.is_loading_more, Ordering::Release);
                }
                _ => self.is_loading_more.store(false, Ordering::Release),
            }
            self.state.set_neq(outcome);
        })
    }

    fn persist(&self, items: Vec<T>) {
        let Some(source) = self.cache_source.clone() else {
            return;
        };
        self.runtime.spawn(async move {
            if let Err(error) = source.store(items).await {
                warn!(key = source.key(), %error, "failed to persist accumulated pages");
            }
        });
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<Page<T>, FetchError> {
        self.retry
            .run(|_| attempt(self.timeout, (self.fetcher)(cursor.clone())))
            .await
    }
}

async fn drive<T: Payload>(engine: Arc<PageEngine<T>>, stop: CancellationToken, restart: bool) {
    drain(&engine.refresh);
    let mut first = !restart;
    loop {
        let generation = engine.epoch.advance();
        let cycle = stop.child_token();
        debug!(generation, first, "paginated cycle started");
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
                if engine.epoch.retire(generation) {
                    engine.is_loading_more.store(false, Ordering::Release);
                }
                debug!(generation, "paginated reflow stopped");
                return;
            }
            _ = engine.refresh.notified() => {
                cycle.cancel();
                debug!(generation, "paginated cycle superseded by refresh");
            }
        }
    }
}

async fn run_cycle<T: Payload>(
    engine: Arc<PageEngine<T>>,
    generation: u64,
    first: bool,
    token: CancellationToken,
) {
    // A load-more aimed at the previous cycle's pages does not carry over.
    drain(&engine.load_more);
    engine.has_more_pages.store(true, Ordering::Release);
    engine.is_loading_more.store(false, Ordering::Release);

    let show_loading = if first {
        engine.initial_is_loading
    } else {
        engine.should_loading_on_refresh
    };
    if show_loading {
        engine.emit(generation, Outcome::Loading);
    }

    let accumulator = Arc::new(Mutex::new(Accumulator::new(engine.first_cursor.clone())));
    if let Some(source) = &engine.cache_source {
        engine.runtime.spawn(seed_from_cache(
            engine.clone(),
            source.observe(),
            accumulator.clone(),
            generation,
            token.clone(),
        ));
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => {}
        _ = serve_pages(&engine, &accumulator, generation) => {}
    }
}

/// Loads the first page, then one page per load-more request, in order.
async fn serve_pages<T: Payload>(
    engine: &PageEngine<T>,
    accumulator: &Mutex<Accumulator<T>>,
    generation: u64,
) {
    load_page(engine, accumulator, generation).await;
    loop {
        engine.load_more.notified().await;
        if !lock(accumulator).has_more_pages {
            debug!(generation, "load more ignored, no more pages");
            continue;
        }
        load_page(engine, accumulator, generation).await;
    }
}

async fn load_page<T: Payload>(
    engine: &PageEngine<T>,
    accumulator: &Mutex<Accumulator<T>>,
    generation: u64,
) {
    let cursor = {
        let pages = lock(accumulator);
        let retrying_first_page = engine.state.lock_ref().is_failure();
        if pages.pages_loaded > 0 {
            engine.emit(generation, Outcome::success(pages.snapshot(true)));
        } else if retrying_first_page {
            engine.emit(generation, Outcome::Loading);
        }
        pages.cursor.clone()
    };

    debug!(generation, ?cursor, "fetching page");
    match engine.fetch_page(&cursor).await {
        Ok(page) => {
            let items = {
                let mut pages = lock(accumulator);
                pages.fold(&cursor, page);
                engine.emit(generation, Outcome::success(pages.snapshot(false)));
                pages.items.clone()
            };
            engine.persist(items);
        }
        Err(error) => {
            warn!(generation, ?cursor, %error, "page fetch failed");
            engine.emit(generation, Outcome::failure(error));
        }
    }
}

/// Shows cached items until the first page of the cycle lands.
async fn seed_from_cache<T: Payload>(
    engine: Arc<PageEngine<T>>,
    mut cached: BoxStream<'static, Option<Vec<T>>>,
    accumulator: Arc<Mutex<Accumulator<T>>>,
    generation: u64,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            next = cached.next() => next,
        };
        let Some(value) = next else {
            return;
        };
        {
            let pages = lock(&accumulator);
            if pages.pages_loaded > 0 {
                debug!(generation, "first page landed, cache seeding finished");
                return;
            }
            if let Some(items) = value {
                engine.emit(
                    generation,
                    Outcome::success(PaginatedOutcome::new(items, false, true)),
                );
            }
        }
    }
}

/// A subscription over a paged data source: pages accumulate into one
/// [`PaginatedOutcome`] until a refresh starts over from the first cursor.
///
/// Lifecycle and refresh semantics match [`Reflow`](crate::Reflow).
pub struct PaginatedReflow<T: Payload> {
    engine: Arc<PageEngine<T>>,
    lifecycle: Arc<Lifecycle>,
}

impl<T: Payload> PaginatedReflow<T> {
    /// `first_cursor` is where every cycle starts. The options' `initial`
    /// and `cache_source` speak in whole item lists.
    pub fn new<F, Fut, R>(first_cursor: PageCursor, options: ReflowOptions<Vec<T>>, fetch: F) -> Self
    where
        F: Fn(PageCursor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoPage<T> + 'static,
    {
        let fetcher: PageFetcher<T> = Arc::new(move |cursor| {
            fetch(cursor)
                .map(<R as IntoPage<T>>::into_page)
                .boxed()
        });

        let runtime = options.runtime_handle();
        let scope = options.scope_token();
        let initial = options
            .initial
            .map(|items| PaginatedOutcome::new(items, false, true));
        let engine = Arc::new(PageEngine {
            initial_is_loading: initial.is_loading(),
            state: Mutable::new(initial),
            epoch: Epoch::default(),
            refresh: Notify::new(),
            load_more: Notify::new(),
            has_more_pages: AtomicBool::new(true),
            is_loading_more: AtomicBool::new(false),
            first_cursor,
            fetcher,
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

        PaginatedReflow { engine, lifecycle }
    }

    /// Starts over from the first cursor with an empty item list.
    pub fn refresh(&self) {
        debug!("paginated refresh requested");
        self.engine.refresh.notify_one();
    }

    /// Requests the next page. Does nothing once the source ran out of
    /// pages; requests made while a page is loading collapse into one.
    pub fn load_more(&self) {
        if !self.has_more_pages() {
            debug!("load more ignored, no more pages");
            return;
        }
        self.engine.load_more.notify_one();
    }

    pub fn has_more_pages(&self) -> bool {
        self.engine.has_more_pages.load(Ordering::Acquire)
    }

    pub fn is_loading_more(&self) -> bool {
        self.engine.is_loading_more.load(Ordering::Acquire)
    }

    pub fn current_state(&self) -> Outcome<PaginatedOutcome<T>> {
        self.engine.state.get_cloned()
    }

    pub fn to_signal(&self) -> Observed<MutableSignalCloned<Outcome<PaginatedOutcome<T>>>> {
        let guard = self.lifecycle.attach();
        Observed::new(self.engine.state.signal_cloned(), guard)
    }

    pub fn to_stream(
        &self,
    ) -> Observed<SignalStream<MutableSignalCloned<Outcome<PaginatedOutcome<T>>>>> {
        let guard = self.lifecycle.attach();
        Observed::new(self.engine.state.signal_cloned().to_stream(), guard)
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn observer_count(&self) -> usize {
        self.lifecycle.observers()
    }

    pub fn close(&self) {
        self.lifecycle.close();
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }
}

/// Dropping the subscription ends its scope; open streams keep the last state.
impl<T: Payload> Drop for PaginatedReflow<T> {
    fn drop(&mut self) {
        self.lifecycle.close();
    }
}

impl<T: Payload + fmt::Debug> fmt::Debug for PaginatedReflow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginatedReflow")
            .field("state", &self.current_state())
            .field("has_more_pages", &self.has_more_pages())
            .finish()
    }
}
