use futures::stream::{Stream, StreamExt};
use futures_signals::signal::{Mutable, SignalExt};
use lru::LruCache;
use pin_project::pin_project;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// A type-erased cached value.
pub type CacheValue = Arc<dyn Any + Send + Sync>;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

type Watcher = Arc<Mutable<Option<CacheValue>>>;

fn clamp(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

struct LruState {
    entries: LruCache<String, CacheValue>,
    // Only the map's own handle left means nobody observes the key.
    watchers: HashMap<String, Watcher>,
}

impl LruState {
    fn notify(&self, key: &str, entry: Option<CacheValue>) {
        if let Some(watcher) = self.watchers.get(key) {
            watcher.set(entry);
        }
    }

    fn evicted(&self, key: &str) {
        debug!(key = %key, "keyed cache evicted least recently used entry");
        self.notify(key, None);
    }

    fn prune_watchers(&mut self) {
        self.watchers
            .retain(|_, watcher| Arc::strong_count(watcher) > 1);
    }
}

/// A change stream that keeps its key's watcher registered while alive.
#[pin_project]
struct Watch<S> {
    #[pin]
    inner: S,
    _watcher: Watcher,
}

impl<S: Stream> Stream for Watch<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// A bounded, least-recently-used, string-keyed cache shared between
/// subscriptions and the rexecute queue.
///
/// Values are stored type-erased; typed reads downcast and clone. Every
/// `put` for a key wakes the observers of that key. Cloning the cache clones
/// a handle to the same storage.
#[derive(Clone)]
pub struct KeyedCache {
    inner: Arc<Mutex<LruState>>,
}

impl KeyedCache {
    /// Creates a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        KeyedCache {
            inner: Arc::new(Mutex::new(LruState {
                entries: LruCache::new(clamp(capacity)),
                watchers: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads a value and marks it as most recently used.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match value.downcast_ref::<T>() {
            Some(value) => Some(value.clone()),
            None => {
                warn!(key = %key, "keyed cache entry has an unexpected type");
                None
            }
        }
    }

    pub fn get_value(&self, key: &str) -> Option<CacheValue> {
        self.lock().entries.get(key).cloned()
    }

    pub fn put<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.put_value(key, Arc::new(value));
    }

    /// Stores a type-erased value, evicting the least recently used entry
    /// when full.
    pub fn put_value(&self, key: impl Into<String>, value: CacheValue) {
        let key = key.into();
        let mut state = self.lock();
        // `push` hands back either the old value for `key` or the evicted entry.
        let displaced = state.entries.push(key.clone(), value.clone());
        state.notify(&key, Some(value));
        if let Some((evicted, _)) = displaced.filter(|(displaced, _)| *displaced != key) {
            state.evicted(&evicted);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.lock();
        match state.entries.pop(key) {
            Some(_) => {
                state.notify(key, None);
                true
            }
            None => false,
        }
    }

    /// Checks presence without touching the access order.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }

    /// Changes the capacity, evicting immediately when shrinking.
    pub fn resize(&self, capacity: usize) {
        let capacity = clamp(capacity);
        let mut state = self.lock();
        while state.entries.len() > capacity.get() {
            let Some((evicted, _)) = state.entries.pop_lru() else {
                break;
            };
            state.evicted(&evicted);
        }
        state.entries.resize(capacity);
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        for watcher in state.watchers.values() {
            watcher.set(None);
        }
        state.prune_watchers();
    }

    /// Keys with a registered watcher, live or awaiting pruning.
    pub(crate) fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    fn watcher(&self, key: &str) -> Watcher {
        let mut state = self.lock();
        state.prune_watchers();
        let current = state.entries.peek(key).cloned();
        state
            .watchers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutable::new(current)))
            .clone()
    }

    fn watch(&self, key: &str) -> Watch<impl Stream<Item = Option<CacheValue>>> {
        let watcher = self.watcher(key);
        Watch {
            inner: watcher.signal_cloned().to_stream(),
            _watcher: watcher,
        }
    }

    /// Emits the current value (or `None`) and then every change for `key`.
    ///
    /// Intermediate values may be skipped if the observer falls behind; the
    /// latest value is always delivered.
    pub fn observe<T>(&self, key: &str) -> impl Stream<Item = Option<T>> + Send + 'static
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = key.to_string();
        self.watch(&key).map(move |entry| {
            entry.and_then(|entry| match entry.downcast_ref::<T>() {
                Some(value) => Some(value.clone()),
                None => {
                    warn!(key = %key, "keyed cache observer saw an unexpected type");
                    None
                }
            })
        })
    }
}

impl Default for KeyedCache {
    fn default() -> Self {
        KeyedCache::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl fmt::Debug for KeyedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("KeyedCache")
            .field("len", &state.entries.len())
            .field("capacity", &state.entries.cap())
            .finish()
    }
}
