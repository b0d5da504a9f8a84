use crate::{FetchError, KeyedCache};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use futures::FutureExt;
use futures_signals::signal::{Mutable, SignalExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

#[cfg(feature = "serde")]
use std::marker::PhantomData;

/// A byte-oriented key/value store that survives the process.
///
/// The engine only needs two things from it: a write, and a stream that
/// emits the current bytes for a key (or `None`) followed by every change.
pub trait PersistentStore: Send + Sync + 'static {
    fn write(&self, key: &str, bytes: Vec<u8>) -> BoxFuture<'static, Result<(), FetchError>>;

    fn observe(&self, key: &str) -> BoxStream<'static, Option<Vec<u8>>>;
}

/// Turns values into bytes for a [`PersistentStore`] and back.
pub trait Codec<T>: Send + Sync + 'static {
    fn encode(&self, value: &T) -> Result<Vec<u8>, FetchError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, FetchError>;
}

/// JSON encoding through `serde_json`.
#[cfg(feature = "serde")]
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

#[cfg(feature = "serde")]
impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        JsonCodec(PhantomData)
    }
}

#[cfg(feature = "serde")]
impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "serde")]
impl<T> Codec<T> for JsonCodec<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, FetchError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// An in-process [`PersistentStore`], for tests and for wiring a durable
/// source before a real backend exists.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<String, Mutable<Option<Vec<u8>>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Mutable<Option<Vec<u8>>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| Mutable::new(None))
            .clone()
    }

    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.slot(key).get_cloned()
    }
}

impl PersistentStore for MemoryStore {
    fn write(&self, key: &str, bytes: Vec<u8>) -> BoxFuture<'static, Result<(), FetchError>> {
        self.slot(key).set(Some(bytes));
        futures::future::ready(Ok(())).boxed()
    }

    fn observe(&self, key: &str) -> BoxStream<'static, Option<Vec<u8>>> {
        self.slot(key).signal_cloned().to_stream().boxed()
    }
}

/// Where a subscription reads cached values from and writes fetched ones to.
pub enum CacheSource<T> {
    /// Backed by a [`KeyedCache`] entry only.
    Memory { cache: KeyedCache, key: String },
    /// Backed by a [`KeyedCache`] entry plus an encoded copy in a
    /// [`PersistentStore`]. Reads come from the store.
    Durable {
        cache: KeyedCache,
        store: Arc<dyn PersistentStore>,
        codec: Arc<dyn Codec<T>>,
        key: String,
    },
}

impl<T> CacheSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn memory(cache: KeyedCache, key: impl Into<String>) -> Self {
        CacheSource::Memory {
            cache,
            key: key.into(),
        }
    }

    pub fn durable<S, C>(cache: KeyedCache, store: S, codec: C, key: impl Into<String>) -> Self
    where
        S: PersistentStore,
        C: Codec<T>,
    {
        CacheSource::Durable {
            cache,
            store: Arc::new(store),
            codec: Arc::new(codec),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            CacheSource::Memory { key, .. } | CacheSource::Durable { key, .. } => key,
        }
    }

    /// The value currently held in memory, without waiting on the store.
    pub fn peek(&self) -> Option<T> {
        match self {
            CacheSource::Memory { cache, key } | CacheSource::Durable { cache, key, .. } => {
                cache.get(key)
            }
        }
    }

    /// The current cached value (or `None`) followed by every change.
    pub fn observe(&self) -> BoxStream<'static, Option<T>> {
        match self {
            CacheSource::Memory { cache, key } => cache.observe(key).boxed(),
            CacheSource::Durable {
                store, codec, key, ..
            } => {
                let codec = codec.clone();
                let key = key.clone();
                store
                    .observe(&key)
                    .map(move |bytes| {
                        let bytes = bytes?;
                        match codec.decode(&bytes) {
                            Ok(value) => Some(value),
                            Err(error) => {
                                warn!(key = %key, %error, "discarding undecodable cache payload");
                                None
                            }
                        }
                    })
                    .boxed()
            }
        }
    }

    /// Writes `value` through every layer of the source.
    pub fn store(&self, value: T) -> BoxFuture<'static, Result<(), FetchError>> {
        match self {
            CacheSource::Memory { cache, key } => {
                cache.put(key.clone(), value);
                futures::future::ready(Ok(())).boxed()
            }
            CacheSource::Durable {
                cache,
                store,
                codec,
                key,
            } => {
                let encoded = codec.encode(&value);
                cache.put(key.clone(), value);
                match encoded {
                    Ok(bytes) => store.write(key, bytes),
                    Err(error) => futures::future::ready(Err(error)).boxed(),
                }
            }
        }
    }
}

impl<T> Clone for CacheSource<T> {
    fn clone(&self) -> Self {
        match self {
            CacheSource::Memory { cache, key } => CacheSource::Memory {
                cache: cache.clone(),
                key: key.clone(),
            },
            CacheSource::Durable {
                cache,
                store,
                codec,
                key,
            } => CacheSource::Durable {
                cache: cache.clone(),
                store: store.clone(),
                codec: codec.clone(),
                key: key.clone(),
            },
        }
    }
}

impl<T> fmt::Debug for CacheSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSource::Memory { key, .. } => f.debug_struct("Memory").field("key", key).finish(),
            CacheSource::Durable { key, .. } => {
                f.debug_struct("Durable").field("key", key).finish()
            }
        }
    }
}
