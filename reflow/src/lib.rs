mod cache_source;
mod fetch_error;
mod fetch_result;
mod keyed_cache;
mod options;
mod outcome;
mod page;
mod paginated;
mod state_engine;
mod retry;
mod rexecute;
mod stream_ext;
mod subscription;
pub mod mock;

pub use cache_source::*;
pub use fetch_error::*;
pub use fetch_result::FetchResult;
pub use keyed_cache::{CacheValue, KeyedCache, DEFAULT_CACHE_CAPACITY};
pub use options::*;
pub use outcome::*;
pub use page::*;
pub use paginated::*;
pub use state_engine::*;
pub use retry::*;
pub use rexecute::*;
pub use stream_ext::*;
pub use subscription::ObserverGuard;

#[cfg(test)]
mod unit_tests;

/// Values a subscription can carry.
pub trait Payload: Clone + PartialEq + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + PartialEq + Send + Sync + 'static {}
