use crate::{FetchError, Outcome};
use std::future::Future;
use std::time::Duration;

/// Anything a fetch function may resolve to.
///
/// Fetch functions return either `Result<T, E>` with an error convertible into
/// [`FetchError`], or `Option<T>` where `None` becomes [`FetchError::None`].
pub trait FetchResult<T> {
    fn into_fetch_result(self) -> Result<T, FetchError>;

    fn into_outcome(self) -> Outcome<T>
    where
        Self: Sized,
    {
        self.into_fetch_result().into()
    }
}

impl<T, E> FetchResult<T> for Result<T, E>
where
    E: Into<FetchError>,
{
    fn into_fetch_result(self) -> Result<T, FetchError> {
        self.map_err(Into::into)
    }
}

impl<T> FetchResult<T> for Option<T> {
    fn into_fetch_result(self) -> Result<T, FetchError> {
        self.ok_or(FetchError::None)
    }
}

/// Awaits one fetch attempt, bounded by `timeout` when one is set.
pub(crate) async fn attempt<F, T>(timeout: Option<Duration>, fetch: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fetch).await?,
        None => fetch.await,
    }
}
