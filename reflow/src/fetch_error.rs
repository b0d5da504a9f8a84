use thiserror::Error;

/// Errors surfaced through [`Outcome::Failure`](crate::Outcome).
///
/// The variants split into two classes that drive the retry machinery:
/// transient errors ([`FetchError::Io`] and [`FetchError::Timeout`]) are
/// retried by the default [`RetryPolicy`](crate::RetryPolicy) predicate, every
/// other variant is terminal on first sight.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FetchError {
    /// A general, non-retryable error with a message.
    #[error("{0}")]
    Error(String),

    /// A transport or I/O failure. Retryable by default.
    #[error("i/o error: {0}")]
    Io(String),

    /// The fetch did not finish within the configured timeout. Retryable by default.
    #[error("deadline has elapsed!")]
    Timeout,

    /// The fetch returned nothing where a value was expected.
    #[error("Operation returned None!")]
    None,

    /// The operation was cancelled before completion.
    #[error("Task was cancelled!")]
    Cancelled,

    /// A cache payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl FetchError {
    pub fn error(message: impl Into<String>) -> Self {
        FetchError::Error(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        FetchError::Io(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        FetchError::Codec(message.into())
    }

    /// Returns true for the errors the default retry predicate accepts.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Io(_) | FetchError::Timeout)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FetchError::Error(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, FetchError::Io(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, FetchError::None)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout)
    }

    pub fn is_codec(&self) -> bool {
        matches!(self, FetchError::Codec(_))
    }
}

impl From<std::io::Error> for FetchError {
    fn from(error: std::io::Error) -> Self {
        FetchError::Io(error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for FetchError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FetchError::Timeout
    }
}

impl From<String> for FetchError {
    fn from(message: String) -> Self {
        FetchError::Error(message)
    }
}

impl From<&str> for FetchError {
    fn from(message: &str) -> Self {
        FetchError::Error(message.to_string())
    }
}

#[cfg(feature = "serde")]
impl From<serde_json::Error> for FetchError {
    fn from(error: serde_json::Error) -> Self {
        FetchError::Codec(error.to_string())
    }
}
