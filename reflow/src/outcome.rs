use crate::FetchError;

/// The observable state of a fetch: exactly one of loading, a value, or an error.
#[derive(Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Outcome<T> {
    Loading,
    Success { value: T },
    Failure { error: FetchError },
}

impl<T> Outcome<T> {
    pub fn loading() -> Self {
        Outcome::Loading
    }

    pub fn success(value: T) -> Self {
        Outcome::Success { value }
    }

    pub fn failure(error: FetchError) -> Self {
        Outcome::Failure { error }
    }

    pub fn failure_with_message(message: impl Into<String>) -> Self {
        Outcome::Failure {
            error: FetchError::Error(message.into()),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Outcome::Loading)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }

    /// True once a cycle settled, either way.
    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Success { .. } | Outcome::Failure { .. })
    }

    pub fn value_ref(&self) -> Option<&T> {
        match self {
            Outcome::Success { value } => Some(value),
            _ => None,
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Success { value } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Outcome::Failure { error } => Some(error),
            _ => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Loading => Outcome::Loading,
            Outcome::Success { value } => Outcome::Success { value: f(value) },
            Outcome::Failure { error } => Outcome::Failure { error },
        }
    }

    pub fn as_ref(&self) -> Outcome<&T> {
        match self {
            Outcome::Loading => Outcome::Loading,
            Outcome::Success { value } => Outcome::Success { value },
            Outcome::Failure { error } => Outcome::Failure {
                error: error.clone(),
            },
        }
    }
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Outcome::Loading
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T>
where
    E: Into<FetchError>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success { value },
            Err(error) => Outcome::Failure {
                error: error.into(),
            },
        }
    }
}
