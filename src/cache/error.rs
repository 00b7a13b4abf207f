use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of the pending-receipt snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Snapshots are keyed by payment reference, so one is required.
    #[error("snapshot reference is empty or malformed: {0:?}")]
    InvalidReference(String),

    #[error("snapshot TTL of {0:?} cannot be represented")]
    TtlOutOfRange(Duration),

    #[error("failed to encode receipt snapshot: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("receipt store file {} is not accessible: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("receipt store unavailable: {0}")]
    Unavailable(String),

    #[error("the {backend} receipt store needs the `{feature}` feature")]
    NotCompiled {
        backend: &'static str,
        feature: &'static str,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(feature = "cache")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

#[cfg(feature = "cache")]
impl From<bb8::RunError<redis::RedisError>> for StoreError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        StoreError::Unavailable(format!("connection pool: {}", err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
