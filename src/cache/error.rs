//! Cache error types

use thiserror::Error;

/// Errors raised by cache backends and the value codec.
///
/// Backend errors never fail a request: the result cache logs them and
/// treats the lookup as a miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Networked backend unreachable or returned an error
    #[error("Cache backend '{backend}' unavailable: {reason}")]
    Unavailable { backend: &'static str, reason: String },

    /// Value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Cache compression error: {0}")]
    Compression(String),

    /// The shared build ended without publishing a result (it panicked)
    #[error("Cache build for {0} ended without a result")]
    Abandoned(String),

    /// The engine is shutting down; in-flight waiters receive this
    #[error("Cache is shutting down")]
    Shutdown,
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable {
            backend: "redis",
            reason: err.to_string(),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
