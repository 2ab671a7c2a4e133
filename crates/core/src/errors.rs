//! Error types shared across the campusplan crates.

use thiserror::Error;

/// Result type alias for campusplan operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the key-value storage adapter.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The platform storage rejected a write because it is full.
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other failure of the underlying storage backend.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn quota(message: impl Into<String>) -> Self {
        Self::QuotaExceeded(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// True when the error signals a storage-full condition the cache
    /// manager can recover from by evicting entries.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

/// Errors surfaced by the embedded relational store.
#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Internal(String),

    #[error("Database has not been initialized")]
    NotInitialized,
}

/// Top-level error for campusplan operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Remote source failure with no usable local data to fall back on.
    #[error("Remote source unavailable: {0}")]
    Remote(String),

    /// Cache write failed after exhausting eviction attempts.
    #[error("Storage quota exceeded and eviction failed after {attempts} attempts")]
    CacheWrite { attempts: u32 },
}

impl Error {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(DatabaseError::Internal(message.into()))
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }
}
