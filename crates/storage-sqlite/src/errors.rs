//! Crate-local error type, converted into the shared database error at the
//! crate boundary.

use campusplan_core::errors::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Snapshot file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persisted snapshot is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Database(DatabaseError::Internal(err.to_string()))
    }
}
