use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors raised by the storage layer.
///
/// Lock contention is split out from every other SQLite failure so callers
/// that are allowed to retry (the alert worker) can match on it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database is locked: {0}")]
    Locked(String),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("invalid stored value: {0}")]
    Invalid(String),

    #[error("metadata encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// True for failures caused by another writer holding the database.
    pub fn is_transient_lock(&self) -> bool {
        matches!(self, StoreError::Locked(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(ffi, _)
                if matches!(ffi.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::Locked(err.to_string())
            }
            _ => StoreError::Sqlite(err),
        }
    }
}
