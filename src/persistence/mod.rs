use crate::StudentAggregate;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("student {0} not found")]
    NotFound(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("student {id} changed concurrently (expected version {expected}, found {found})")]
    VersionConflict { id: String, expected: u64, found: u64 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    /// Timeouts and contention are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Unavailable(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match value.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Unavailable(value.to_string())
            }
            _ => StoreError::Sqlite(value),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Get-by-id / update-by-id over student documents.
///
/// `update` only succeeds when the stored version still equals
/// `expected_version`; it returns the new version.
pub trait StudentStore {
    fn get(&self, id: &str, timeout: Duration) -> StoreResult<StudentAggregate>;
    fn update(
        &self,
        student: &StudentAggregate,
        expected_version: u64,
        timeout: Duration,
    ) -> StoreResult<u64>;
}

pub mod file;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::JsonFileStudentStore;
pub use memory::InMemoryStudentStore;
