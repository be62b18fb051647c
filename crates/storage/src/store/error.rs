#![forbid(unsafe_code)]

use ct_core::TreeError;
use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tree: {0}")]
    Tree(#[from] TreeError),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid move: {0}")]
    InvalidMove(&'static str),
    #[error("unknown id")]
    UnknownId,
    #[error("lock ordering violation: {0}")]
    LockOrderingViolation(&'static str),
    #[error("timed out waiting for tree lock (namespace={namespace}, key={key})")]
    LockTimeout { namespace: i64, key: i64 },
    #[error("deadlock persisted after retry: {0}")]
    Deadlock(#[source] Box<StoreError>),
}

impl StoreError {
    /// Failures the lock coordinator retries once: SQLite busy/locked contention.
    pub fn is_transient_deadlock(&self) -> bool {
        match self {
            Self::Sql(rusqlite::Error::SqliteFailure(err, _)) => {
                matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}
