//! SQLite implementation of the hearth [`HomeStore`] seam.
//!
//! Built on `rusqlite` with a small fixed-size connection pool. All SQL
//! runs on tokio's blocking thread pool so store calls never stall the
//! async workers driving the write-behind flusher.
//!
//! [`HomeStore`]: hearth_registry::HomeStore

pub use pool::{PooledConnection, SqlitePool};
pub use store::SqliteHomeStore;

pub mod pool;
pub mod schema;
pub mod store;

use hearth_registry::StoreError;

/// Maps a `rusqlite` failure onto the store error taxonomy.
///
/// Lock contention and busy timeouts come back as transient so the
/// flusher retries them; constraint violations are terminal.
pub(crate) fn map_sql_err(e: rusqlite::Error) -> StoreError {
    use rusqlite::ErrorCode;
    match &e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                StoreError::Timeout(e.to_string())
            }
            ErrorCode::ConstraintViolation => StoreError::Constraint(e.to_string()),
            ErrorCode::CannotOpen | ErrorCode::DiskFull | ErrorCode::DatabaseCorrupt => {
                StoreError::Connection(e.to_string())
            }
            _ => StoreError::Query(e.to_string()),
        },
        _ => StoreError::Query(e.to_string()),
    }
}
