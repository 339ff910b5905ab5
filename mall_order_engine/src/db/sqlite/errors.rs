use thiserror::Error;

use crate::db::traits::StorageError;

#[derive(Debug, Error)]
pub enum SqliteDatabaseError {
    #[error("Database connection error: {0}")]
    DriverError(#[from] sqlx::Error),
    #[error("Database migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Could not decode stored value: {0}")]
    DecodeError(String),
}

/// SQLite primary result codes that mean "someone else holds the write lock". The extended codes
/// (e.g. `SQLITE_BUSY_SNAPSHOT` = 517) share the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn is_lock_contention(e: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    e.code()
        .and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or_else(|| e.message().contains("database is locked"))
}

impl From<SqliteDatabaseError> for StorageError {
    fn from(e: SqliteDatabaseError) -> Self {
        match e {
            SqliteDatabaseError::DriverError(sqlx::Error::RowNotFound) => StorageError::NotFound(e.to_string()),
            SqliteDatabaseError::DriverError(sqlx::Error::Database(ref db_err)) => {
                if is_lock_contention(db_err.as_ref()) {
                    StorageError::Conflict(db_err.message().to_string())
                } else if db_err.is_unique_violation() ||
                    db_err.is_check_violation() ||
                    db_err.is_foreign_key_violation() ||
                    db_err.message().contains("immutable") ||
                    db_err.message().contains("frozen")
                {
                    StorageError::Integrity(db_err.message().to_string())
                } else {
                    StorageError::Driver(db_err.message().to_string())
                }
            },
            SqliteDatabaseError::DecodeError(s) => StorageError::Integrity(s),
            other => StorageError::Driver(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        SqliteDatabaseError::from(e).into()
    }
}
