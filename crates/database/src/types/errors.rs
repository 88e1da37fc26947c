//! Error types for the database layer

use thiserror::Error;

/// SQLite primary result codes that indicate contention rather than a bad query.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Database query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    MigrationError(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Duplicate entity: {0}")]
    Duplicate(String),

    #[error("Undecodable column value: {0}")]
    Decode(String),
}

impl DatabaseError {
    /// Whether retrying the same statement may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Query(error) => match error {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db) => db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
                    .unwrap_or(false),
                _ => false,
            },
            DatabaseError::ConnectionError(_) => true,
            _ => false,
        }
    }

    pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
        matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}
