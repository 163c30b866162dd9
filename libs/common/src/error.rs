//! Error types shared by the infrastructure modules.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Failures surfaced by the PostgreSQL layer.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred while establishing a connection
    #[error("database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during query execution
    #[error("database query error: {0}")]
    Query(#[source] SqlxError),

    /// Configuration error
    #[error("database configuration error: {0}")]
    Configuration(String),
}

/// Failures surfaced by the Redis layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Error occurred while opening the client or a connection
    #[error("cache connection error: {0}")]
    Connection(#[source] redis::RedisError),

    /// Error occurred while executing a command or script
    #[error("cache command error: {0}")]
    Command(#[source] redis::RedisError),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
pub type CacheResult<T> = Result<T, CacheError>;
