//! Error types for record operations.

use arcstore_db::{MigrationError, PoolError};

use crate::signal::SignalError;

/// Errors that can occur while reading or updating measurement records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// No connection could be leased from the pool.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A database operation failed.
    #[error("records database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schema could not be brought up to date.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// The file's signal samples could not be loaded.
    #[error("signal data error: {0}")]
    Signal(#[from] SignalError),

    /// The referenced file does not exist.
    #[error("file {0} not found")]
    NotFound(i64),
}
