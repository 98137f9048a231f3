//! Error types for the connection pool.

use std::time::Duration;

use crate::connection::ConnectionId;

/// Errors produced by [`Pool`](crate::Pool) operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No connection became available before the acquire timeout elapsed.
    ///
    /// This is a backpressure signal; callers may retry.
    #[error("no database connection became available within {0:?}")]
    Exhausted(Duration),

    /// The pool is draining or closed and accepts no new acquisitions.
    #[error("database connection pool is shut down")]
    Closed,

    /// A connection failed its health check. Handled inside the pool by
    /// discarding the connection; only ever observed in logs.
    #[error("connection {id} is unhealthy: {reason}")]
    Unhealthy {
        /// The discarded connection.
        id: ConnectionId,
        /// Why the connection was considered unhealthy.
        reason: String,
    },

    /// A lease was released twice or released into a pool that does not own it.
    #[error("invalid lease state: {0}")]
    InvalidLeaseState(&'static str),

    /// The connection manager failed to open a new connection.
    #[error("failed to open database connection: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The pool was constructed with unusable settings.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// A blocking database task panicked or was cancelled.
    #[error("blocking database task failed: {0}")]
    Task(String),
}

impl PoolError {
    /// Whether the caller may reasonably retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Exhausted(_))
    }
}
