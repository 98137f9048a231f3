//! Scoped ownership of one pooled connection.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use r2d2::ManageConnection;

use crate::connection::{ConnectionId, PooledConnection};
use crate::error::PoolError;
use crate::pool::Shared;

/// Exclusive use of one connection, returned to its pool exactly once:
/// either by an explicit [`Lease::release`] or when the lease is dropped.
///
/// A lease dereferences to the native connection.
///
/// Ending a lease runs the connection's health check (for SQLite a
/// `ROLLBACK` of any open transaction and a `SELECT 1`) on the thread that
/// drops or releases it. From async code, prefer [`Pool::with_connection`],
/// which does both the work and the release on the blocking thread pool.
///
/// [`Pool::with_connection`]: crate::Pool::with_connection
///
/// # Panics
///
/// Dereferencing a lease after it was explicitly released panics.
pub struct Lease<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    conn: Option<PooledConnection<M::Connection>>,
    id: ConnectionId,
}

impl<M: ManageConnection> Lease<M> {
    pub(crate) fn new(shared: Arc<Shared<M>>, conn: PooledConnection<M::Connection>) -> Self {
        Self {
            shared,
            id: conn.id,
            conn: Some(conn),
        }
    }

    /// Identifier of the leased connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the connection has already been handed back.
    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// Flags the connection as unusable; it is closed instead of reused when
    /// the lease ends. Call this after a fatal I/O error from the handle.
    pub fn mark_broken(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.broken = true;
        }
    }

    /// Returns the connection to the pool now instead of at scope exit.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidLeaseState` if the lease was already released.
    pub fn release(&mut self) -> Result<(), PoolError> {
        let conn = self
            .conn
            .take()
            .ok_or(PoolError::InvalidLeaseState("lease already released"))?;
        self.shared.release(conn);
        Ok(())
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared<M>>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    fn held(&self) -> &PooledConnection<M::Connection> {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => panic!("connection {} used after its lease was released", self.id),
        }
    }
}

impl<M: ManageConnection> Deref for Lease<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        &self.held().raw
    }
}

impl<M: ManageConnection> DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        let id = self.id;
        match self.conn.as_mut() {
            Some(conn) => &mut conn.raw,
            None => panic!("connection {id} used after its lease was released"),
        }
    }
}

impl<M: ManageConnection> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn);
        }
    }
}

impl<M: ManageConnection> fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("connection", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
