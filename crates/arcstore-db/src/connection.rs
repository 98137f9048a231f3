//! A single pooled database handle and its bookkeeping.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Identifier of a pooled connection, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The numeric value of this identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A native connection handle together with the metadata the pool needs to
/// decide whether it may be reused.
pub(crate) struct PooledConnection<C> {
    pub(crate) id: ConnectionId,
    pub(crate) raw: C,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
    /// Set by the lease holder when the handle reported a fatal error.
    pub(crate) broken: bool,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(id: ConnectionId, raw: C) -> Self {
        let now = Instant::now();
        Self {
            id,
            raw,
            created_at: now,
            last_used_at: now,
            broken: false,
        }
    }

    /// Returns why this connection must not be reused, if it has outlived
    /// either limit.
    pub(crate) fn expired(
        &self,
        now: Instant,
        max_lifetime: Option<Duration>,
        idle_timeout: Option<Duration>,
    ) -> Option<&'static str> {
        if max_lifetime.is_some_and(|max| now.duration_since(self.created_at) >= max) {
            return Some("exceeded maximum lifetime");
        }
        if idle_timeout.is_some_and(|idle| now.duration_since(self.last_used_at) >= idle) {
            return Some("exceeded idle timeout");
        }
        None
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_used_at", &self.last_used_at)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}
