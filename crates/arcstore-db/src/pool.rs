//! Bounded, fair connection pool.
//!
//! All bookkeeping (idle queue, in-use count, waiter queue, lifecycle phase)
//! lives in a single [`PoolState`] behind one mutex. The lock is held only
//! while that state is mutated; opening, probing and closing connections
//! always happen with the lock released.
//!
//! Capacity is tracked as `in_use`: the number of slots currently granted to
//! a lease, to a waiter, or to a caller that is opening a new connection.
//! `in_use + idle.len()` never exceeds the configured size.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use r2d2::ManageConnection;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};

use crate::connection::{ConnectionId, PooledConnection};
use crate::error::PoolError;
use crate::lease::Lease;

/// Tunables fixed at pool construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of open connections.
    pub size: u32,
    /// Default time `acquire` waits for a free connection.
    pub timeout: Duration,
    /// How long `shutdown` waits for outstanding leases.
    pub drain_timeout: Duration,
    /// Connections opened eagerly by [`Pool::new`].
    pub min_idle: u32,
    /// Connections older than this are closed instead of reused.
    pub max_lifetime: Option<Duration>,
    /// Idle connections unused for this long are replaced on checkout.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            min_idle: 1,
            max_lifetime: None,
            idle_timeout: None,
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<(), PoolError> {
        if self.size == 0 {
            return Err(PoolError::InvalidConfig(
                "pool size must be at least 1".to_string(),
            ));
        }
        if self.min_idle > self.size {
            return Err(PoolError::InvalidConfig(format!(
                "min_idle ({}) exceeds pool size ({})",
                self.min_idle, self.size
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a pool. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    /// Accepting acquisitions.
    Running,
    /// Shutdown requested; waiting for outstanding leases.
    Draining,
    /// All idle connections closed.
    Closed,
}

/// Point-in-time snapshot of pool occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub pool_size: u32,
    pub in_use: usize,
    pub available: usize,
    pub waiters: usize,
    pub phase: PoolPhase,
}

impl PoolStats {
    /// Every slot is taken and nothing is idle.
    pub fn is_saturated(&self) -> bool {
        self.available == 0 && self.in_use >= self.pool_size as usize
    }
}

/// Outcome of [`Pool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Idle connections closed when the pool reached `Closed`.
    pub closed: usize,
    /// Leases still outstanding when the drain timeout elapsed.
    pub abandoned: usize,
}

/// What a caller is handed when capacity becomes available: either an
/// existing connection, or the right to open a new one in a free slot.
pub(crate) enum Grant<C> {
    Idle(PooledConnection<C>),
    Open,
}

struct Waiter<C> {
    id: u64,
    tx: oneshot::Sender<Grant<C>>,
}

enum Admission<C> {
    Granted(Grant<C>),
    Queued {
        id: u64,
        rx: oneshot::Receiver<Grant<C>>,
    },
}

struct PoolState<C> {
    phase: PoolPhase,
    idle: VecDeque<PooledConnection<C>>,
    in_use: usize,
    waiters: VecDeque<Waiter<C>>,
    next_waiter: u64,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            phase: PoolPhase::Running,
            idle: VecDeque::new(),
            in_use: 0,
            waiters: VecDeque::new(),
            next_waiter: 0,
        }
    }

    /// Grants capacity immediately or enqueues the caller. Callers never
    /// overtake an existing waiter.
    fn admit(&mut self, size: usize) -> Result<Admission<C>, PoolError> {
        if self.phase != PoolPhase::Running {
            return Err(PoolError::Closed);
        }

        if self.waiters.is_empty() {
            if let Some(conn) = self.idle.pop_back() {
                self.in_use += 1;
                return Ok(Admission::Granted(Grant::Idle(conn)));
            }
            if self.in_use < size {
                self.in_use += 1;
                return Ok(Admission::Granted(Grant::Open));
            }
        }

        let id = self.next_waiter;
        self.next_waiter += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { id, tx });
        Ok(Admission::Queued { id, rx })
    }

    /// Passes `grant` to the oldest live waiter. Returns it back if nobody is
    /// waiting.
    fn hand_off(&mut self, mut grant: Grant<C>) -> Option<Grant<C>> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(grant) {
                Ok(()) => return None,
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    /// Returns a slot previously counted in `in_use`. Yields the connection
    /// that must be closed, if any.
    fn restore(&mut self, grant: Grant<C>) -> Option<PooledConnection<C>> {
        if self.phase != PoolPhase::Running {
            self.in_use = self.in_use.saturating_sub(1);
            return match grant {
                Grant::Idle(conn) => Some(conn),
                Grant::Open => None,
            };
        }

        match self.hand_off(grant) {
            None => None,
            Some(grant) => {
                self.in_use = self.in_use.saturating_sub(1);
                if let Grant::Idle(conn) = grant {
                    self.idle.push_back(conn);
                }
                None
            }
        }
    }

    fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|waiter| waiter.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }
}

pub(crate) struct Shared<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    drained: Notify,
    next_id: AtomicU64,
}

impl<M: ManageConnection> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, PoolState<M::Connection>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("connection pool lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Returns a slot to the pool and closes whatever must not be kept.
    pub(crate) fn restore(&self, grant: Grant<M::Connection>) {
        let (retired, drained) = {
            let mut state = self.lock();
            let retired = state.restore(grant);
            (
                retired,
                state.phase != PoolPhase::Running && state.in_use == 0,
            )
        };

        if let Some(conn) = retired {
            tracing::debug!(connection = %conn.id, "closing connection");
            drop(conn);
        }
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Takes a connection back from a lease: check its health, then either keep it
    /// or discard it and free its slot.
    pub(crate) fn release(&self, mut conn: PooledConnection<M::Connection>) {
        if self.lock().phase != PoolPhase::Running {
            self.restore(Grant::Idle(conn));
            return;
        }

        match self.check_health(&mut conn) {
            Ok(()) => {
                conn.last_used_at = Instant::now();
                self.restore(Grant::Idle(conn));
            }
            Err(err) => {
                tracing::warn!(error = %err, "discarding connection that failed its health check");
                drop(conn);
                self.restore(Grant::Open);
            }
        }
    }

    fn check_health(&self, conn: &mut PooledConnection<M::Connection>) -> Result<(), PoolError> {
        let id = conn.id;
        let unhealthy = |reason: String| PoolError::Unhealthy { id, reason };

        if conn.broken {
            return Err(unhealthy("marked broken by lease holder".to_string()));
        }
        if self.manager.has_broken(&mut conn.raw) {
            return Err(unhealthy("connection reported broken".to_string()));
        }
        if let Some(reason) = conn.expired(Instant::now(), self.config.max_lifetime, None) {
            return Err(unhealthy(reason.to_string()));
        }
        self.manager
            .is_valid(&mut conn.raw)
            .map_err(|e| unhealthy(e.to_string()))
    }

    /// Reason an idle connection must be replaced before it is handed out.
    fn stale_reason(&self, conn: &mut PooledConnection<M::Connection>) -> Option<&'static str> {
        if self.manager.has_broken(&mut conn.raw) {
            return Some("connection reported broken");
        }
        conn.expired(
            Instant::now(),
            self.config.max_lifetime,
            self.config.idle_timeout,
        )
    }
}

impl<M> Shared<M>
where
    M: ManageConnection,
    M::Error: Send + Sync,
{
    fn open(&self) -> Result<PooledConnection<M::Connection>, PoolError> {
        let raw = self
            .manager
            .connect()
            .map_err(|e| PoolError::Connect(Box::new(e)))?;
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(connection = %id, "opened database connection");
        Ok(PooledConnection::new(id, raw))
    }

    /// Turns a grant into a lease, opening a connection if the grant is an
    /// empty slot or the idle connection turned out to be stale.
    ///
    /// The open is bounded by `deadline`. The slot stays reserved until the
    /// blocking open finishes, even when the caller has given up on it.
    async fn lease(
        shared: Arc<Self>,
        grant: Grant<M::Connection>,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> Result<Lease<M>, PoolError> {
        let slot = SlotGuard::new(Arc::clone(&shared));

        let stale = match grant {
            Grant::Idle(mut conn) => match shared.stale_reason(&mut conn) {
                None => return Ok(slot.into_lease(conn)),
                Some(reason) => {
                    tracing::debug!(connection = %conn.id, reason, "recycling idle connection");
                    Some(conn)
                }
            },
            Grant::Open => None,
        };

        // The connection comes first in the tuple so an abandoned result is
        // closed before its slot is returned.
        let opening = tokio::task::spawn_blocking(move || {
            drop(stale);
            let conn = slot.shared.open();
            (conn, slot)
        });

        match tokio::time::timeout_at(deadline, opening).await {
            Ok(Ok((Ok(conn), slot))) => Ok(slot.into_lease(conn)),
            Ok(Ok((Err(err), _slot))) => Err(err),
            Ok(Err(join)) => Err(PoolError::Task(join.to_string())),
            Err(_) => {
                tracing::debug!(timeout = ?timeout, "timed out opening a database connection");
                Err(PoolError::Exhausted(timeout))
            }
        }
    }
}

/// Holds one `in_use` slot until it is converted into a lease. Dropping it
/// (failed open, cancelled acquire) returns the slot.
struct SlotGuard<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    armed: bool,
}

impl<M: ManageConnection> SlotGuard<M> {
    fn new(shared: Arc<Shared<M>>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    fn into_lease(mut self, conn: PooledConnection<M::Connection>) -> Lease<M> {
        self.armed = false;
        Lease::new(Arc::clone(&self.shared), conn)
    }
}

impl<M: ManageConnection> Drop for SlotGuard<M> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.restore(Grant::Open);
        }
    }
}

/// A queued acquisition. Dropping it before a grant is received removes the
/// queue entry, or reclaims a grant that raced with the cancellation.
struct PendingAcquire<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    id: u64,
    rx: oneshot::Receiver<Grant<M::Connection>>,
    settled: bool,
}

impl<M: ManageConnection> PendingAcquire<M> {
    async fn wait(
        mut self,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> Result<Grant<M::Connection>, PoolError> {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(grant)) => {
                self.settled = true;
                Ok(grant)
            }
            // Sender dropped: the pool began shutting down.
            Ok(Err(_)) => {
                self.settled = true;
                Err(PoolError::Closed)
            }
            Err(_) => {
                tracing::debug!(timeout = ?timeout, "timed out waiting for a database connection");
                Err(PoolError::Exhausted(timeout))
            }
        }
    }
}

impl<M: ManageConnection> Drop for PendingAcquire<M> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.shared.lock().remove_waiter(self.id) {
            return;
        }
        // Our entry was already popped, so a grant was sent (under the lock)
        // before we got here.
        self.rx.close();
        if let Ok(grant) = self.rx.try_recv() {
            self.shared.restore(grant);
        }
    }
}

/// A bounded pool of database connections shared by concurrent callers.
///
/// Cloning is cheap; clones refer to the same pool.
pub struct Pool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<M: ManageConnection> Pool<M> {
    /// The configuration this pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            pool_size: self.shared.config.size,
            in_use: state.in_use,
            available: state.idle.len(),
            waiters: state.waiters.len(),
            phase: state.phase,
        }
    }

    /// Returns a lease's connection to this pool ahead of scope exit.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidLeaseState` if the lease was already
    /// released or was acquired from another pool.
    pub fn release(&self, lease: &mut Lease<M>) -> Result<(), PoolError> {
        if !lease.belongs_to(&self.shared) {
            return Err(PoolError::InvalidLeaseState(
                "lease belongs to a different pool",
            ));
        }
        lease.release()
    }

    /// Stops handing out connections, waits for outstanding leases (bounded
    /// by `drain_timeout`), then closes every idle connection.
    ///
    /// Queued acquisitions fail with `PoolError::Closed`. A call made while
    /// another shutdown is draining (or after one was cancelled mid-drain)
    /// joins the drain and finishes the close. Once the pool is `Closed`
    /// this returns immediately.
    pub async fn shutdown(&self) -> ShutdownReport {
        {
            let mut state = self.shared.lock();
            match state.phase {
                PoolPhase::Closed => {
                    return ShutdownReport {
                        closed: 0,
                        abandoned: state.in_use,
                    };
                }
                PoolPhase::Draining => {
                    tracing::debug!(outstanding = state.in_use, "joining connection pool drain");
                }
                PoolPhase::Running => {
                    state.phase = PoolPhase::Draining;
                    state.waiters.clear();
                    tracing::info!(outstanding = state.in_use, "connection pool draining");
                }
            }
        }

        let deadline = tokio::time::Instant::now() + self.shared.config.drain_timeout;
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.lock().in_use == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(
                    drain_timeout = ?self.shared.config.drain_timeout,
                    "drain timeout elapsed with leases still outstanding"
                );
                break;
            }
        }

        self.finish_close()
    }

    /// Moves the pool to `Closed` and closes whatever is idle.
    fn finish_close(&self) -> ShutdownReport {
        let (idle, abandoned) = {
            let mut state = self.shared.lock();
            state.phase = PoolPhase::Closed;
            (std::mem::take(&mut state.idle), state.in_use)
        };
        let closed = idle.len();
        drop(idle);

        tracing::info!(closed, abandoned, "connection pool closed");
        ShutdownReport { closed, abandoned }
    }
}

impl<M> Pool<M>
where
    M: ManageConnection,
    M::Error: Send + Sync,
{
    /// Builds a pool and eagerly opens `config.min_idle` connections.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for unusable settings and
    /// `PoolError::Connect` if an eager connection cannot be opened.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            manager,
            config,
            state: Mutex::new(PoolState::new()),
            drained: Notify::new(),
            next_id: AtomicU64::new(0),
        });

        let mut warm = Vec::with_capacity(shared.config.min_idle as usize);
        for _ in 0..shared.config.min_idle {
            warm.push(shared.open()?);
        }
        shared.lock().idle.extend(warm);

        tracing::info!(
            size = shared.config.size,
            min_idle = shared.config.min_idle,
            timeout = ?shared.config.timeout,
            "connection pool ready"
        );
        Ok(Self { shared })
    }

    /// Acquires a connection, waiting up to the configured timeout.
    pub async fn acquire(&self) -> Result<Lease<M>, PoolError> {
        self.acquire_timeout(self.shared.config.timeout).await
    }

    /// Acquires a connection, waiting up to `timeout`.
    ///
    /// Waiters are served in arrival order. Dropping the returned future
    /// abandons the wait without leaking capacity.
    ///
    /// # Errors
    ///
    /// `PoolError::Exhausted` when the timeout elapses (the wait for a slot
    /// and the opening of a new connection both count), `PoolError::Closed`
    /// after shutdown, `PoolError::Connect` if a new connection cannot be
    /// opened.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Lease<M>, PoolError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let admission = self
            .shared
            .lock()
            .admit(self.shared.config.size as usize)?;

        let grant = match admission {
            Admission::Granted(grant) => grant,
            Admission::Queued { id, rx } => {
                let pending = PendingAcquire {
                    shared: Arc::clone(&self.shared),
                    id,
                    rx,
                    settled: false,
                };
                pending.wait(deadline, timeout).await?
            }
        };

        Shared::lease(Arc::clone(&self.shared), grant, deadline, timeout).await
    }

    /// Runs `work` against a leased connection on the blocking thread pool
    /// and releases the lease on every exit path, including panics.
    ///
    /// `timeout` overrides the pool's acquire timeout.
    pub async fn with_connection<T, E, F>(&self, timeout: Option<Duration>, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut M::Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<PoolError> + Send + 'static,
    {
        let mut lease = self
            .acquire_timeout(timeout.unwrap_or(self.shared.config.timeout))
            .await?;

        tokio::task::spawn_blocking(move || {
            let result = work(&mut lease);
            drop(lease);
            result
        })
        .await
        .map_err(|e| E::from(PoolError::Task(e.to_string())))?
    }
}

#[cfg(test)]
impl<M: ManageConnection> Pool<M> {
    fn idle_ids(&self) -> Vec<ConnectionId> {
        self.shared.lock().idle.iter().map(|conn| conn.id).collect()
    }
}
