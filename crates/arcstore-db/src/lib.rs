//! Database layer for the arcstore service.
//!
//! Provides a bounded SQLite connection pool, the scoped [`Lease`] guard that
//! returns connections to it, WAL-mode connection setup, and embedded SQL
//! migrations.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single database file with concurrent
//!   readers and one writer matches the read-heavy record API.
//! - **Own pool over `r2d2::ManageConnection`**: connections are produced
//!   and health-checked through the `r2d2` manager trait (backed by
//!   `r2d2_sqlite`), while the pool itself provides FIFO waiters, async cancellation-safe acquire,
//!   strict release accounting, and a draining shutdown.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`.

mod connection;
mod error;
mod lease;
mod manager;
mod migrations;
mod pool;

use std::time::Duration;

pub use connection::ConnectionId;
pub use error::PoolError;
pub use lease::Lease;
pub use manager::SqliteManager;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{Pool, PoolConfig, PoolPhase, PoolStats, ShutdownReport};

/// The SQLite-backed pool used by the service.
pub type DbPool = Pool<SqliteManager>;

/// A lease on a pooled SQLite connection.
pub type DbLease = Lease<SqliteManager>;

/// Runtime tunables for SQLite connections and the pool that holds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long a request waits for a free connection, in milliseconds.
    pub acquire_timeout_ms: u64,

    /// How long shutdown waits for outstanding leases, in milliseconds.
    pub drain_timeout_ms: u64,

    /// Maximum connection lifetime in seconds; `None` keeps connections
    /// until they fail a health check.
    pub max_lifetime_secs: Option<u64>,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 10,
            acquire_timeout_ms: 30_000,
            drain_timeout_ms: 30_000,
            max_lifetime_secs: None,
        }
    }
}

impl DbRuntimeSettings {
    /// The pool configuration these settings describe.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self.pool_max_size,
            timeout: Duration::from_millis(self.acquire_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            min_idle: self.pool_max_size.min(1),
            max_lifetime: self.max_lifetime_secs.map(Duration::from_secs),
            idle_timeout: None,
        }
    }
}

/// Creates a SQLite connection pool with WAL mode and foreign keys enabled.
///
/// One connection is opened eagerly so that an unusable `db_path` fails here
/// rather than on the first request.
///
/// # Errors
///
/// Returns `PoolError::InvalidConfig` for a zero-sized pool and
/// `PoolError::Connect` if the database cannot be opened.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let manager = SqliteManager::file(db_path, settings.busy_timeout_ms);
    Pool::new(manager, settings.pool_config())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_map_to_pool_config() {
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 3,
            acquire_timeout_ms: 250,
            drain_timeout_ms: 1_000,
            max_lifetime_secs: Some(600),
        };

        let config = settings.pool_config();
        assert_eq!(config.size, 3);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.drain_timeout, Duration::from_secs(1));
        assert_eq!(config.min_idle, 1);
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(600)));
    }

    #[test]
    fn create_in_memory_pool() {
        let settings = DbRuntimeSettings {
            pool_max_size: 3,
            ..DbRuntimeSettings::default()
        };

        let pool = create_pool(":memory:", settings).expect("pool creation should succeed");
        let stats = pool.stats();
        assert_eq!(stats.pool_size, 3);
        assert_eq!(stats.available, 1, "one connection is opened eagerly");
        assert_eq!(stats.phase, PoolPhase::Running);
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        let settings = DbRuntimeSettings {
            pool_max_size: 0,
            ..DbRuntimeSettings::default()
        };
        let err = create_pool(":memory:", settings).expect_err("zero-sized pool");
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }
}
