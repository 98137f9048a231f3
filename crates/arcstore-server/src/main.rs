//! arcstore server binary.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, and graceful shutdown on SIGTERM/SIGINT. The signal stops
//! the listener and starts draining the connection pool at the same time, so
//! `/health` reports `closed` while in-flight requests finish.

use arcstore_server::{app, config, middleware::RateLimiter, AppState};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("ARCSTORE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = arcstore_db::create_pool(&config.database.path, config.database.runtime_settings())
        .expect("failed to create database pool, check database.path in config");

    {
        let lease = pool
            .acquire()
            .await
            .expect("failed to get database connection for migrations");
        let applied =
            arcstore_db::run_migrations(&lease).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    if !config.storage.binary_dir.is_dir() {
        tracing::warn!(
            binary_dir = %config.storage.binary_dir.display(),
            "signal data directory does not exist, data requests will fail"
        );
    }

    // Build application
    let state = AppState {
        pool: pool.clone(),
        binary_dir: config.storage.binary_dir.clone(),
        rate_limiter: RateLimiter::new(),
        rate_limit: config.rate_limit.requests_per_minute,
    };
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, pool_size = config.database.pool_size, "starting arcstore server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address, is another process using this port?");

    // One signal fans out to the listener and to the pool drain.
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let drain = {
        let pool = pool.clone();
        let mut stop = stop_rx.clone();
        tokio::spawn(async move {
            let _ = stop.wait_for(|&stopping| stopping).await;
            pool.shutdown().await
        })
    };

    // Serve with graceful shutdown
    let mut stop = stop_rx;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = stop.wait_for(|&stopping| stopping).await;
    })
    .await
    .expect("server error");

    let report = match drain.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "pool drain task failed, closing pool directly");
            pool.shutdown().await
        }
    };
    if report.abandoned > 0 {
        tracing::warn!(
            abandoned = report.abandoned,
            "connections were still leased when the drain timeout elapsed"
        );
    }

    tracing::info!("arcstore server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
