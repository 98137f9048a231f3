#![allow(dead_code)]

use arcstore_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use arcstore_records::{insert_file, Label, NewFile, RecordError};
use arcstore_server::{app, middleware::RateLimiter, AppState};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub pool: DbPool,
    pub dir: tempfile::TempDir,
}

pub struct Options {
    pub pool_size: u32,
    pub acquire_timeout_ms: u64,
    pub rate_limit: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pool_size: 4,
            acquire_timeout_ms: 2_000,
            rate_limit: 1_000,
        }
    }
}

pub async fn setup(options: Options) -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("arcstore.db");
    let settings = DbRuntimeSettings {
        pool_max_size: options.pool_size,
        acquire_timeout_ms: options.acquire_timeout_ms,
        drain_timeout_ms: 500,
        ..DbRuntimeSettings::default()
    };
    let pool = create_pool(db_path.to_str().expect("utf-8 path"), settings).expect("pool");
    {
        let lease = pool.acquire().await.expect("lease for migrations");
        run_migrations(&lease).expect("migrations");
    }

    let state = AppState {
        pool: pool.clone(),
        binary_dir: dir.path().to_path_buf(),
        rate_limiter: RateLimiter::new(),
        rate_limit: options.rate_limit,
    };

    TestApp {
        router: app(state),
        pool,
        dir,
    }
}

pub fn client_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 40000)
}

pub fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let mut req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };
    req.extensions_mut().insert(ConnectInfo(client_addr()));
    req
}

pub async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.expect("response");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("json body")
    };
    (status, json)
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, request(Method::GET, uri, None)).await
}

pub async fn seed_file(
    pool: &DbPool,
    name: &str,
    label: Label,
    voltage: f64,
    current: f64,
) -> i64 {
    let file = NewFile {
        filename: name.to_string(),
        path: format!("/raw/{name}"),
        label_directory: None,
        label,
        voltage_level: Some(voltage),
        current_level: Some(current),
        datestamp: None,
        binary_path: format!("{name}.npy"),
        total_samples: Some(3),
    };
    pool.with_connection(None, move |conn| -> Result<i64, RecordError> {
        insert_file(conn, &file)
    })
    .await
    .expect("seed file")
}

/// Writes a version 1, C-order `<f8` array of `(voltage, current)` rows.
pub fn write_npy(dir: &std::path::Path, name: &str, rows: &[(f64, f64)]) {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, 2), }}",
        rows.len()
    );
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
    bytes.extend((header.len() as u16).to_le_bytes());
    bytes.extend(header.as_bytes());
    for (voltage, current) in rows {
        bytes.extend(voltage.to_le_bytes());
        bytes.extend(current.to_le_bytes());
    }
    std::fs::write(dir.join(name), bytes).expect("write npy");
}
