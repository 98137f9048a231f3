//! Per-client request rate limiting.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::AppState;

/// Length of one counting window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Tracked clients above which expired windows are evicted.
const EVICTION_THRESHOLD: usize = 10_000;

/// In-memory fixed-window request counter keyed by client IP.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<IpAddr, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request from `client` and reports whether it is within
    /// `limit` for the current window.
    pub fn check(&self, client: IpAddr, limit: u32) -> bool {
        self.check_at(client, limit, Instant::now())
    }

    fn check_at(&self, client: IpAddr, limit: u32, now: Instant) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };

        // Only expired windows are evicted so active limits survive cleanup.
        if state.len() > EVICTION_THRESHOLD {
            state.retain(|_, (_, start)| now.duration_since(*start) <= RATE_LIMIT_WINDOW);
        }

        let (count, start) = state.entry(client).or_insert((0, now));

        if now.duration_since(*start) > RATE_LIMIT_WINDOW {
            *count = 1;
            *start = now;
            true
        } else {
            *count = count.saturating_add(1);
            *count <= limit
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        match self.state.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejects clients that exceeded their per-minute budget with
/// `429 Too Many Requests` and `Retry-After: 60`.
///
/// Requires `ConnectInfo<SocketAddr>`, which the binary provides through
/// `into_make_service_with_connect_info`.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() else {
        tracing::error!("request has no peer address, is ConnectInfo configured?");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };
    let client = addr.ip();

    if !state.rate_limiter.check(client, state.rate_limit) {
        tracing::warn!(%client, limit = state.rate_limit, "rate limit exceeded");
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
        return Ok(response);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().expect("valid ip")
    }

    #[test]
    fn allows_within_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check(ip("127.0.0.1"), 5));
        }
        assert!(!limiter.check(ip("127.0.0.1"), 5));
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check(ip("10.0.0.1"), 3));
        }
        assert!(!limiter.check(ip("10.0.0.1"), 3));
        assert!(limiter.check(ip("10.0.0.2"), 3));
    }

    #[test]
    fn window_resets_after_a_minute() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        assert!(limiter.check_at(ip("10.0.0.1"), 1, start));
        assert!(!limiter.check_at(ip("10.0.0.1"), 1, start + Duration::from_secs(30)));
        assert!(limiter.check_at(ip("10.0.0.1"), 1, start + Duration::from_secs(61)));
    }

    #[test]
    fn eviction_keeps_active_windows() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for i in 0..=EVICTION_THRESHOLD as u32 {
            let client: IpAddr = std::net::Ipv4Addr::from(i.to_be_bytes()).into();
            limiter.check_at(client, 100, start);
        }

        let later = start + Duration::from_secs(61);
        let fresh: IpAddr = std::net::Ipv4Addr::from(u32::MAX.to_be_bytes()).into();
        limiter.check_at(fresh, 100, later);
        assert_eq!(limiter.tracked_clients(), 1, "only the fresh window survives");
    }
}
