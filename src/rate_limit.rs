//! Per-client request budgets for the endpoints that fan out to third parties.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::GatewayError;

const CLEANUP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Fixed-window limiter keyed by client IP. A limit of zero disables it.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clients: DashMap<IpAddr, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: DashMap::new(),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn check(&self, ip: IpAddr) -> Decision {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> Decision {
        if !self.is_enabled() {
            return Decision::Allowed;
        }
        if self.clients.len() > CLEANUP_THRESHOLD {
            self.cleanup(now);
        }

        let mut entry = self.clients.entry(ip).or_insert(Window { started: now, count: 0 });
        let window = entry.value_mut();

        if now.duration_since(window.started) >= self.window {
            *window = Window { started: now, count: 0 };
        }

        if window.count >= self.limit {
            let elapsed = now.duration_since(window.started);
            return Decision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        window.count += 1;
        Decision::Allowed
    }

    fn cleanup(&self, now: Instant) {
        let before = self.clients.len();
        self.clients
            .retain(|_, window| now.duration_since(window.started) < self.window);
        debug!(before, after = self.clients.len(), "expired rate limit windows removed");
    }
}

/// Middleware enforcing the limiter. Requests without a known peer address
/// (no `ConnectInfo`) pass through.
pub async fn limit_by_client(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = client_ip {
        if let Decision::Limited { retry_after } = limiter.check(ip) {
            warn!(client = %ip, path = %request.uri().path(), "rate limit exceeded");
            let retry_after_secs = retry_after.as_secs().max(1);
            return GatewayError::RateLimited { retry_after_secs }.into_response();
        }
    }

    next.run(request).await
}
