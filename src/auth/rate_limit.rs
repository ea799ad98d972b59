//! Rate Limiting Middleware
//!
//! Fixed-window limiter on a DashMap, keyed by client address. Guards the
//! public credential endpoints (register, login, referral registration).
//! The key is the TCP peer address; forwarded headers are only honoured
//! when the service is configured to sit behind a trusted proxy.
//! State is per process; a multi-instance deployment limits per instance.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::utils::response::AppError;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    /// Window duration in seconds
    pub window_secs: u64,
    /// Key on `X-Forwarded-For` / `X-Real-IP` instead of the peer address
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_secs: 60,
            trust_forwarded_headers: false,
        }
    }
}

#[derive(Clone)]
struct RateLimitEntry {
    request_count: u32,
    window_start: Instant,
}

/// Rate limit information returned to client
#[derive(Debug)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

#[derive(Debug)]
pub struct RateLimitExceeded {
    pub retry_after_secs: u64,
}

pub struct RateLimiter {
    entries: Arc<DashMap<String, RateLimitEntry>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Periodically drop entries whose window has closed. Needs a Tokio runtime.
    pub fn spawn_cleanup(&self) {
        let entries = self.entries.clone();
        let window = Duration::from_secs(self.config.window_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(window * 2);
            loop {
                interval.tick().await;
                let now = Instant::now();
                entries.retain(|_, entry| now.duration_since(entry.window_start) < window);
            }
        });
    }

    pub fn trusts_forwarded_headers(&self) -> bool {
        self.config.trust_forwarded_headers
    }

    pub fn check_rate_limit(&self, client_id: &str) -> Result<RateLimitInfo, RateLimitExceeded> {
        self.check_at(client_id, Instant::now())
    }

    fn check_at(&self, client_id: &str, now: Instant) -> Result<RateLimitInfo, RateLimitExceeded> {
        let window = Duration::from_secs(self.config.window_secs);

        let mut entry = self
            .entries
            .entry(client_id.to_string())
            .or_insert_with(|| RateLimitEntry {
                request_count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= window {
            entry.request_count = 0;
            entry.window_start = now;
        }

        entry.request_count += 1;

        let elapsed = now.duration_since(entry.window_start).as_secs();
        let reset_secs = self.config.window_secs.saturating_sub(elapsed).max(1);

        if entry.request_count > self.config.max_requests {
            return Err(RateLimitExceeded {
                retry_after_secs: reset_secs,
            });
        }

        Ok(RateLimitInfo {
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(entry.request_count),
            reset_secs,
        })
    }
}

#[derive(Clone)]
pub struct RateLimiterState(pub Arc<RateLimiter>);

impl RateLimiterState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self(Arc::new(RateLimiter::new(config)))
    }
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_client(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            request
                .headers()
                .get("X-Real-IP")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

fn client_id(request: &Request<Body>, peer: SocketAddr, trust_forwarded: bool) -> String {
    if trust_forwarded {
        if let Some(client) = forwarded_client(request) {
            return client;
        }
    }
    peer.ip().to_string()
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(rate_limiter): State<RateLimiterState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client_id = client_id(&request, addr, rate_limiter.0.trusts_forwarded_headers());

    match rate_limiter.0.check_rate_limit(&client_id) {
        Ok(info) => {
            let mut response = next.run(request).await;

            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(info.limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(info.remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(info.reset_secs));

            response
        }
        Err(exceeded) => {
            tracing::warn!(
                "Rate limit exceeded for client {}: retry after {} seconds",
                client_id,
                exceeded.retry_after_secs
            );

            let mut response =
                AppError::rate_limited("Too many requests. Please try again later.").into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(exceeded.retry_after_secs));
            response
        }
    }
}
