//! Fixed-window request limits per client address.
//!
//! Clients are keyed on the socket peer address. `x-forwarded-for` is only
//! honored with `rate_limit.trust_forwarded_for`, since any direct client can
//! set it.
//!
//! Authentication endpoints get a tight budget (5 per minute by default) to slow
//! down password guessing; everything else under `/api` gets a generous one.
//! `/healthz` is never limited.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use super::{AppError, AppState, RateLimitConfig};

/// Entries are swept once the table grows past this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    hits: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: DashMap::new(),
        }
    }

    /// Counts one request for `key`. On rejection returns the seconds until the
    /// window resets.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        if self.hits.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }
        let mut entry = self.hits.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        if entry.count >= self.limit {
            let left = self
                .window
                .saturating_sub(now.saturating_duration_since(entry.started));
            return Err(left.as_secs().max(1));
        }
        entry.count += 1;
        Ok(())
    }

    fn prune(&self, now: Instant) {
        self.hits
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
    }
}

#[derive(Debug)]
pub struct RateLimits {
    pub auth: RateLimiter,
    pub api: RateLimiter,
    trust_forwarded_for: bool,
}

impl RateLimits {
    pub fn from_config(cfg: &RateLimitConfig) -> Option<Self> {
        if !cfg.enabled {
            return None;
        }
        let window = Duration::from_secs(cfg.window_secs);
        Some(Self {
            auth: RateLimiter::new(cfg.auth_requests, window),
            api: RateLimiter::new(cfg.api_requests, window),
            trust_forwarded_for: cfg.trust_forwarded_for,
        })
    }
}

/// Client key: the peer address, or the first `x-forwarded-for` hop when the
/// proxy in front is trusted to set it.
fn client_key<B>(req: &Request<B>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn enforce<B>(
    limits: &RateLimits,
    limiter: &RateLimiter,
    req: &Request<B>,
    bucket: &'static str,
) -> Result<(), AppError> {
    let key = client_key(req, limits.trust_forwarded_for);
    limiter.check(&key).map_err(|retry_after_secs| {
        tracing::warn!(client = %key, bucket, retry_after_secs, "rate limit exceeded");
        AppError::TooManyRequests { retry_after_secs }
    })
}

pub async fn limit_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(limits) = state.rate_limits() {
        enforce(limits, &limits.auth, &req, "auth")?;
    }
    Ok(next.run(req).await)
}

pub async fn limit_api(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(limits) = state.rate_limits() {
        enforce(limits, &limits.api, &req, "api")?;
    }
    Ok(next.run(req).await)
}
