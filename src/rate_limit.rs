use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::error::ApiError;
use crate::metrics::RATE_LIMITED_TOTAL;
use crate::state::SharedState;

// Rate window - tracks requests per client key within the current fixed window
pub struct RateWindow {
    pub count: u32,
    pub window_start: Instant,
}

// Fixed window rate limiter. The table is shared by every worker, so the
// configured limit is a true global bound per client key.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    pub fn check(&self, client_key: &str) -> bool {
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry(client_key.to_string())
            .or_insert(RateWindow {
                count: 0,
                window_start: now,
            });

        // window expired..? Reset it
        if entry.window_start.elapsed() >= self.window {
            entry.count = 1;
            entry.window_start = now;
            return true;
        }

        // under limit.? Allow
        if entry.count < self.max_requests {
            entry.count += 1;
            return true;
        }

        // over limit
        false
    }
}

// Middleware stage. Keys on the peer IP; connections without connect-info
// (e.g. in-process test requests) all share the "unknown" key.
pub async fn rate_limit_gate(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.rate_limiter.check(&key) {
        RATE_LIMITED_TOTAL.inc();
        return Err(ApiError::RateLimited);
    }

    Ok(next.run(req).await)
}
