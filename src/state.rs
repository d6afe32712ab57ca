use std::path::PathBuf;
use std::sync::Arc;

use crate::cors::CorsPolicy;
use crate::rate_limit::RateLimiter;
use crate::router::PrefixRouter;

// app's shared state - built once at startup, shared by every worker
pub struct AppState {
    pub cors: CorsPolicy,
    pub rate_limiter: RateLimiter,
    pub routes: PrefixRouter,
    pub static_roots: Vec<(String, PathBuf)>, // url prefix -> on-disk directory
}

pub type SharedState = Arc<AppState>;
