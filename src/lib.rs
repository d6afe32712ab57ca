//! Multi-worker HTTP server core for the storefront backend: a supervisor
//! keeping one worker per CPU core alive behind a shared listening socket,
//! and the per-worker request pipeline (logging, security headers, CORS,
//! rate limiting, body/cookie parsing, static assets, prefix dispatch).

pub mod config;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod worker;
