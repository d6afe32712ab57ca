use std::net::TcpListener;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use storefront_server::config::Args;
use storefront_server::cors::CorsPolicy;
use storefront_server::handlers;
use storefront_server::rate_limit::RateLimiter;
use storefront_server::router::PrefixRouter;
use storefront_server::state::AppState;
use storefront_server::supervisor::Supervisor;
use storefront_server::worker::run_worker;

fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    // Business route modules register here; the core only promises prefix
    // dispatch with a normalized request in and a response or error out.
    let routes = PrefixRouter::new()
        .route("/api/health", handlers::health_handler)
        .route_methods(
            "/metrics",
            vec![axum::http::Method::GET],
            handlers::metrics_handler,
        );

    let state = Arc::new(AppState {
        cors: CorsPolicy::new(args.origins()),
        rate_limiter: RateLimiter::new(args.rate_limit, args.window()),
        routes,
        static_roots: args.static_root_mappings()?,
    });

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .with_context(|| format!("failed to bind port {}", args.port))?;

    let workers = args.worker_count();
    info!(
        port = args.port,
        workers,
        rate_limit = args.rate_limit,
        rate_window_secs = args.rate_window,
        "storefront server starting"
    );

    let supervisor = Supervisor::new(workers, args.restart_policy(), move |ctx| {
        match listener.try_clone() {
            Ok(listener) => run_worker(ctx, Arc::clone(&state), listener),
            Err(e) => {
                tracing::error!(slot = ctx.slot, error = %e, "failed to clone shared listener")
            }
        }
    });
    supervisor.run();
    Ok(())
}
