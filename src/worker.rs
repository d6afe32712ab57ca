use std::net::SocketAddr;
use std::net::TcpListener as StdTcpListener;

use axum::Router;
use axum::extract::{OriginalUri, Request, State};
use axum::handler::HandlerWithoutStateExt;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;

use crate::cors::cors_gate;
use crate::error::ApiError;
use crate::middleware::{access_log, body_guard, cookie_guard, handle_panic, security_headers};
use crate::rate_limit::rate_limit_gate;
use crate::state::SharedState;
use crate::supervisor::WorkerContext;

// Assemble the per-worker pipeline. ServiceBuilder applies layers
// top-to-bottom on the way in, so the stage order is: access log, security
// headers, panic terminal, CORS gate, rate limiter, body guard, cookies,
// then static roots and prefix dispatch inside the router. The header stage
// sits outside the panic terminal so even a panic-produced 500 is hardened.
pub fn build_app(state: SharedState) -> Router {
    let mut router = Router::new();
    for (prefix, dir) in &state.static_roots {
        router = router.nest_service(
            prefix.as_str(),
            ServeDir::new(dir).not_found_service(static_not_found.into_service()),
        );
    }

    router
        .fallback(dispatch)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(access_log))
                .layer(from_fn(security_headers))
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(from_fn_with_state(state.clone(), cors_gate))
                .layer(from_fn_with_state(state.clone(), rate_limit_gate))
                .layer(from_fn(body_guard))
                .layer(from_fn(cookie_guard)),
        )
        .with_state(state)
}

// Longest-prefix dispatch to a business handler, falling through
// to the structured not-found terminal.
async fn dispatch(State(state): State<SharedState>, req: Request) -> Result<Response, ApiError> {
    state.routes.dispatch(req).await
}

// A static-root miss falls through to the same structured terminal as an
// unmatched route, never a bare empty-body 404.
async fn static_not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(uri.path().to_owned())
}

// Worker entry point, run on a dedicated OS thread. Each worker owns a
// single-threaded event loop and accepts from its own clone of the shared
// listening socket; the OS spreads connections across workers.
pub fn run_worker(ctx: WorkerContext, state: SharedState, listener: StdTcpListener) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(slot = ctx.slot, error = %e, "failed to build worker runtime");
            return;
        }
    };

    if let Err(e) = runtime.block_on(serve(ctx, state, listener)) {
        tracing::error!(slot = ctx.slot, error = %e, "worker server error");
    }
}

async fn serve(
    ctx: WorkerContext,
    state: SharedState,
    listener: StdTcpListener,
) -> anyhow::Result<()> {
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    tracing::info!(slot = ctx.slot, addr = %listener.local_addr()?, "worker listening");

    let app = build_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
