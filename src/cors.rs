use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::metrics::CORS_DENIED_TOTAL;
use crate::state::SharedState;

// Methods and headers a browser may use against the API. Fixed set, mirrors
// what the business routes actually accept.
pub const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";
pub const ALLOWED_HEADERS: &str = "Authorization,Content-Type";
pub const EXPOSED_HEADERS: &str = "Content-Disposition";

// How long browsers may cache a preflight answer, in seconds.
pub const PREFLIGHT_MAX_AGE: &str = "300";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorsDecision {
    Allow,
    Deny,
}

// Allow when the origin is absent (same-origin or non-browser client) or is a
// literal member of the allow-list.
pub fn evaluate(origin: Option<&str>, allow_list: &[String]) -> CorsDecision {
    match origin {
        None => CorsDecision::Allow,
        Some(origin) if allow_list.iter().any(|allowed| allowed == origin) => CorsDecision::Allow,
        Some(_) => CorsDecision::Deny,
    }
}

// Static allow-list, fixed at startup.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_list: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allow_list: Vec<String>) -> Self {
        Self { allow_list }
    }

    pub fn evaluate(&self, origin: Option<&str>) -> CorsDecision {
        evaluate(origin, &self.allow_list)
    }
}

// Middleware stage. Denied origins terminate the chain before any later stage
// runs; allowed preflights are answered here and never reach the router.
pub async fn cors_gate(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    if state.cors.evaluate(origin.as_deref()) == CorsDecision::Deny {
        CORS_DENIED_TOTAL.inc();
        return Err(ApiError::CorsForbidden);
    }

    if req.method() == Method::OPTIONS {
        if let Some(origin) = origin.as_deref() {
            return Ok(preflight_response(origin));
        }
    }

    let mut res = next.run(req).await;
    if let Some(origin) = origin.as_deref() {
        if let Ok(value) = HeaderValue::from_str(origin) {
            let headers = res.headers_mut();
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            headers.insert(
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                HeaderValue::from_static(EXPOSED_HEADERS),
            );
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
    Ok(res)
}

fn preflight_response(origin: &str) -> Response {
    let mut res = StatusCode::NO_CONTENT.into_response();
    let headers = res.headers_mut();
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    res
}
