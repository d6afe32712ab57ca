use std::any::Any;
use std::collections::HashMap;
use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Request as HttpRequest, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::metrics::{HANDLER_PANICS_TOTAL, REQUEST_LATENCY, REQUEST_TOTAL};

// Upper bound when buffering request bodies in the body guard.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

// Parsed body, attached as a request extension by the body guard.
#[derive(Debug, Clone)]
pub enum ParsedBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

// Parsed cookies, attached as a request extension by the cookie stage.
#[derive(Debug, Clone, Default)]
pub struct Cookies(pub HashMap<String, String>);

// Access/diagnostic log. Records every response, including
// rejections produced further down the chain. No control-flow effect.
pub async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let res = next.run(req).await;

    let elapsed = start.elapsed();
    REQUEST_TOTAL.inc();
    REQUEST_LATENCY.observe(elapsed.as_secs_f64());
    tracing::info!(
        %method,
        path,
        status = res.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "request"
    );
    res
}

// Hardening headers on every response. Non-rejecting.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(header::X_DNS_PREFETCH_CONTROL, HeaderValue::from_static("off"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("0"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=15552000; includeSubDomains"),
    );
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    res
}

// Buffer and validate JSON / URL-encoded bodies, stash the parsed
// value as an extension, and hand the raw bytes back so downstream extractors
// still work. Other content types pass through untouched.
pub async fn body_guard(req: Request, next: Next) -> Result<Response, ApiError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let is_json = content_type.starts_with("application/json");
    let is_form = content_type.starts_with("application/x-www-form-urlencoded");
    if !is_json && !is_form {
        return Ok(next.run(req).await);
    }

    let (mut parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::MalformedBody(e.to_string()))?;

    if is_json {
        if !bytes.is_empty() {
            let value: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::MalformedBody(e.to_string()))?;
            parts.extensions.insert(ParsedBody::Json(value));
        }
    } else {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&bytes)
            .map_err(|e| ApiError::MalformedBody(e.to_string()))?;
        parts.extensions.insert(ParsedBody::Form(pairs));
    }

    let req = HttpRequest::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

// Cookie parsing. Non-rejecting; a missing or garbled header just
// yields an empty map.
pub async fn cookie_guard(mut req: Request, next: Next) -> Response {
    let cookies = req
        .headers()
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(parse_cookie_header)
        .unwrap_or_default();
    req.extensions_mut().insert(Cookies(cookies));
    next.run(req).await
}

pub fn parse_cookie_header(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

// Terminal error stage: a panic anywhere in the inner stages or a business
// handler becomes a structured 500, never a dead worker.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    HANDLER_PANICS_TOTAL.inc();
    tracing::error!(panic = %detail, "request handling panicked");
    ApiError::Internal.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_cookie_pairs() {
        let cookies = parse_cookie_header("session=abc; theme=dark");
        assert_eq!(cookies.get("session").map(String::as_str), Some("abc"));
        assert_eq!(cookies.get("theme").map(String::as_str), Some("dark"));
    }

    #[test]
    fn strips_quotes_and_whitespace() {
        let cookies = parse_cookie_header(r#"  token = "xyz" "#);
        assert_eq!(cookies.get("token").map(String::as_str), Some("xyz"));
    }

    #[test]
    fn ignores_malformed_fragments() {
        let cookies = parse_cookie_header("lonely; =nameless; ok=1");
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies.get("ok").map(String::as_str), Some("1"));
    }

    #[test]
    fn empty_header_is_empty_map() {
        assert!(parse_cookie_header("").is_empty());
    }
}
