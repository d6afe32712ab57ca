use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};

use crate::error::ApiError;

pub async fn metrics_handler(_req: Request<Body>) -> Result<Response, ApiError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        tracing::error!(error = %e, "failed to encode metrics");
        ApiError::Internal
    })?;
    let text = String::from_utf8(buffer).map_err(|_| ApiError::Internal)?;
    Ok(text.into_response())
}
