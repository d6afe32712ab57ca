use axum::Json;
use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

// health handler
pub async fn health_handler(_req: Request<Body>) -> Result<Response, ApiError> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
    .into_response())
}
