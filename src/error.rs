use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// Request-level errors. Every rejection the pipeline can produce ends up here,
// and the terminal contract is a JSON body of {status, message}.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not allowed by CORS")]
    CorsForbidden,

    #[error("too many requests, try again later")]
    RateLimited,

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("route not found: {0}")]
    NotFound(String),

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CorsForbidden => StatusCode::FORBIDDEN,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "status": status.as_u16(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
