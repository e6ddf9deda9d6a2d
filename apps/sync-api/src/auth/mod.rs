pub mod middleware;
pub mod verifier;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Rejection returned when a bearer credential is missing or invalid, or the
/// identity it names cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthError {
    pub message: &'static str,
}

impl AuthError {
    pub const fn new(message: &'static str) -> Self {
        Self { message }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}
