pub mod admin;
pub mod history;
pub mod users;

use axum::{Json, http::StatusCode};
use serde::Serialize;

use crate::error::ServiceError;

// Error body shared by every route
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

pub fn error_response(err: &ServiceError) -> (StatusCode, Json<ErrorResponse>) {
    if err.is_quiet() {
        tracing::debug!(%err, "request rejected");
    } else {
        tracing::warn!(%err, "request failed");
    }
    (
        err.status(),
        Json(ErrorResponse {
            success: false,
            code: err.code(),
            message: err.to_string(),
        }),
    )
}
