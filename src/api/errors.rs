use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::error;
use crate::errors::ScanError;

impl ScanError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ScanError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ScanError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ScanError::Forbidden(_) => StatusCode::FORBIDDEN,
            ScanError::NotFound(_) => StatusCode::NOT_FOUND,
            ScanError::Conflict(_) => StatusCode::CONFLICT,
            ScanError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            ScanError::Engine(_) => StatusCode::BAD_GATEWAY,
            ScanError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ScanError::Persistence(_)
            | ScanError::PartialWrite(_)
            | ScanError::Config(_)
            | ScanError::Io(_)
            | ScanError::Json(_)
            | ScanError::Yaml(_)
            | ScanError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ScanError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let kind = self.classify().error_type;
        let message = if status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED {
            error!(error = %self, kind, "Request failed");
            // Store details stay in the log.
            match self {
                ScanError::Persistence(_) | ScanError::PartialWrite(_) => "Scan store unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(json!({"error": message, "kind": kind}))).into_response()
    }
}

// Malformed bodies and query strings are client errors like any other
// validation failure.
impl From<JsonRejection> for ScanError {
    fn from(rejection: JsonRejection) -> Self {
        ScanError::InvalidInput(rejection.body_text())
    }
}

impl From<QueryRejection> for ScanError {
    fn from(rejection: QueryRejection) -> Self {
        ScanError::InvalidInput(rejection.body_text())
    }
}
