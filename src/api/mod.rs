//! API Layer Module
//!
//! HTTP surface of the backend: the blockchain webhook, deposit
//! initiation, monitoring control and health.

pub mod deposits;
pub mod monitoring;
pub mod server;
pub mod webhook;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;

use crate::common::CustodiaError;

// Re-exports for convenience
pub use server::{create_router, start_server, AppState, SharedAppState};

/// Constant-time string comparison for API keys. Naive `==` would leak
/// how many leading bytes match through timing.
pub fn constant_time_eq(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Map a service error to an HTTP response with a stable error code
pub fn error_response(err: &CustodiaError) -> Response {
    let status = match err {
        CustodiaError::NotFound(_) => StatusCode::NOT_FOUND,
        CustodiaError::UnsupportedNetwork(_) | CustodiaError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        CustodiaError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = serde_json::json!({
        "error": err.to_string(),
        "code": err.error_code(),
    });

    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secres"));
        assert!(!constant_time_eq("secret", "secretlonger"));
        assert!(!constant_time_eq("", "secret"));
        assert!(constant_time_eq("", ""));
    }
}
