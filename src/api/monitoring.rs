//! Monitoring Control Endpoints
//!
//! Administrative surface over the deposit monitor:
//! - `POST /api/monitoring/scan` - run the scanner's pass synchronously
//! - `GET /api/monitoring/status` - monitor state snapshot
//!
//! Both require the `x-admin-key` shared secret.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::{constant_time_eq, SharedAppState};

fn check_admin_key(headers: &HeaderMap, expected: &str) -> bool {
    let provided = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    constant_time_eq(provided, expected)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "Invalid admin key" })),
    )
        .into_response()
}

/// POST /api/monitoring/scan
pub async fn handle_manual_scan(
    State(state): State<SharedAppState>,
    headers: HeaderMap,
) -> Response {
    if !check_admin_key(&headers, &state.config.admin_api_key) {
        return unauthorized();
    }

    tracing::info!(target: "custodia::monitor", "manual scan triggered");
    let addresses_scanned = state.monitor.scan_once().await;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Manual scan completed",
            "addressesScanned": addresses_scanned,
        })),
    )
        .into_response()
}

/// GET /api/monitoring/status
pub async fn handle_monitoring_status(
    State(state): State<SharedAppState>,
    headers: HeaderMap,
) -> Response {
    if !check_admin_key(&headers, &state.config.admin_api_key) {
        return unauthorized();
    }

    let status = state.monitor.status().await;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "active",
            "message": format!(
                "Deposit monitor is running with scheduled scans every {} seconds",
                status.scan_interval_secs
            ),
            "addressesWatched": status.addresses_watched,
            "lastScanAt": status.last_scan_at,
        })),
    )
        .into_response()
}
