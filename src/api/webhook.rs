//! Blockchain Webhook Receiver
//!
//! `POST /webhooks/blockchain/transaction` - push-based detection driver.
//!
//! The sender authenticates with the `x-api-key` shared secret (compared
//! in constant time); a mismatch is the only 401. Everything after
//! authentication answers 200 with a success flag in the body, so a
//! processing hiccup does not put the external notifier into a retry
//! storm; redelivery is harmless because the reconciler is idempotent.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{constant_time_eq, SharedAppState};
use crate::deposit::ReconcileOutcome;
use crate::types::Network;

/// Push notification naming one observed transaction
#[derive(Debug, Deserialize)]
pub struct BlockchainTxPayload {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    pub address: String,
    pub amount: String,
    pub network: String,
}

/// Body-level result; HTTP status is 200 either way
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
}

fn outcome_body(tx_hash: &str, outcome: &ReconcileOutcome) -> WebhookResponse {
    match outcome {
        ReconcileOutcome::Credited(_) => WebhookResponse {
            success: true,
            message: format!("Transaction {} processed successfully", tx_hash),
        },
        ReconcileOutcome::Duplicate => WebhookResponse {
            success: true,
            message: format!("Transaction {} already processed", tx_hash),
        },
        ReconcileOutcome::NotYetConfirmed => WebhookResponse {
            success: false,
            message: format!("Transaction {} awaiting confirmations", tx_hash),
        },
        ReconcileOutcome::Invalid => WebhookResponse {
            success: false,
            message: format!("Transaction {} failed verification", tx_hash),
        },
        ReconcileOutcome::NoMatchingDeposit => WebhookResponse {
            success: false,
            message: format!("No pending deposit for transaction {}", tx_hash),
        },
    }
}

/// POST /webhooks/blockchain/transaction
pub async fn handle_blockchain_transaction(
    State(state): State<SharedAppState>,
    headers: HeaderMap,
    Json(payload): Json<BlockchainTxPayload>,
) -> Response {
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !constant_time_eq(provided, &state.config.webhook_api_key) {
        tracing::warn!(
            target: "custodia::webhook",
            tx_hash = %payload.tx_hash,
            "webhook rejected: invalid API key"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid API key" })),
        )
            .into_response();
    }

    let network: Network = match payload.network.parse() {
        Ok(network) => network,
        Err(e) => {
            return ok_with(WebhookResponse {
                success: false,
                message: format!("Error processing transaction: {}", e),
            })
        }
    };

    let amount: Decimal = match payload.amount.parse() {
        Ok(amount) => amount,
        Err(_) => {
            return ok_with(WebhookResponse {
                success: false,
                message: format!("Error processing transaction: invalid amount {}", payload.amount),
            })
        }
    };

    match state
        .reconciler
        .reconcile(&payload.tx_hash, &payload.address, amount, network)
        .await
    {
        Ok(outcome) => ok_with(outcome_body(&payload.tx_hash, &outcome)),
        Err(e) => {
            tracing::error!(
                target: "custodia::webhook",
                tx_hash = %payload.tx_hash,
                error = %e,
                "webhook reconciliation error"
            );
            ok_with(WebhookResponse {
                success: false,
                message: format!("Error processing transaction: {}", e),
            })
        }
    }
}

fn ok_with(body: WebhookResponse) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}
