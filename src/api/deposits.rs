//! Deposit Endpoints
//!
//! - `POST /api/deposits/crypto` - issue a receive address
//! - `POST /api/deposits/card` - record a pending card deposit
//! - `GET /api/deposits/user/:user_id` - deposit history

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{error_response, SharedAppState};
use crate::common::CustodiaError;
use crate::types::Network;

/// POST /api/deposits/crypto request body
#[derive(Debug, Deserialize)]
pub struct CryptoDepositRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "assetId")]
    pub asset_id: String,
    pub network: String,
    /// Optional caller estimate; the observed on-chain amount wins
    pub amount: Option<Decimal>,
}

/// POST /api/deposits/crypto response body
#[derive(Debug, Serialize)]
pub struct CryptoDepositResponse {
    pub address: String,
    pub network: Network,
    pub fee: Decimal,
    #[serde(rename = "depositId")]
    pub deposit_id: String,
}

/// POST /api/deposits/card request body
#[derive(Debug, Deserialize)]
pub struct CardDepositRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "assetId")]
    pub asset_id: String,
    pub amount: Decimal,
}

/// POST /api/deposits/crypto
pub async fn handle_initiate_crypto_deposit(
    State(state): State<SharedAppState>,
    Json(req): Json<CryptoDepositRequest>,
) -> Response {
    let network: Network = match req.network.parse() {
        Ok(network) => network,
        Err(e) => return error_response(&CustodiaError::UnsupportedNetwork(e)),
    };

    match state
        .deposits
        .initiate_crypto_deposit(&req.user_id, &req.asset_id, network, req.amount)
        .await
    {
        Ok(issued) => (
            StatusCode::OK,
            Json(CryptoDepositResponse {
                address: issued.address,
                network: issued.network,
                fee: issued.fee,
                deposit_id: issued.deposit_id,
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/deposits/card
pub async fn handle_initiate_card_deposit(
    State(state): State<SharedAppState>,
    Json(req): Json<CardDepositRequest>,
) -> Response {
    match state
        .deposits
        .initiate_card_deposit(&req.user_id, &req.asset_id, req.amount)
        .await
    {
        Ok(deposit) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "depositId": deposit.id,
                "status": deposit.status,
                "amount": deposit.amount,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/deposits/user/:user_id
pub async fn handle_list_user_deposits(
    State(state): State<SharedAppState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.deposits.user_deposits(&user_id).await {
        Ok(deposits) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "count": deposits.len(),
                "deposits": deposits,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::server::tests::{test_state, TestChainState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_initiate_crypto_deposit() {
        let (app, _state) = test_state(TestChainState::confirmed()).await;

        let response = app
            .oneshot(post_json(
                "/api/deposits/crypto",
                serde_json::json!({
                    "userId": "user-1",
                    "assetId": "asset-eth",
                    "network": "ETHEREUM"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["address"].as_str().unwrap().starts_with("0x"));
        assert_eq!(body["network"], "ETHEREUM");
        assert!(body["depositId"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_initiate_crypto_deposit_unknown_user_is_404() {
        let (app, _state) = test_state(TestChainState::confirmed()).await;

        let response = app
            .oneshot(post_json(
                "/api/deposits/crypto",
                serde_json::json!({
                    "userId": "user-x",
                    "assetId": "asset-eth",
                    "network": "ETHEREUM"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_initiate_crypto_deposit_utxo_network_is_400() {
        let (app, _state) = test_state(TestChainState::confirmed()).await;

        let response = app
            .oneshot(post_json(
                "/api/deposits/crypto",
                serde_json::json!({
                    "userId": "user-1",
                    "assetId": "asset-eth",
                    "network": "BITCOIN"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "UNSUPPORTED_NETWORK");
    }

    #[tokio::test]
    async fn test_card_deposit_and_listing() {
        let (app, _state) = test_state(TestChainState::confirmed()).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/deposits/card",
                serde_json::json!({
                    "userId": "user-1",
                    "assetId": "asset-eth",
                    "amount": "100"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "pending");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/deposits/user/user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        // The seeded pending crypto deposit plus the card deposit
        assert_eq!(body["count"], 2);
    }
}
