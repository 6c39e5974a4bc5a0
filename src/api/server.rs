//! API Server
//!
//! Axum application builder and server startup: application state, the
//! route table, and the listener.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::{deposits, monitoring, webhook};
use crate::config::AppConfig;
use crate::deposit::{DepositMonitor, DepositService, Reconciler};
use crate::storage::LedgerStore;

/// Combined application state for all API endpoints
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn LedgerStore>,
    pub reconciler: Arc<Reconciler>,
    pub monitor: Arc<DepositMonitor>,
    pub deposits: DepositService,
}

/// Shared application state type
pub type SharedAppState = Arc<AppState>;

/// Build the API router
pub fn create_router(state: SharedAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Detection driver: signed push notifications
        .route(
            "/webhooks/blockchain/transaction",
            post(webhook::handle_blockchain_transaction),
        )
        // Deposit initiation and history
        .route(
            "/api/deposits/crypto",
            post(deposits::handle_initiate_crypto_deposit),
        )
        .route(
            "/api/deposits/card",
            post(deposits::handle_initiate_card_deposit),
        )
        .route(
            "/api/deposits/user/:user_id",
            get(deposits::handle_list_user_deposits),
        )
        // Monitoring control (admin)
        .route("/api/monitoring/scan", post(monitoring::handle_manual_scan))
        .route(
            "/api/monitoring/status",
            get(monitoring::handle_monitoring_status),
        )
        // Health check
        .route("/api/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// GET /api/health
async fn handle_health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "custodia-backend",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Start the API server on the given port
pub async fn start_server(state: SharedAppState, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(target: "custodia::api", %addr, "API server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!(target: "custodia::api", "could not install ctrl-c handler");
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::chain::{
        AccountChainApi, AccountTransfer, AccountTxStatus, MockAccountChainApi, MockUtxoChainApi,
        UtxoChainApi,
    };
    use crate::config::Environment;
    use crate::deposit::{AddressIssuer, ConfirmationPolicy, MonitorConfig, TxVerifier};
    use crate::storage::MemoryLedgerStore;
    use crate::types::{Asset, Deposit, Network, User};
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    /// What the mocked account chain reports for any transaction
    #[derive(Clone)]
    pub struct TestChainState {
        pub status: AccountTxStatus,
        pub tip: u64,
    }

    impl TestChainState {
        /// A successful transfer 20 blocks deep
        pub fn confirmed() -> Self {
            Self {
                status: AccountTxStatus {
                    block_height: Some(100),
                    success: true,
                },
                tip: 120,
            }
        }
    }

    /// Handles the API tests poke at directly
    pub struct TestState {
        pub store: Arc<dyn LedgerStore>,
        pub monitor: Arc<DepositMonitor>,
        pub seeded_address: String,
    }

    fn test_config() -> AppConfig {
        AppConfig {
            env: Environment::Development,
            api_port: 0,
            database_path: ":memory:".to_string(),
            ethereum_api_url: "http://localhost:0".to_string(),
            ethereum_api_key: String::new(),
            bitcoin_api_url: "http://localhost:0".to_string(),
            chain_timeout_secs: 1,
            webhook_api_key: "test-webhook-key".to_string(),
            admin_api_key: "test-admin-key".to_string(),
            account_confirmations: 12,
            utxo_confirmations: 3,
            scan_interval_secs: 1,
            scan_batch_size: 5,
            scan_batch_delay_ms: 0,
            pending_deposit_ttl_secs: None,
            log_level: "info".to_string(),
        }
    }

    /// Full app wired against an in-memory store and mocked chains, with
    /// one user, one asset, and one pending deposit at `seeded_address`.
    /// The mocked chain reports transaction `0xabc123` paying that
    /// address 1.5 ETH at block 100.
    pub async fn test_state(chain: TestChainState) -> (Router, TestState) {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .insert_user(&User {
                id: "user-1".to_string(),
                email: "u1@example.com".to_string(),
            })
            .await
            .unwrap();
        store
            .insert_asset(&Asset {
                id: "asset-eth".to_string(),
                symbol: "ETH".to_string(),
                name: "Ether".to_string(),
                network: "ETHEREUM".to_string(),
                contract_address: None,
                decimals: 18,
            })
            .await
            .unwrap();

        let seeded_address = "0x00000000000000000000000000000000000000aa".to_string();
        let deposit = Deposit::new_crypto(
            "user-1".to_string(),
            "asset-eth".to_string(),
            Network::Ethereum,
            seeded_address.clone(),
            Decimal::ZERO,
        );
        store.insert_deposit(&deposit).await.unwrap();

        let mut account = MockAccountChainApi::new();
        let status = chain.status.clone();
        account
            .expect_transaction_status()
            .returning(move |_| Ok(status.clone()));
        let tip = chain.tip;
        account.expect_current_height().returning(move || Ok(tip));
        let transfer_to = seeded_address.clone();
        account.expect_incoming_transfers().returning(move |_, _| {
            Ok(vec![AccountTransfer {
                tx_hash: "0xabc123".to_string(),
                to: transfer_to.clone(),
                value: "1.5".parse().unwrap(),
                block_height: 100,
            }])
        });

        let account: Arc<dyn AccountChainApi> = Arc::new(account);
        let utxo: Arc<dyn UtxoChainApi> = Arc::new(MockUtxoChainApi::new());

        let verifier = TxVerifier::new(
            account.clone(),
            utxo.clone(),
            ConfirmationPolicy::default(),
        );
        let reconciler = Arc::new(Reconciler::new(store.clone(), verifier));

        let nudge = Arc::new(Notify::new());
        let monitor = Arc::new(DepositMonitor::new(
            store.clone(),
            reconciler.clone(),
            account,
            utxo,
            MonitorConfig {
                scan_interval: Duration::from_secs(1),
                batch_size: 5,
                batch_delay: Duration::from_millis(0),
                pending_ttl: None,
            },
            nudge.clone(),
        ));

        let issuer = AddressIssuer::new(store.clone(), nudge);
        let deposits = DepositService::new(store.clone(), issuer);

        let state = Arc::new(AppState {
            config: test_config(),
            store: store.clone(),
            reconciler,
            monitor: monitor.clone(),
            deposits,
        });

        let router = create_router(state);
        (
            router,
            TestState {
                store,
                monitor,
                seeded_address,
            },
        )
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _state) = test_state(TestChainState::confirmed()).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (app, _state) = test_state(TestChainState::confirmed()).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
