//! Custodia Backend - Service Launcher
//!
//! Run modes:
//!   custodia-api api     - REST API server + background deposit monitor
//!   custodia-api scan    - one synchronous scan pass, then exit
//!
//! Configuration comes from CUSTODIA_* environment variables (see
//! config.rs); a .env file is honored in development.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};

use custodia::api::{start_server, AppState};
use custodia::chain::{AccountChainApi, BitcoinClient, EthereumClient, UtxoChainApi};
use custodia::config::{AppConfig, Environment};
use custodia::deposit::{
    AddressIssuer, ConfirmationPolicy, DepositMonitor, DepositService, MonitorConfig, Reconciler,
    TxVerifier,
};
use custodia::logging;
use custodia::storage::{LedgerStore, SqliteLedgerStore};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("help");

    if matches!(mode, "help" | "--help" | "-h") {
        print_usage();
        return;
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_from_config(&config) {
        eprintln!("logging error: {}", e);
        std::process::exit(1);
    }

    if config.env == Environment::Production {
        if let Err(e) = config.validate_for_production() {
            tracing::error!(target: "custodia::main", error = %e, "not production ready");
            std::process::exit(1);
        }
    }

    config.log_summary();

    let app = match build_app(&config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(target: "custodia::main", error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    match mode {
        "api" => run_api(app, config).await,
        "scan" => run_scan(app).await,
        other => {
            eprintln!("unknown mode: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Custodia Backend - Deposit Reconciliation Service");
    println!();
    println!("Usage:");
    println!("  custodia-api api     Start REST API server + deposit monitor");
    println!("  custodia-api scan    Run one scan pass over pending addresses");
    println!();
    println!("Environment Variables:");
    println!("  CUSTODIA_ENV                  production | staging | development");
    println!("  CUSTODIA_API_PORT             REST API port (default: 3001)");
    println!("  CUSTODIA_DATABASE_PATH        SQLite database file");
    println!("  CUSTODIA_ETHEREUM_API         Etherscan-compatible endpoint");
    println!("  CUSTODIA_ETHEREUM_API_KEY     API key for the Ethereum endpoint");
    println!("  CUSTODIA_BITCOIN_API          Esplora-compatible endpoint");
    println!("  CUSTODIA_WEBHOOK_API_KEY      Webhook shared secret");
    println!("  CUSTODIA_ADMIN_API_KEY        Monitoring endpoints shared secret");
    println!("  CUSTODIA_ETH_CONFIRMATIONS    Account-model threshold (default: 12)");
    println!("  CUSTODIA_BTC_CONFIRMATIONS    UTXO-model threshold (default: 3)");
    println!("  CUSTODIA_SCAN_INTERVAL_SECS   Scanner interval (default: 300)");
}

/// Wired application components
struct App {
    state: custodia::api::SharedAppState,
    monitor: Arc<DepositMonitor>,
}

/// Construct every component against the configured store and chain APIs
fn build_app(config: &AppConfig) -> custodia::Result<App> {
    let store: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::new(&config.database_path)?);

    let timeout = Duration::from_secs(config.chain_timeout_secs);
    let account: Arc<dyn AccountChainApi> = Arc::new(EthereumClient::new(
        &config.ethereum_api_url,
        &config.ethereum_api_key,
        timeout,
    ));
    let utxo: Arc<dyn UtxoChainApi> =
        Arc::new(BitcoinClient::new(&config.bitcoin_api_url, timeout));

    let verifier = TxVerifier::new(
        account.clone(),
        utxo.clone(),
        ConfirmationPolicy {
            account_confirmations: config.account_confirmations,
            utxo_confirmations: config.utxo_confirmations,
        },
    );
    let reconciler = Arc::new(Reconciler::new(store.clone(), verifier));

    let nudge = Arc::new(Notify::new());
    let monitor = Arc::new(DepositMonitor::new(
        store.clone(),
        reconciler.clone(),
        account,
        utxo,
        MonitorConfig {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            batch_size: config.scan_batch_size,
            batch_delay: Duration::from_millis(config.scan_batch_delay_ms),
            pending_ttl: config.pending_deposit_ttl_secs.map(Duration::from_secs),
        },
        nudge.clone(),
    ));

    let issuer = AddressIssuer::new(store.clone(), nudge);
    let deposits = DepositService::new(store.clone(), issuer);

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        reconciler,
        monitor: monitor.clone(),
        deposits,
    });

    Ok(App { state, monitor })
}

/// API mode: HTTP server plus the background monitor, both stopped on
/// ctrl-c.
async fn run_api(app: App, config: AppConfig) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(app.monitor.clone().run(shutdown_rx));

    if let Err(e) = start_server(app.state, config.api_port).await {
        tracing::error!(target: "custodia::main", error = %e, "API server error");
    }

    // Server is down (ctrl-c or bind failure); stop the monitor too
    let _ = shutdown_tx.send(true);
    let _ = monitor_task.await;

    tracing::info!(target: "custodia::main", "shutdown complete");
}

/// Scan mode: one synchronous pass, report, exit
async fn run_scan(app: App) {
    let scanned = app.monitor.scan_once().await;
    tracing::info!(target: "custodia::main", scanned, "scan complete");
    println!("Scanned {} pending deposit addresses", scanned);
}
