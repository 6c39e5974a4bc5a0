//! Custodia Backend - Crypto Deposit Reconciliation
//!
//! Custody/exchange backend whose core is the deposit reconciliation
//! pipeline: map externally observed blockchain transactions to internal
//! user balances, exactly once, under at-least-once delivery from
//! multiple detection sources.
//!
//! ## Pipeline
//!
//! 1. **Address Issuer** creates a pending deposit bound to a fresh address
//! 2. **Detection Drivers** (scheduled scanner, signed webhook, manual
//!    scan) observe chain activity for that address
//! 3. **Transaction Verifier** applies the network's confirmation policy
//! 4. **Deposit Reconciler** performs the atomic locate-verify-credit
//!    transaction against the ledger store
//!
//! The ledger store is the single source of truth for idempotency: a
//! unique transaction-hash constraint plus one all-or-nothing credit
//! transaction make exactly-once crediting hold regardless of which
//! driver wins a race.

pub mod api;
pub mod chain;
pub mod common;
pub mod config;
pub mod deposit;
pub mod logging;
pub mod storage;
pub mod types;

// Re-exports: errors
pub use common::{CustodiaError, Result};

// Re-exports: configuration
pub use config::{AppConfig, ConfigError, Environment};

// Re-exports: chain adapters
pub use chain::{
    AccountChainApi, BitcoinClient, ChainError, EthereumClient, UtxoChainApi,
};

// Re-exports: deposit pipeline
pub use deposit::{
    AddressIssuer, ConfirmationPolicy, DepositMonitor, DepositService, MonitorConfig,
    ReconcileOutcome, Reconciler, TxVerifier, Verdict,
};

// Re-exports: storage
pub use storage::{CreditOutcome, LedgerStore, MemoryLedgerStore, SqliteLedgerStore};

// Re-exports: entities
pub use types::{Asset, Balance, Deposit, DepositMethod, DepositStatus, Network, User};
