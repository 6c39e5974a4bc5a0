//! Storage Trait Definitions
//!
//! Abstract interface over the ledger store: deposits, balances and the
//! reference data they point at. Implementations can use SQLite
//! (production) or in-memory (testing).
//!
//! The store is the single source of truth for idempotency: the unique
//! tx_hash constraint and the atomic confirm-and-credit transaction are
//! what make exactly-once crediting hold under concurrent detection.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{Asset, Balance, Deposit, Network, User};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl StorageError {
    /// Transient store failures worth retrying on the next cycle
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Database(_) | StorageError::Connection(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result of an atomic confirm-and-credit transaction
#[derive(Debug, Clone)]
pub enum CreditOutcome {
    /// Deposit confirmed and balance credited; carries the updated row
    Credited(Deposit),
    /// The transaction hash was already recorded on some deposit
    DuplicateTx,
    /// No pending deposit matched; nothing was credited
    NoPendingDeposit,
}

/// Ledger storage interface
///
/// Implementations:
/// - `SqliteLedgerStore` - Production storage with SQLite
/// - `MemoryLedgerStore` - In-memory storage for testing
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // --- deposits ---

    /// Insert a new deposit record
    async fn insert_deposit(&self, deposit: &Deposit) -> StorageResult<()>;

    /// Get a deposit by ID
    async fn get_deposit(&self, id: &str) -> StorageResult<Option<Deposit>>;

    /// Find the deposit holding a transaction hash, if any
    async fn find_deposit_by_tx_hash(&self, tx_hash: &str) -> StorageResult<Option<Deposit>>;

    /// Find the pending crypto deposit bound to an address on a network
    async fn find_pending_by_address(
        &self,
        network: Network,
        address: &str,
    ) -> StorageResult<Option<Deposit>>;

    /// All pending crypto deposits with a receive address (scanner input)
    async fn list_pending_crypto(&self) -> StorageResult<Vec<Deposit>>;

    /// A user's deposits, newest first
    async fn list_user_deposits(&self, user_id: &str) -> StorageResult<Vec<Deposit>>;

    /// Append a transaction hash to a deposit's dedup set (append-only)
    async fn mark_tx_processed(&self, deposit_id: &str, tx_hash: &str) -> StorageResult<()>;

    /// Advance a deposit's scan high-water mark; never moves backwards
    async fn advance_processed_block(&self, deposit_id: &str, block: u64) -> StorageResult<()>;

    /// Transition a pending deposit to failed. Returns false if the
    /// deposit was not pending (terminal states are never left).
    async fn fail_deposit(&self, deposit_id: &str) -> StorageResult<bool>;

    /// Atomically locate the pending deposit for (network, address), set
    /// tx_hash/amount/confirmed/confirmed_at, and credit the balance.
    /// All-or-nothing: any failure leaves both rows untouched.
    async fn confirm_and_credit(
        &self,
        network: Network,
        address: &str,
        tx_hash: &str,
        amount: Decimal,
        now: i64,
    ) -> StorageResult<CreditOutcome>;

    /// Card-path sibling of `confirm_and_credit`: confirm a pending card
    /// deposit by ID and credit the balance in one transaction.
    async fn confirm_and_credit_by_id(
        &self,
        deposit_id: &str,
        amount: Decimal,
        now: i64,
    ) -> StorageResult<CreditOutcome>;

    /// Deposit counts keyed by status string (operator visibility)
    async fn count_by_status(&self) -> StorageResult<std::collections::HashMap<String, u64>>;

    // --- balances ---

    /// Get the balance row for a (user, asset) pair
    async fn get_balance(&self, user_id: &str, asset_id: &str) -> StorageResult<Option<Balance>>;

    // --- reference data ---

    /// Insert a user (registration itself lives elsewhere)
    async fn insert_user(&self, user: &User) -> StorageResult<()>;

    /// Check a user exists
    async fn user_exists(&self, user_id: &str) -> StorageResult<bool>;

    /// Insert an asset
    async fn insert_asset(&self, asset: &Asset) -> StorageResult<()>;

    /// Get an asset by ID
    async fn get_asset(&self, asset_id: &str) -> StorageResult<Option<Asset>>;
}
