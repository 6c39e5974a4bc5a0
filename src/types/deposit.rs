//! Deposit Entity Types
//!
//! A deposit is the unit of reconciliation: one expected inbound payment,
//! either a crypto transfer to a generated address or a card payment
//! handled by an external processor.
//!
//! Lifecycle: pending → confirmed (terminal) or pending → failed (terminal).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chain family a network belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainModel {
    /// Per-address balances, height-based inclusion (Ethereum-style)
    Account,
    /// Discrete spendable outputs, per-output confirmation (Bitcoin-style)
    Utxo,
}

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Network {
    Ethereum,
    Bitcoin,
}

impl Network {
    pub fn model(&self) -> ChainModel {
        match self {
            Network::Ethereum => ChainModel::Account,
            Network::Bitcoin => ChainModel::Utxo,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Ethereum => write!(f, "ETHEREUM"),
            Network::Bitcoin => write!(f, "BITCOIN"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ETHEREUM" | "ETH" => Ok(Network::Ethereum),
            "BITCOIN" | "BTC" => Ok(Network::Bitcoin),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

/// How the deposit enters the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositMethod {
    Card,
    Crypto,
}

impl std::fmt::Display for DepositMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepositMethod::Card => write!(f, "card"),
            DepositMethod::Crypto => write!(f, "crypto"),
        }
    }
}

impl std::str::FromStr for DepositMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(DepositMethod::Card),
            "crypto" => Ok(DepositMethod::Crypto),
            other => Err(format!("unknown deposit method: {}", other)),
        }
    }
}

/// Status of a deposit through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Waiting for the payment to appear and confirm
    Pending,
    /// Credited to the user's balance
    Confirmed,
    /// Terminal failure (card payment failed, or expired pending)
    Failed,
}

impl Default for DepositStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown deposit status: {}", other)),
        }
    }
}

/// A deposit record tracking one expected inbound payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    /// Unique deposit ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Credited asset
    pub asset_id: String,
    /// card or crypto
    pub method: DepositMethod,
    /// Chain the deposit arrives on; None for card deposits
    pub network: Option<Network>,
    /// Generated receive address; None for card deposits
    pub crypto_address: Option<String>,
    /// On-chain transaction hash; set once, unique across all deposits
    pub tx_hash: Option<String>,
    /// Estimate at issuance, overwritten with the observed amount on confirm
    pub amount: Decimal,
    /// Current status
    pub status: DepositStatus,
    /// Highest block already scanned for this address (account-model only)
    pub last_processed_block: Option<u64>,
    /// Transaction hashes already considered for this address; append-only
    pub processed_transactions: Vec<String>,
    /// Set exactly once, on the transition to confirmed
    pub confirmed_at: Option<i64>,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds of last mutation
    pub updated_at: i64,
}

impl Deposit {
    /// Create a pending crypto deposit bound to a generated address
    pub fn new_crypto(
        user_id: String,
        asset_id: String,
        network: Network,
        crypto_address: String,
        amount: Decimal,
    ) -> Self {
        let now = unix_now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            asset_id,
            method: DepositMethod::Crypto,
            network: Some(network),
            crypto_address: Some(crypto_address),
            tx_hash: None,
            amount,
            status: DepositStatus::Pending,
            last_processed_block: None,
            processed_transactions: Vec::new(),
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a pending card deposit (processor-driven, no chain fields)
    pub fn new_card(user_id: String, asset_id: String, amount: Decimal) -> Self {
        let now = unix_now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            asset_id,
            method: DepositMethod::Card,
            network: None,
            crypto_address: None,
            tx_hash: None,
            amount,
            status: DepositStatus::Pending,
            last_processed_block: None,
            processed_transactions: Vec::new(),
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to confirmed. Only valid from pending; the observed
    /// amount replaces any issuance estimate.
    pub fn mark_confirmed(&mut self, tx_hash: Option<String>, amount: Decimal, now: i64) {
        debug_assert_eq!(self.status, DepositStatus::Pending);
        self.tx_hash = tx_hash;
        self.amount = amount;
        self.status = DepositStatus::Confirmed;
        self.confirmed_at = Some(now);
        self.updated_at = now;
    }

    /// Transition to failed. Only valid from pending.
    pub fn mark_failed(&mut self) {
        debug_assert_eq!(self.status, DepositStatus::Pending);
        self.status = DepositStatus::Failed;
        self.touch();
    }

    /// Append a transaction hash to the dedup set. The set only grows;
    /// re-adding an existing hash is a no-op.
    pub fn record_processed_tx(&mut self, tx_hash: &str) {
        if !self.processed_transactions.iter().any(|t| t == tx_hash) {
            self.processed_transactions.push(tx_hash.to_string());
            self.touch();
        }
    }

    /// Advance the scan high-water mark; never moves backwards.
    pub fn advance_processed_block(&mut self, block: u64) {
        if self.last_processed_block.map_or(true, |b| block > b) {
            self.last_processed_block = Some(block);
            self.touch();
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, DepositStatus::Confirmed | DepositStatus::Failed)
    }

    fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
