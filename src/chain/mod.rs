//! Chain Adapter Module
//!
//! Per-network clients that read transaction and confirmation data from
//! public chain APIs. Two capability sets, one per chain family:
//!
//! - [`AccountChainApi`] - account-model chains (Ethereum-style): incoming
//!   transfers by height range, per-transaction execution status, tip height
//! - [`UtxoChainApi`] - UTXO-model chains (Bitcoin-style): transactions
//!   touching an address, per-output confirmations
//!
//! Adapters never partially apply: a failed fetch yields no observations.
//! Every [`ChainError`] is retryable from the caller's point of view.

pub mod bitcoin;
pub mod ethereum;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

pub use bitcoin::BitcoinClient;
pub use ethereum::EthereumClient;

/// Chain adapter errors; all transient/retryable by contract
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream API error: {0}")]
    Api(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// One inbound transfer observed on an account-model chain
#[derive(Debug, Clone, PartialEq)]
pub struct AccountTransfer {
    pub tx_hash: String,
    pub to: String,
    /// Native-unit amount (e.g. ETH), already scaled from base units
    pub value: Decimal,
    pub block_height: u64,
}

/// Execution status of an account-model transaction
#[derive(Debug, Clone, PartialEq)]
pub struct AccountTxStatus {
    /// None while the transaction is unmined or unknown
    pub block_height: Option<u64>,
    /// On-chain execution success flag; only meaningful once mined
    pub success: bool,
}

/// One output of a UTXO-model transaction
#[derive(Debug, Clone, PartialEq)]
pub struct UtxoOutput {
    pub address: Option<String>,
    pub value_sats: u64,
    pub confirmations: u32,
}

/// Detail of a UTXO-model transaction
#[derive(Debug, Clone, PartialEq)]
pub struct UtxoTxDetail {
    pub tx_hash: String,
    pub outputs: Vec<UtxoOutput>,
}

/// Account-model chain capabilities
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountChainApi: Send + Sync {
    /// Inbound transfers to `address` at or above `from_height`,
    /// ascending by block
    async fn incoming_transfers(
        &self,
        address: &str,
        from_height: u64,
    ) -> Result<Vec<AccountTransfer>, ChainError>;

    /// Execution status for a transaction hash
    async fn transaction_status(&self, tx_hash: &str) -> Result<AccountTxStatus, ChainError>;

    /// Current chain tip height
    async fn current_height(&self) -> Result<u64, ChainError>;
}

/// UTXO-model chain capabilities
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UtxoChainApi: Send + Sync {
    /// Hashes of transactions touching `address`
    async fn address_transactions(&self, address: &str) -> Result<Vec<String>, ChainError>;

    /// Full transaction detail with per-output confirmations
    async fn transaction_detail(&self, tx_hash: &str) -> Result<UtxoTxDetail, ChainError>;
}

/// Satoshis per bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Convert satoshis to a BTC-denominated decimal
pub fn sats_to_btc(sats: u64) -> Decimal {
    Decimal::from_i128_with_scale(sats as i128, 8)
}

/// Convert a wei amount (base-unit string) to an ETH-denominated decimal
pub fn wei_to_eth(wei: &str) -> Result<Decimal, ChainError> {
    let raw: i128 = wei
        .parse()
        .map_err(|_| ChainError::Parse(format!("invalid wei amount: {}", wei)))?;
    Ok(Decimal::from_i128_with_scale(raw, 18))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sats_to_btc() {
        assert_eq!(sats_to_btc(150_000_000), "1.5".parse::<Decimal>().unwrap());
        assert_eq!(sats_to_btc(1), "0.00000001".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_wei_to_eth() {
        assert_eq!(
            wei_to_eth("1500000000000000000").unwrap(),
            "1.5".parse::<Decimal>().unwrap()
        );
        assert!(wei_to_eth("not-a-number").is_err());
    }
}
