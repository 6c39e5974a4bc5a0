//! Ethereum Chain Client
//!
//! Reads account activity and transaction status from an
//! Etherscan-compatible HTTP API:
//!
//! - `module=account&action=txlist` - inbound transfer history
//! - `module=proxy&action=eth_getTransactionReceipt` - execution status
//! - `module=proxy&action=eth_blockNumber` - tip height

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{wei_to_eth, AccountChainApi, AccountTransfer, AccountTxStatus, ChainError};

/// Client for an Etherscan-compatible API
#[derive(Debug, Clone)]
pub struct EthereumClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EthereumClient {
    /// Create a client with a bounded per-request timeout
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        query: &[(&str, &str)],
    ) -> Result<T, ChainError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ChainError::Api(format!(
                "unexpected HTTP status {}",
                resp.status()
            )));
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl AccountChainApi for EthereumClient {
    async fn incoming_transfers(
        &self,
        address: &str,
        from_height: u64,
    ) -> Result<Vec<AccountTransfer>, ChainError> {
        let from = from_height.to_string();
        let response: TxListResponse = self
            .get_json(&[
                ("module", "account"),
                ("action", "txlist"),
                ("address", address),
                ("startblock", &from),
                ("endblock", "latest"),
                ("sort", "asc"),
            ])
            .await?;

        // Etherscan signals "no transactions" through status 0
        if response.status != "1" {
            if response.message.to_lowercase().contains("no transactions") {
                return Ok(Vec::new());
            }
            return Err(ChainError::Api(response.message));
        }

        let entries: Vec<EtherscanTx> = serde_json::from_value(response.result)
            .map_err(|e| ChainError::Parse(format!("txlist result: {}", e)))?;

        let address_lower = address.to_lowercase();
        let mut transfers = Vec::new();
        for tx in entries {
            // `to` is null for contract creations
            let Some(to) = tx.to else { continue };
            if to.to_lowercase() != address_lower {
                continue;
            }
            let value = wei_to_eth(&tx.value)?;
            if value.is_zero() {
                continue;
            }
            let block_height: u64 = tx
                .block_number
                .parse()
                .map_err(|_| ChainError::Parse(format!("invalid block number: {}", tx.block_number)))?;
            transfers.push(AccountTransfer {
                tx_hash: tx.hash,
                to,
                value,
                block_height,
            });
        }

        Ok(transfers)
    }

    async fn transaction_status(&self, tx_hash: &str) -> Result<AccountTxStatus, ChainError> {
        let response: ProxyResponse = self
            .get_json(&[
                ("module", "proxy"),
                ("action", "eth_getTransactionReceipt"),
                ("txhash", tx_hash),
            ])
            .await?;

        // Null receipt: unmined or not yet indexed. Not a failure.
        let Some(receipt) = response.result else {
            return Ok(AccountTxStatus {
                block_height: None,
                success: true,
            });
        };

        let receipt: EthReceipt = serde_json::from_value(receipt)
            .map_err(|e| ChainError::Parse(format!("receipt: {}", e)))?;

        Ok(AccountTxStatus {
            block_height: receipt
                .block_number
                .as_deref()
                .map(parse_hex_u64)
                .transpose()?,
            success: receipt.status.as_deref() != Some("0x0"),
        })
    }

    async fn current_height(&self) -> Result<u64, ChainError> {
        let response: ProxyResponse = self
            .get_json(&[("module", "proxy"), ("action", "eth_blockNumber")])
            .await?;

        let height = response
            .result
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| ChainError::Parse("missing block number".to_string()))?;

        parse_hex_u64(&height)
    }
}

/// Parse a 0x-prefixed hex quantity
fn parse_hex_u64(s: &str) -> Result<u64, ChainError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| ChainError::Parse(format!("invalid hex quantity: {}", s)))
}

// =============================================================================
// Etherscan API Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TxListResponse {
    status: String,
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EtherscanTx {
    hash: String,
    to: Option<String>,
    value: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EthReceipt {
    status: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
}
