//! Bitcoin Chain Client
//!
//! Reads address activity and per-output confirmations from an
//! Esplora-compatible HTTP API (blockstream.info and friends):
//!
//! - `GET /address/:address/txs` - transactions touching an address
//! - `GET /tx/:txid` - transaction detail with outputs
//! - `GET /blocks/tip/height` - tip height for confirmation math

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{ChainError, UtxoChainApi, UtxoOutput, UtxoTxDetail};

/// Client for an Esplora-compatible API
#[derive(Debug, Clone)]
pub struct BitcoinClient {
    client: Client,
    base_url: String,
}

impl BitcoinClient {
    /// Create a client with a bounded per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get current blockchain tip height
    async fn tip_height(&self) -> Result<u64, ChainError> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::Api(format!(
                "tip height returned {}",
                resp.status()
            )));
        }

        resp.text()
            .await?
            .trim()
            .parse()
            .map_err(|e| ChainError::Parse(format!("invalid height: {}", e)))
    }
}

#[async_trait]
impl UtxoChainApi for BitcoinClient {
    async fn address_transactions(&self, address: &str) -> Result<Vec<String>, ChainError> {
        let url = format!("{}/address/{}/txs", self.base_url, address);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::Api(format!(
                "address lookup for {} returned {}",
                address,
                resp.status()
            )));
        }

        let txs: Vec<EsploraTxSummary> = resp.json().await?;
        Ok(txs.into_iter().map(|t| t.txid).collect())
    }

    async fn transaction_detail(&self, tx_hash: &str) -> Result<UtxoTxDetail, ChainError> {
        let url = format!("{}/tx/{}", self.base_url, tx_hash);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::Api(format!(
                "tx lookup for {} returned {}",
                tx_hash,
                resp.status()
            )));
        }

        let tx: EsploraTx = resp.json().await?;
        let tip = self.tip_height().await?;
        let confirmations = confirmations_at(tip, &tx.status);

        Ok(UtxoTxDetail {
            tx_hash: tx.txid,
            outputs: tx
                .vout
                .into_iter()
                .map(|out| UtxoOutput {
                    address: out.scriptpubkey_address,
                    value_sats: out.value,
                    confirmations,
                })
                .collect(),
        })
    }
}

/// Confirmations for a transaction given the current tip
fn confirmations_at(tip: u64, status: &EsploraTxStatus) -> u32 {
    match (status.confirmed, status.block_height) {
        (true, Some(height)) => (tip.saturating_sub(height) + 1) as u32,
        (true, None) => 1,
        _ => 0,
    }
}

// =============================================================================
// Esplora API Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct EsploraTxSummary {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    vout: Vec<EsploraTxOutput>,
    status: EsploraTxStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraTxOutput {
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_math() {
        let confirmed = EsploraTxStatus {
            confirmed: true,
            block_height: Some(100),
        };
        assert_eq!(confirmations_at(102, &confirmed), 3);
        assert_eq!(confirmations_at(100, &confirmed), 1);

        let mempool = EsploraTxStatus {
            confirmed: false,
            block_height: None,
        };
        assert_eq!(confirmations_at(102, &mempool), 0);
    }

    #[test]
    fn test_tx_deserialization() {
        let body = r#"{
            "txid": "f4184fc5",
            "vout": [
                {"scriptpubkey_address": "bc1qexample", "value": 150000000},
                {"scriptpubkey_address": null, "value": 0}
            ],
            "status": {"confirmed": true, "block_height": 800000}
        }"#;

        let tx: EsploraTx = serde_json::from_str(body).unwrap();
        assert_eq!(tx.txid, "f4184fc5");
        assert_eq!(tx.vout.len(), 2);
        assert_eq!(tx.vout[0].value, 150_000_000);
        assert_eq!(tx.vout[0].scriptpubkey_address.as_deref(), Some("bc1qexample"));
        assert_eq!(tx.status.block_height, Some(800_000));
    }

    #[test]
    fn test_address_txs_deserialization() {
        let body = r#"[{"txid": "aaa"}, {"txid": "bbb"}]"#;
        let txs: Vec<EsploraTxSummary> = serde_json::from_str(body).unwrap();
        let ids: Vec<String> = txs.into_iter().map(|t| t.txid).collect();
        assert_eq!(ids, vec!["aaa", "bbb"]);
    }
}
