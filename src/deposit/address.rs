//! Address Issuer
//!
//! Generates a fresh receive address per (user, network) request and
//! persists it as a pending deposit placeholder. The scanner is nudged so
//! the new address joins the next cycle; that registration is a
//! notification, not a synchronous dependency.
//!
//! Key custody is out of scope for this service: only the watch address
//! leaves the issuer, the generated secret key is dropped.

use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::common::{CustodiaError, Result};
use crate::storage::LedgerStore;
use crate::types::{ChainModel, Deposit, Network};

/// Result of issuing a deposit address
#[derive(Debug, Clone)]
pub struct IssuedDeposit {
    pub deposit_id: String,
    pub address: String,
    pub network: Network,
    /// Advisory network fee; may be stale, never a guarantee
    pub fee: Decimal,
}

/// Issues receive addresses and their pending deposit rows
pub struct AddressIssuer {
    store: Arc<dyn LedgerStore>,
    scanner_nudge: Arc<Notify>,
}

impl AddressIssuer {
    pub fn new(store: Arc<dyn LedgerStore>, scanner_nudge: Arc<Notify>) -> Self {
        Self {
            store,
            scanner_nudge,
        }
    }

    /// Issue a fresh address for (user, asset, network) and persist the
    /// pending deposit bound to it.
    pub async fn issue(
        &self,
        user_id: &str,
        asset_id: &str,
        network: Network,
        estimate: Option<Decimal>,
    ) -> Result<IssuedDeposit> {
        if !self.store.user_exists(user_id).await? {
            return Err(CustodiaError::not_found(format!("user {}", user_id)));
        }

        let asset = self
            .store
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| CustodiaError::not_found(format!("asset {}", asset_id)))?;

        let address = generate_address(network)?;

        let deposit = Deposit::new_crypto(
            user_id.to_string(),
            asset.id,
            network,
            address.clone(),
            estimate.unwrap_or(Decimal::ZERO),
        );
        self.store.insert_deposit(&deposit).await?;

        // Wake the scanner so the address is watched without waiting a tick
        self.scanner_nudge.notify_one();

        tracing::info!(
            target: "custodia::issuer",
            user_id,
            asset_id,
            %network,
            address = %address,
            deposit_id = %deposit.id,
            "deposit address issued"
        );

        Ok(IssuedDeposit {
            deposit_id: deposit.id,
            address,
            network,
            fee: network_fee(network),
        })
    }
}

/// Generate a receive address for the network's address model
pub fn generate_address(network: Network) -> Result<String> {
    match network.model() {
        ChainModel::Account => Ok(generate_account_address()),
        // UTXO address derivation needs the custody wallet, which this
        // service does not hold; fail loudly instead of minting an
        // address nobody can watch or spend.
        ChainModel::Utxo => Err(CustodiaError::UnsupportedNetwork(network.to_string())),
    }
}

/// Ethereum-style address: Keccak-256 of the uncompressed public key,
/// last 20 bytes, 0x-hex.
fn generate_account_address() -> String {
    let (_secret_key, public_key) =
        secp256k1::SECP256K1.generate_keypair(&mut rand::thread_rng());

    let uncompressed = public_key.serialize_uncompressed();
    let digest = Keccak256::digest(&uncompressed[1..]);

    format!("0x{}", hex::encode(&digest[12..]))
}

/// Advisory network fee lookup; read-only, may be stale
pub fn network_fee(network: Network) -> Decimal {
    match network {
        Network::Ethereum => Decimal::new(5, 3),  // 0.005
        Network::Bitcoin => Decimal::new(1, 4),   // 0.0001
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryLedgerStore;
    use crate::types::{Asset, DepositStatus, User};

    async fn seeded_issuer() -> (AddressIssuer, Arc<MemoryLedgerStore>) {
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

        let issuer = AddressIssuer::new(store.clone(), Arc::new(Notify::new()));
        (issuer, store)
    }

    #[tokio::test]
    async fn test_issue_creates_pending_deposit() {
        let (issuer, store) = seeded_issuer().await;

        let issued = issuer
            .issue("user-1", "asset-eth", Network::Ethereum, None)
            .await
            .unwrap();

        assert!(issued.address.starts_with("0x"));
        assert_eq!(issued.address.len(), 42);
        assert!(issued.fee > Decimal::ZERO);

        let deposit = store
            .find_pending_by_address(Network::Ethereum, &issued.address)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deposit.id, issued.deposit_id);
        assert_eq!(deposit.status, DepositStatus::Pending);
        assert!(deposit.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_issue_unknown_user_fails() {
        let (issuer, _) = seeded_issuer().await;

        let result = issuer
            .issue("user-unknown", "asset-eth", Network::Ethereum, None)
            .await;
        assert!(matches!(result, Err(CustodiaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_issue_unknown_asset_fails() {
        let (issuer, _) = seeded_issuer().await;

        let result = issuer
            .issue("user-1", "asset-unknown", Network::Ethereum, None)
            .await;
        assert!(matches!(result, Err(CustodiaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_utxo_issuance_unsupported() {
        let (issuer, store) = seeded_issuer().await;

        let result = issuer
            .issue("user-1", "asset-eth", Network::Bitcoin, None)
            .await;
        assert!(matches!(result, Err(CustodiaError::UnsupportedNetwork(_))));

        // No placeholder row may be left behind
        assert!(store.list_pending_crypto().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_addresses_are_unique_per_issue() {
        let (issuer, _) = seeded_issuer().await;

        let first = issuer
            .issue("user-1", "asset-eth", Network::Ethereum, None)
            .await
            .unwrap();
        let second = issuer
            .issue("user-1", "asset-eth", Network::Ethereum, None)
            .await
            .unwrap();

        assert_ne!(first.address, second.address);
    }

    #[test]
    fn test_generated_address_format() {
        let address = generate_account_address();
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
        assert!(address[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
