//! In-Memory Storage Implementation
//!
//! Ledger store backed by process memory, for testing and development.
//! Data is lost when the service restarts.
//!
//! A single RwLock over the whole ledger makes every operation atomic,
//! which matches the transactional guarantees the SQLite store provides.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{CreditOutcome, LedgerStore, StorageError, StorageResult};
use crate::types::{Asset, Balance, Deposit, DepositMethod, DepositStatus, Network, User};

#[derive(Default)]
struct Inner {
    deposits: HashMap<String, Deposit>,
    balances: HashMap<(String, String), Balance>,
    users: HashMap<String, User>,
    assets: HashMap<String, Asset>,
}

/// In-memory ledger store
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryLedgerStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_deposit(&self, deposit: &Deposit) -> StorageResult<()> {
        let mut inner = self.inner.write().await;

        if inner.deposits.contains_key(&deposit.id) {
            return Err(StorageError::Duplicate(deposit.id.clone()));
        }

        if let Some(hash) = &deposit.tx_hash {
            if inner.deposits.values().any(|d| d.tx_hash.as_ref() == Some(hash)) {
                return Err(StorageError::Duplicate(hash.clone()));
            }
        }

        // One active pending deposit per (network, address)
        if let (Some(network), Some(address)) = (deposit.network, &deposit.crypto_address) {
            let taken = inner.deposits.values().any(|d| {
                d.status == DepositStatus::Pending
                    && d.network == Some(network)
                    && d.crypto_address.as_ref() == Some(address)
            });
            if taken {
                return Err(StorageError::Duplicate(address.clone()));
            }
        }

        inner.deposits.insert(deposit.id.clone(), deposit.clone());
        Ok(())
    }

    async fn get_deposit(&self, id: &str) -> StorageResult<Option<Deposit>> {
        let inner = self.inner.read().await;
        Ok(inner.deposits.get(id).cloned())
    }

    async fn find_deposit_by_tx_hash(&self, tx_hash: &str) -> StorageResult<Option<Deposit>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deposits
            .values()
            .find(|d| d.tx_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    async fn find_pending_by_address(
        &self,
        network: Network,
        address: &str,
    ) -> StorageResult<Option<Deposit>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deposits
            .values()
            .find(|d| {
                d.status == DepositStatus::Pending
                    && d.network == Some(network)
                    && d.crypto_address.as_deref() == Some(address)
            })
            .cloned())
    }

    async fn list_pending_crypto(&self) -> StorageResult<Vec<Deposit>> {
        let inner = self.inner.read().await;
        let mut deposits: Vec<Deposit> = inner
            .deposits
            .values()
            .filter(|d| {
                d.status == DepositStatus::Pending
                    && d.method == DepositMethod::Crypto
                    && d.crypto_address.is_some()
            })
            .cloned()
            .collect();
        deposits.sort_by_key(|d| d.created_at);
        Ok(deposits)
    }

    async fn list_user_deposits(&self, user_id: &str) -> StorageResult<Vec<Deposit>> {
        let inner = self.inner.read().await;
        let mut deposits: Vec<Deposit> = inner
            .deposits
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        deposits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deposits)
    }

    async fn mark_tx_processed(&self, deposit_id: &str, tx_hash: &str) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let deposit = inner
            .deposits
            .get_mut(deposit_id)
            .ok_or_else(|| StorageError::NotFound(deposit_id.to_string()))?;
        deposit.record_processed_tx(tx_hash);
        Ok(())
    }

    async fn advance_processed_block(&self, deposit_id: &str, block: u64) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let deposit = inner
            .deposits
            .get_mut(deposit_id)
            .ok_or_else(|| StorageError::NotFound(deposit_id.to_string()))?;
        deposit.advance_processed_block(block);
        Ok(())
    }

    async fn fail_deposit(&self, deposit_id: &str) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.deposits.get_mut(deposit_id) {
            Some(deposit) if deposit.status == DepositStatus::Pending => {
                deposit.mark_failed();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn confirm_and_credit(
        &self,
        network: Network,
        address: &str,
        tx_hash: &str,
        amount: Decimal,
        now: i64,
    ) -> StorageResult<CreditOutcome> {
        let mut inner = self.inner.write().await;

        if inner.deposits.values().any(|d| d.tx_hash.as_deref() == Some(tx_hash)) {
            return Ok(CreditOutcome::DuplicateTx);
        }

        let deposit_id = match inner.deposits.values().find(|d| {
            d.status == DepositStatus::Pending
                && d.network == Some(network)
                && d.crypto_address.as_deref() == Some(address)
        }) {
            Some(d) => d.id.clone(),
            None => return Ok(CreditOutcome::NoPendingDeposit),
        };

        // Validate before mutating anything; the write lock makes the
        // deposit update and balance upsert a single atomic step.
        if amount <= Decimal::ZERO {
            return Err(StorageError::InvalidData(format!(
                "deposit credit must be positive, got {}",
                amount
            )));
        }

        let Some(deposit) = inner.deposits.get_mut(&deposit_id) else {
            return Ok(CreditOutcome::NoPendingDeposit);
        };
        deposit.mark_confirmed(Some(tx_hash.to_string()), amount, now);
        let credited = deposit.clone();

        let key = (credited.user_id.clone(), credited.asset_id.clone());
        let balance = inner
            .balances
            .entry(key)
            .or_insert_with(|| Balance::new(credited.user_id.clone(), credited.asset_id.clone()));
        balance.balance += amount;
        balance.updated_at = now;

        Ok(CreditOutcome::Credited(credited))
    }

    async fn confirm_and_credit_by_id(
        &self,
        deposit_id: &str,
        amount: Decimal,
        now: i64,
    ) -> StorageResult<CreditOutcome> {
        let mut inner = self.inner.write().await;

        match inner.deposits.get(deposit_id) {
            Some(d) if d.status == DepositStatus::Pending => {}
            _ => return Ok(CreditOutcome::NoPendingDeposit),
        }

        if amount <= Decimal::ZERO {
            return Err(StorageError::InvalidData(format!(
                "deposit credit must be positive, got {}",
                amount
            )));
        }

        let Some(deposit) = inner.deposits.get_mut(deposit_id) else {
            return Ok(CreditOutcome::NoPendingDeposit);
        };
        deposit.mark_confirmed(None, amount, now);
        let credited = deposit.clone();

        let key = (credited.user_id.clone(), credited.asset_id.clone());
        let balance = inner
            .balances
            .entry(key)
            .or_insert_with(|| Balance::new(credited.user_id.clone(), credited.asset_id.clone()));
        balance.balance += amount;
        balance.updated_at = now;

        Ok(CreditOutcome::Credited(credited))
    }

    async fn count_by_status(&self) -> StorageResult<HashMap<String, u64>> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for deposit in inner.deposits.values() {
            *counts.entry(deposit.status.to_string()).or_insert(0u64) += 1;
        }
        Ok(counts)
    }

    async fn get_balance(&self, user_id: &str, asset_id: &str) -> StorageResult<Option<Balance>> {
        let inner = self.inner.read().await;
        Ok(inner
            .balances
            .get(&(user_id.to_string(), asset_id.to_string()))
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(&user.id) {
            return Err(StorageError::Duplicate(user.id.clone()));
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn user_exists(&self, user_id: &str) -> StorageResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.users.contains_key(user_id))
    }

    async fn insert_asset(&self, asset: &Asset) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.assets.contains_key(&asset.id) {
            return Err(StorageError::Duplicate(asset.id.clone()));
        }
        inner.assets.insert(asset.id.clone(), asset.clone());
        Ok(())
    }

    async fn get_asset(&self, asset_id: &str) -> StorageResult<Option<Asset>> {
        let inner = self.inner.read().await;
        Ok(inner.assets.get(asset_id).cloned())
    }
}
