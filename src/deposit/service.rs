//! Deposit Service
//!
//! The surface consumed by external collaborators: crypto deposit
//! initiation, the card deposit lifecycle (the card processor itself is
//! external), and per-user deposit history.

use rust_decimal::Decimal;
use std::sync::Arc;

use super::address::{AddressIssuer, IssuedDeposit};
use crate::common::{CustodiaError, Result};
use crate::storage::{CreditOutcome, LedgerStore};
use crate::types::{unix_now, Deposit, DepositMethod, DepositStatus, Network};

/// User-facing deposit operations
pub struct DepositService {
    store: Arc<dyn LedgerStore>,
    issuer: AddressIssuer,
}

impl DepositService {
    pub fn new(store: Arc<dyn LedgerStore>, issuer: AddressIssuer) -> Self {
        Self { store, issuer }
    }

    /// Issue a receive address and pending deposit for a crypto deposit
    pub async fn initiate_crypto_deposit(
        &self,
        user_id: &str,
        asset_id: &str,
        network: Network,
        estimate: Option<Decimal>,
    ) -> Result<IssuedDeposit> {
        self.issuer.issue(user_id, asset_id, network, estimate).await
    }

    /// Record a pending card deposit; the payment itself runs at the
    /// external processor.
    pub async fn initiate_card_deposit(
        &self,
        user_id: &str,
        asset_id: &str,
        amount: Decimal,
    ) -> Result<Deposit> {
        if amount <= Decimal::ZERO {
            return Err(CustodiaError::validation("amount must be positive"));
        }
        if !self.store.user_exists(user_id).await? {
            return Err(CustodiaError::not_found(format!("user {}", user_id)));
        }
        if self.store.get_asset(asset_id).await?.is_none() {
            return Err(CustodiaError::not_found(format!("asset {}", asset_id)));
        }

        let deposit = Deposit::new_card(user_id.to_string(), asset_id.to_string(), amount);
        self.store.insert_deposit(&deposit).await?;

        tracing::info!(
            target: "custodia::deposit",
            user_id,
            asset_id,
            deposit_id = %deposit.id,
            amount = %amount,
            "card deposit initiated"
        );

        Ok(deposit)
    }

    /// Confirm a card deposit after the processor reports success,
    /// crediting the balance in one transaction. `final_amount` overrides
    /// the initiation estimate when the processor settled differently.
    pub async fn confirm_card_deposit(
        &self,
        deposit_id: &str,
        final_amount: Option<Decimal>,
    ) -> Result<Deposit> {
        let deposit = self
            .store
            .get_deposit(deposit_id)
            .await?
            .ok_or_else(|| CustodiaError::not_found(format!("deposit {}", deposit_id)))?;

        if deposit.method != DepositMethod::Card {
            return Err(CustodiaError::validation("deposit is not a card deposit"));
        }
        if deposit.status != DepositStatus::Pending {
            return Err(CustodiaError::validation(
                "deposit is not in pending status",
            ));
        }

        let amount = final_amount.unwrap_or(deposit.amount);
        match self
            .store
            .confirm_and_credit_by_id(deposit_id, amount, unix_now())
            .await?
        {
            CreditOutcome::Credited(deposit) => {
                tracing::info!(
                    target: "custodia::deposit",
                    deposit_id,
                    amount = %amount,
                    "card deposit confirmed"
                );
                Ok(deposit)
            }
            // Lost a race with another confirm; the first one stands
            _ => Err(CustodiaError::validation(
                "deposit is not in pending status",
            )),
        }
    }

    /// Mark a pending card deposit failed (processor declined)
    pub async fn fail_card_deposit(&self, deposit_id: &str) -> Result<()> {
        let deposit = self
            .store
            .get_deposit(deposit_id)
            .await?
            .ok_or_else(|| CustodiaError::not_found(format!("deposit {}", deposit_id)))?;

        if deposit.method != DepositMethod::Card {
            return Err(CustodiaError::validation("deposit is not a card deposit"));
        }

        if !self.store.fail_deposit(deposit_id).await? {
            return Err(CustodiaError::validation(
                "deposit is not in pending status",
            ));
        }

        tracing::info!(target: "custodia::deposit", deposit_id, "card deposit failed");
        Ok(())
    }

    /// A user's deposits, newest first
    pub async fn user_deposits(&self, user_id: &str) -> Result<Vec<Deposit>> {
        Ok(self.store.list_user_deposits(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryLedgerStore;
    use crate::types::{Asset, User};
    use tokio::sync::Notify;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    async fn seeded_service() -> (DepositService, Arc<MemoryLedgerStore>) {
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
        (DepositService::new(store.clone(), issuer), store)
    }

    #[tokio::test]
    async fn test_initiate_crypto_deposit_returns_address_and_fee() {
        let (service, _) = seeded_service().await;

        let issued = service
            .initiate_crypto_deposit("user-1", "asset-eth", Network::Ethereum, None)
            .await
            .unwrap();

        assert!(issued.address.starts_with("0x"));
        assert_eq!(issued.network, Network::Ethereum);
        assert!(issued.fee > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_card_deposit_lifecycle() {
        let (service, store) = seeded_service().await;

        let deposit = service
            .initiate_card_deposit("user-1", "asset-eth", dec("100"))
            .await
            .unwrap();
        assert_eq!(deposit.status, DepositStatus::Pending);

        // Processor settles slightly lower after fees
        let confirmed = service
            .confirm_card_deposit(&deposit.id, Some(dec("98.5")))
            .await
            .unwrap();
        assert_eq!(confirmed.status, DepositStatus::Confirmed);
        assert_eq!(confirmed.amount, dec("98.5"));

        let balance = store.get_balance("user-1", "asset-eth").await.unwrap().unwrap();
        assert_eq!(balance.balance, dec("98.5"));

        // Double confirm is rejected and does not double-credit
        let result = service.confirm_card_deposit(&deposit.id, None).await;
        assert!(matches!(result, Err(CustodiaError::Validation(_))));
        let balance = store.get_balance("user-1", "asset-eth").await.unwrap().unwrap();
        assert_eq!(balance.balance, dec("98.5"));
    }

    #[tokio::test]
    async fn test_fail_card_deposit() {
        let (service, store) = seeded_service().await;

        let deposit = service
            .initiate_card_deposit("user-1", "asset-eth", dec("50"))
            .await
            .unwrap();
        service.fail_card_deposit(&deposit.id).await.unwrap();

        let stored = store.get_deposit(&deposit.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DepositStatus::Failed);
        assert!(store.get_balance("user-1", "asset-eth").await.unwrap().is_none());

        // Terminal; cannot fail or confirm again
        assert!(service.fail_card_deposit(&deposit.id).await.is_err());
        assert!(service.confirm_card_deposit(&deposit.id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_card_deposit_validation() {
        let (service, _) = seeded_service().await;

        assert!(matches!(
            service
                .initiate_card_deposit("user-1", "asset-eth", Decimal::ZERO)
                .await,
            Err(CustodiaError::Validation(_))
        ));
        assert!(matches!(
            service
                .initiate_card_deposit("user-x", "asset-eth", dec("10"))
                .await,
            Err(CustodiaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_user_deposits_newest_first() {
        let (service, store) = seeded_service().await;

        let mut older = Deposit::new_card("user-1".to_string(), "asset-eth".to_string(), dec("1"));
        older.created_at -= 100;
        store.insert_deposit(&older).await.unwrap();

        let newer = service
            .initiate_card_deposit("user-1", "asset-eth", dec("2"))
            .await
            .unwrap();

        let deposits = service.user_deposits("user-1").await.unwrap();
        assert_eq!(deposits.len(), 2);
        assert_eq!(deposits[0].id, newer.id);
    }
}
