//! Deposit Reconciler
//!
//! The core state-transition engine: match one externally observed
//! transaction to its pending deposit, verify it, and credit the balance
//! exactly once.
//!
//! Every detection driver (scheduled scanner, webhook, manual scan)
//! converges on [`Reconciler::reconcile`]; that convergence is what makes
//! the exactly-once guarantee hold regardless of which driver wins a race.
//! Safe to invoke concurrently and redundantly for the same transaction.

use rust_decimal::Decimal;
use std::sync::Arc;

use super::verifier::{TxVerifier, Verdict};
use crate::common::Result;
use crate::storage::{CreditOutcome, LedgerStore};
use crate::types::{unix_now, Deposit, Network};

/// Result of one reconcile attempt
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// Deposit confirmed and balance credited
    Credited(Deposit),
    /// Transaction hash already recorded; idempotent no-op
    Duplicate,
    /// Below the confirmation threshold; the driver retries later
    NotYetConfirmed,
    /// Failed execution or no payment to the address; never credited
    Invalid,
    /// No pending deposit bound to the address; nothing credited
    NoMatchingDeposit,
}

impl ReconcileOutcome {
    /// Terminal outcomes need no retry; only NotYetConfirmed is worth
    /// re-observing.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReconcileOutcome::NotYetConfirmed)
    }
}

/// The atomic locate-verify-credit engine
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    verifier: TxVerifier,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, verifier: TxVerifier) -> Self {
        Self { store, verifier }
    }

    /// Reconcile one observed transaction.
    ///
    /// 1. Idempotency probe: a tx_hash already in the ledger is a no-op.
    /// 2. Verify against the network's confirmation policy; no mutation
    ///    unless confirmed.
    /// 3. Atomically confirm the pending deposit for the address and
    ///    credit the balance; all-or-nothing at the store.
    pub async fn reconcile(
        &self,
        tx_hash: &str,
        address: &str,
        amount: Decimal,
        network: Network,
    ) -> Result<ReconcileOutcome> {
        if self.store.find_deposit_by_tx_hash(tx_hash).await?.is_some() {
            tracing::debug!(
                target: "custodia::reconciler",
                tx_hash,
                "transaction already processed, skipping"
            );
            return Ok(ReconcileOutcome::Duplicate);
        }

        let verdict = self.verifier.verify(network, tx_hash, address, amount).await;

        let observed = match verdict {
            Verdict::Pending => return Ok(ReconcileOutcome::NotYetConfirmed),
            Verdict::Invalid => {
                tracing::warn!(
                    target: "custodia::reconciler",
                    tx_hash,
                    address,
                    %network,
                    "transaction failed verification"
                );
                return Ok(ReconcileOutcome::Invalid);
            }
            Verdict::Confirmed { observed_amount } => observed_amount,
        };

        // The on-chain amount is authoritative over the driver's claim
        let credit = observed.unwrap_or(amount);
        if credit <= Decimal::ZERO {
            tracing::warn!(
                target: "custodia::reconciler",
                tx_hash,
                %credit,
                "refusing non-positive credit"
            );
            return Ok(ReconcileOutcome::Invalid);
        }

        match self
            .store
            .confirm_and_credit(network, address, tx_hash, credit, unix_now())
            .await?
        {
            CreditOutcome::Credited(deposit) => {
                tracing::info!(
                    target: "custodia::reconciler",
                    tx_hash,
                    address,
                    %network,
                    user_id = %deposit.user_id,
                    asset_id = %deposit.asset_id,
                    amount = %credit,
                    "deposit confirmed and credited"
                );
                Ok(ReconcileOutcome::Credited(deposit))
            }
            CreditOutcome::DuplicateTx => Ok(ReconcileOutcome::Duplicate),
            CreditOutcome::NoPendingDeposit => {
                tracing::warn!(
                    target: "custodia::reconciler",
                    tx_hash,
                    address,
                    %network,
                    "no pending deposit for address, transaction not credited"
                );
                Ok(ReconcileOutcome::NoMatchingDeposit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        AccountTxStatus, MockAccountChainApi, MockUtxoChainApi, UtxoOutput, UtxoTxDetail,
    };
    use crate::deposit::verifier::ConfirmationPolicy;
    use crate::storage::MemoryLedgerStore;
    use crate::types::DepositStatus;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    /// Account-model mocks reporting a successful tx at the given depth
    fn account_mock(depth: u64) -> MockAccountChainApi {
        let mut account = MockAccountChainApi::new();
        account.expect_transaction_status().returning(|_| {
            Ok(AccountTxStatus {
                block_height: Some(100),
                success: true,
            })
        });
        account
            .expect_current_height()
            .returning(move || Ok(100 + depth));
        account
    }

    fn reconciler_with(
        store: Arc<dyn LedgerStore>,
        account: MockAccountChainApi,
        utxo: MockUtxoChainApi,
    ) -> Reconciler {
        let verifier = TxVerifier::new(
            Arc::new(account),
            Arc::new(utxo),
            ConfirmationPolicy::default(),
        );
        Reconciler::new(store, verifier)
    }

    async fn seeded_store(address: &str, network: Network) -> Arc<MemoryLedgerStore> {
        let store = Arc::new(MemoryLedgerStore::new());
        let deposit = Deposit::new_crypto(
            "user-1".to_string(),
            "asset-1".to_string(),
            network,
            address.to_string(),
            Decimal::ZERO,
        );
        store.insert_deposit(&deposit).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_reconcile_credits_exactly_once() {
        let store = seeded_store("0xabc", Network::Ethereum).await;
        let reconciler = reconciler_with(
            store.clone(),
            account_mock(12),
            MockUtxoChainApi::new(),
        );

        let first = reconciler
            .reconcile("0xtx", "0xabc", dec("1.5"), Network::Ethereum)
            .await
            .unwrap();
        assert!(matches!(first, ReconcileOutcome::Credited(_)));

        // Redundant delivery of the same observation
        let second = reconciler
            .reconcile("0xtx", "0xabc", dec("1.5"), Network::Ethereum)
            .await
            .unwrap();
        assert!(matches!(second, ReconcileOutcome::Duplicate));

        let balance = store.get_balance("user-1", "asset-1").await.unwrap().unwrap();
        assert_eq!(balance.balance, dec("1.5"));
    }

    #[tokio::test]
    async fn test_no_credit_below_threshold() {
        let store = seeded_store("0xabc", Network::Ethereum).await;
        let reconciler = reconciler_with(
            store.clone(),
            account_mock(11),
            MockUtxoChainApi::new(),
        );

        let outcome = reconciler
            .reconcile("0xtx", "0xabc", dec("1.5"), Network::Ethereum)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::NotYetConfirmed));

        assert!(store.get_balance("user-1", "asset-1").await.unwrap().is_none());
        let deposit = store
            .find_pending_by_address(Network::Ethereum, "0xabc")
            .await
            .unwrap();
        assert_eq!(deposit.unwrap().status, DepositStatus::Pending);
    }

    #[tokio::test]
    async fn test_no_credit_on_invalid() {
        let store = seeded_store("0xabc", Network::Ethereum).await;

        let mut account = MockAccountChainApi::new();
        account.expect_transaction_status().returning(|_| {
            Ok(AccountTxStatus {
                block_height: Some(100),
                success: false,
            })
        });

        let reconciler = reconciler_with(store.clone(), account, MockUtxoChainApi::new());

        let outcome = reconciler
            .reconcile("0xtx", "0xabc", dec("1.5"), Network::Ethereum)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Invalid));
        assert!(store.get_balance("user-1", "asset-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_address_is_not_credited() {
        let store = Arc::new(MemoryLedgerStore::new());
        let reconciler = reconciler_with(
            store.clone() as Arc<dyn LedgerStore>,
            account_mock(12),
            MockUtxoChainApi::new(),
        );

        let outcome = reconciler
            .reconcile("0xtx", "0xnobody", dec("1.5"), Network::Ethereum)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::NoMatchingDeposit));
        assert!(store.get_balance("user-1", "asset-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_observed_utxo_amount_overrides_claim() {
        let store = seeded_store("bc1qaddr", Network::Bitcoin).await;

        let mut utxo = MockUtxoChainApi::new();
        utxo.expect_transaction_detail().returning(|_| {
            Ok(UtxoTxDetail {
                tx_hash: "btctx".to_string(),
                outputs: vec![UtxoOutput {
                    address: Some("bc1qaddr".to_string()),
                    value_sats: 150_000_000,
                    confirmations: 3,
                }],
            })
        });

        let reconciler = reconciler_with(store.clone(), MockAccountChainApi::new(), utxo);

        // Webhook claims 2.0 but the chain says 1.5
        let outcome = reconciler
            .reconcile("btctx", "bc1qaddr", dec("2.0"), Network::Bitcoin)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Credited(_)));

        let balance = store.get_balance("user-1", "asset-1").await.unwrap().unwrap();
        assert_eq!(balance.balance, dec("1.5"));
    }

    #[tokio::test]
    async fn test_racing_drivers_credit_once() {
        // Scanner and webhook observe the same transaction; only one
        // commit may land.
        let store = Arc::new(crate::storage::SqliteLedgerStore::in_memory().unwrap());
        let deposit = Deposit::new_crypto(
            "user-1".to_string(),
            "asset-1".to_string(),
            Network::Ethereum,
            "0xabc".to_string(),
            Decimal::ZERO,
        );
        store.insert_deposit(&deposit).await.unwrap();

        let reconciler = Arc::new(reconciler_with(
            store.clone() as Arc<dyn LedgerStore>,
            account_mock(12),
            MockUtxoChainApi::new(),
        ));

        let a = {
            let r = reconciler.clone();
            tokio::spawn(async move {
                r.reconcile("0xtx", "0xabc", dec("1.5"), Network::Ethereum).await
            })
        };
        let b = {
            let r = reconciler.clone();
            tokio::spawn(async move {
                r.reconcile("0xtx", "0xabc", dec("1.5"), Network::Ethereum).await
            })
        };

        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        let credited = outcomes
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::Credited(_)))
            .count();
        assert_eq!(credited, 1);

        let balance = store.get_balance("user-1", "asset-1").await.unwrap().unwrap();
        assert_eq!(balance.balance, dec("1.5"));
    }
}
