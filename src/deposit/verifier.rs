//! Transaction Verifier
//!
//! Pure confirmation-policy decision over chain adapter data. Performs no
//! ledger writes.
//!
//! Network and API failures always map to a retryable [`Verdict::Pending`],
//! never to Invalid; a transient upstream error must not poison a deposit.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::chain::{sats_to_btc, AccountChainApi, UtxoChainApi};
use crate::types::{ChainModel, Network};

/// Per-chain-family confirmation thresholds
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    /// Minimum depth (current height - tx height) for account-model chains
    pub account_confirmations: u64,
    /// Minimum per-output confirmations for UTXO-model chains
    pub utxo_confirmations: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            account_confirmations: 12,
            utxo_confirmations: 3,
        }
    }
}

/// Verification decision for one observed transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Deep enough and executed successfully; carries the on-chain amount
    /// where the chain family exposes one (UTXO output value)
    Confirmed { observed_amount: Option<Decimal> },
    /// Not yet deep enough, unmined, or upstream unavailable; retry later
    Pending,
    /// Execution failed or the transaction does not pay the address
    Invalid,
}

/// Confirmation-policy verifier over both chain families
pub struct TxVerifier {
    account: Arc<dyn AccountChainApi>,
    utxo: Arc<dyn UtxoChainApi>,
    policy: ConfirmationPolicy,
}

impl TxVerifier {
    pub fn new(
        account: Arc<dyn AccountChainApi>,
        utxo: Arc<dyn UtxoChainApi>,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            account,
            utxo,
            policy,
        }
    }

    /// Decide CONFIRMED / PENDING / INVALID for a transaction claimed to
    /// pay `address` on `network`.
    pub async fn verify(
        &self,
        network: Network,
        tx_hash: &str,
        address: &str,
        claimed_amount: Decimal,
    ) -> Verdict {
        match network.model() {
            ChainModel::Account => self.verify_account(tx_hash).await,
            ChainModel::Utxo => self.verify_utxo(tx_hash, address, claimed_amount).await,
        }
    }

    async fn verify_account(&self, tx_hash: &str) -> Verdict {
        let status = match self.account.transaction_status(tx_hash).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    target: "custodia::verifier",
                    tx_hash,
                    error = %e,
                    "transaction status unavailable, retrying later"
                );
                return Verdict::Pending;
            }
        };

        if !status.success {
            return Verdict::Invalid;
        }

        let Some(tx_height) = status.block_height else {
            return Verdict::Pending;
        };

        let tip = match self.account.current_height().await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::warn!(
                    target: "custodia::verifier",
                    tx_hash,
                    error = %e,
                    "tip height unavailable, retrying later"
                );
                return Verdict::Pending;
            }
        };

        if tip.saturating_sub(tx_height) >= self.policy.account_confirmations {
            Verdict::Confirmed {
                observed_amount: None,
            }
        } else {
            Verdict::Pending
        }
    }

    async fn verify_utxo(&self, tx_hash: &str, address: &str, claimed_amount: Decimal) -> Verdict {
        let detail = match self.utxo.transaction_detail(tx_hash).await {
            Ok(detail) => detail,
            Err(e) => {
                tracing::warn!(
                    target: "custodia::verifier",
                    tx_hash,
                    error = %e,
                    "transaction detail unavailable, retrying later"
                );
                return Verdict::Pending;
            }
        };

        let output = detail
            .outputs
            .iter()
            .find(|out| out.address.as_deref() == Some(address) && out.value_sats > 0);

        let Some(output) = output else {
            // Pays someone else entirely; no amount of waiting fixes that
            return Verdict::Invalid;
        };

        let observed = sats_to_btc(output.value_sats);
        if observed != claimed_amount {
            tracing::debug!(
                target: "custodia::verifier",
                tx_hash,
                %claimed_amount,
                %observed,
                "claimed amount differs from on-chain output, using observed"
            );
        }

        if output.confirmations >= self.policy.utxo_confirmations {
            Verdict::Confirmed {
                observed_amount: Some(observed),
            }
        } else {
            Verdict::Pending
        }
    }
}
