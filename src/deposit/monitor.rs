//! Deposit Monitor
//!
//! The scheduled detection driver: polls chain adapters for activity on
//! every pending crypto deposit address and feeds each observation to the
//! reconciler. Also backs the administrative manual scan.
//!
//! Addresses are processed in bounded batches with inter-batch pacing so a
//! long address list does not trip upstream rate limits. Per-address
//! errors are logged and swallowed; one bad address never blocks the
//! batch.

use futures_util::future::join_all;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::interval;

use super::reconciler::{ReconcileOutcome, Reconciler};
use crate::chain::{sats_to_btc, AccountChainApi, UtxoChainApi};
use crate::common::Result;
use crate::storage::LedgerStore;
use crate::types::{unix_now, ChainModel, Deposit, Network};

/// Scanner pacing and retention configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between scan cycles
    pub scan_interval: Duration,
    /// Addresses per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay: Duration,
    /// Expire pending crypto deposits older than this; None keeps forever
    pub pending_ttl: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(300),
            batch_size: 5,
            batch_delay: Duration::from_millis(1000),
            pending_ttl: None,
        }
    }
}

/// Snapshot of monitor state for the status endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct MonitorStatus {
    pub addresses_watched: usize,
    pub scan_interval_secs: u64,
    pub last_scan_at: Option<i64>,
}

/// Scheduled scanner over all pending crypto deposit addresses
pub struct DepositMonitor {
    store: Arc<dyn LedgerStore>,
    reconciler: Arc<Reconciler>,
    account: Arc<dyn AccountChainApi>,
    utxo: Arc<dyn UtxoChainApi>,
    config: MonitorConfig,
    nudge: Arc<Notify>,
    last_scan_at: AtomicI64,
}

impl DepositMonitor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        reconciler: Arc<Reconciler>,
        account: Arc<dyn AccountChainApi>,
        utxo: Arc<dyn UtxoChainApi>,
        config: MonitorConfig,
        nudge: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            reconciler,
            account,
            utxo,
            config,
            nudge,
            last_scan_at: AtomicI64::new(0),
        }
    }

    /// Run the scan loop until shutdown is signalled. Started on boot,
    /// stopped on process shutdown; a nudge from the address issuer wakes
    /// a cycle early.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            target: "custodia::monitor",
            interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "deposit monitor started"
        );

        let mut ticker = interval(self.config.scan_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.nudge.notified() => {
                    tracing::debug!(target: "custodia::monitor", "woken early by new address");
                }
                _ = shutdown.changed() => {
                    tracing::info!(target: "custodia::monitor", "deposit monitor stopping");
                    return;
                }
            }

            let scanned = self.scan_once().await;
            tracing::debug!(target: "custodia::monitor", scanned, "scan cycle complete");
        }
    }

    /// One full scan pass over all pending crypto addresses. Returns the
    /// number of addresses scanned; also the manual/admin trigger.
    pub async fn scan_once(&self) -> usize {
        let deposits = match self.store.list_pending_crypto().await {
            Ok(deposits) => deposits,
            Err(e) => {
                tracing::error!(
                    target: "custodia::monitor",
                    error = %e,
                    "could not list pending deposits"
                );
                return 0;
            }
        };

        self.last_scan_at.store(unix_now(), Ordering::Relaxed);

        if deposits.is_empty() {
            tracing::debug!(target: "custodia::monitor", "no addresses to monitor");
            return 0;
        }

        tracing::info!(
            target: "custodia::monitor",
            count = deposits.len(),
            "monitoring addresses"
        );

        let mut scanned = 0;
        let mut batches = deposits.chunks(self.config.batch_size.max(1)).peekable();
        while let Some(batch) = batches.next() {
            join_all(batch.iter().map(|deposit| self.scan_deposit(deposit))).await;
            scanned += batch.len();

            if batches.peek().is_some() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }

        scanned
    }

    /// Current monitor state for operators
    pub async fn status(&self) -> MonitorStatus {
        let addresses_watched = self
            .store
            .list_pending_crypto()
            .await
            .map(|d| d.len())
            .unwrap_or(0);

        let last = self.last_scan_at.load(Ordering::Relaxed);
        MonitorStatus {
            addresses_watched,
            scan_interval_secs: self.config.scan_interval.as_secs(),
            last_scan_at: (last > 0).then_some(last),
        }
    }

    /// Scan one deposit address, swallowing its errors
    async fn scan_deposit(&self, deposit: &Deposit) {
        if self.expire_if_stale(deposit).await {
            return;
        }

        let Some(network) = deposit.network else {
            return;
        };

        let result = match network.model() {
            ChainModel::Account => self.scan_account_address(deposit, network).await,
            ChainModel::Utxo => self.scan_utxo_address(deposit, network).await,
        };

        if let Err(e) = result {
            tracing::warn!(
                target: "custodia::monitor",
                deposit_id = %deposit.id,
                address = deposit.crypto_address.as_deref().unwrap_or(""),
                error = %e,
                "error scanning address"
            );
        }
    }

    /// Apply the configured pending TTL; returns true when expired
    async fn expire_if_stale(&self, deposit: &Deposit) -> bool {
        let Some(ttl) = self.config.pending_ttl else {
            return false;
        };

        if unix_now() - deposit.created_at <= ttl.as_secs() as i64 {
            return false;
        }

        match self.store.fail_deposit(&deposit.id).await {
            Ok(true) => {
                tracing::info!(
                    target: "custodia::monitor",
                    deposit_id = %deposit.id,
                    "pending deposit expired"
                );
                true
            }
            Ok(false) => true,
            Err(e) => {
                tracing::warn!(
                    target: "custodia::monitor",
                    deposit_id = %deposit.id,
                    error = %e,
                    "could not expire deposit"
                );
                true
            }
        }
    }

    /// Account-model scan: new transfers since the high-water mark, in
    /// block order. Terminal outcomes advance the mark and the dedup set;
    /// an unconfirmed transfer stops the advance so it is re-observed.
    async fn scan_account_address(&self, deposit: &Deposit, network: Network) -> Result<()> {
        let Some(address) = deposit.crypto_address.as_deref() else {
            return Ok(());
        };

        let from_height = deposit.last_processed_block.map(|b| b + 1).unwrap_or(0);
        let mut transfers = self.account.incoming_transfers(address, from_height).await?;
        transfers.sort_by_key(|t| t.block_height);

        for transfer in transfers {
            if deposit
                .processed_transactions
                .iter()
                .any(|t| t == &transfer.tx_hash)
            {
                continue;
            }

            let outcome = self
                .reconciler
                .reconcile(&transfer.tx_hash, address, transfer.value, network)
                .await?;

            if !outcome.is_terminal() {
                tracing::debug!(
                    target: "custodia::monitor",
                    tx_hash = %transfer.tx_hash,
                    block = transfer.block_height,
                    "transfer below confirmation threshold, holding high-water mark"
                );
                break;
            }

            self.store
                .mark_tx_processed(&deposit.id, &transfer.tx_hash)
                .await?;
            self.store
                .advance_processed_block(&deposit.id, transfer.block_height)
                .await?;

            if matches!(outcome, ReconcileOutcome::Credited(_)) {
                // Deposit consumed; later activity belongs to no deposit
                break;
            }
        }

        Ok(())
    }

    /// UTXO-model scan: transactions not yet in the dedup set. Terminal
    /// outcomes enter the set; shallow ones stay out and retry next tick.
    async fn scan_utxo_address(&self, deposit: &Deposit, network: Network) -> Result<()> {
        let Some(address) = deposit.crypto_address.as_deref() else {
            return Ok(());
        };

        let tx_hashes = self.utxo.address_transactions(address).await?;

        for tx_hash in tx_hashes {
            if deposit.processed_transactions.iter().any(|t| t == &tx_hash) {
                continue;
            }

            let detail = self.utxo.transaction_detail(&tx_hash).await?;
            let output = detail
                .outputs
                .iter()
                .find(|out| out.address.as_deref() == Some(address) && out.value_sats > 0);

            let Some(output) = output else {
                // Spends from, or otherwise unrelated to, this address
                self.store.mark_tx_processed(&deposit.id, &tx_hash).await?;
                continue;
            };

            let amount = sats_to_btc(output.value_sats);
            let outcome = self
                .reconciler
                .reconcile(&tx_hash, address, amount, network)
                .await?;

            if !outcome.is_terminal() {
                tracing::debug!(
                    target: "custodia::monitor",
                    tx_hash = %tx_hash,
                    confirmations = output.confirmations,
                    "transaction below confirmation threshold, will retry"
                );
                continue;
            }

            self.store.mark_tx_processed(&deposit.id, &tx_hash).await?;

            if matches!(outcome, ReconcileOutcome::Credited(_)) {
                break;
            }
        }

        Ok(())
    }
}
