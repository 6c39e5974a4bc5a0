//! SQLite Persistent Storage for the Ledger
//!
//! Durable storage for deposits, balances and reference data that survives
//! service restarts. Uses connection pooling via r2d2 for concurrent access.
//!
//! Concurrency: SQLite has no row-level locks, so the atomic credit path
//! runs in a `BEGIN IMMEDIATE` transaction (single writer) combined with a
//! status-guarded UPDATE and a UNIQUE index on tx_hash. WAL mode plus a
//! busy timeout keeps the webhook handlers and the scanner from tripping
//! over each other.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::traits::{CreditOutcome, LedgerStore, StorageError, StorageResult};
use crate::types::{Asset, Balance, Deposit, DepositMethod, DepositStatus, Network, User};

/// SQLite-backed ledger store with connection pooling
pub struct SqliteLedgerStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteLedgerStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(connection_init);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory().with_init(connection_init);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS assets (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                name TEXT NOT NULL,
                network TEXT NOT NULL,
                contract_address TEXT,
                decimals INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deposits (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                method TEXT NOT NULL,
                network TEXT,
                crypto_address TEXT,
                tx_hash TEXT UNIQUE,
                amount TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                last_processed_block INTEGER,
                processed_transactions TEXT NOT NULL DEFAULT '[]',
                confirmed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_deposits_status ON deposits(status);
            CREATE INDEX IF NOT EXISTS idx_deposits_user ON deposits(user_id, created_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_deposits_active_address
                ON deposits(network, crypto_address)
                WHERE status = 'pending' AND crypto_address IS NOT NULL;

            CREATE TABLE IF NOT EXISTS balances (
                user_id TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                balance TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, asset_id)
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Convert a database row to Deposit
    fn row_to_deposit(row: &rusqlite::Row) -> rusqlite::Result<Deposit> {
        let status: String = row.get("status")?;
        let method: String = row.get("method")?;
        let network: Option<String> = row.get("network")?;
        let processed: String = row.get("processed_transactions")?;

        Ok(Deposit {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            asset_id: row.get("asset_id")?,
            method: method.parse().unwrap_or(DepositMethod::Crypto),
            network: network.and_then(|n| n.parse::<Network>().ok()),
            crypto_address: row.get("crypto_address")?,
            tx_hash: row.get("tx_hash")?,
            amount: parse_decimal_col(row, "amount")?,
            status: status.parse().unwrap_or(DepositStatus::Pending),
            last_processed_block: row
                .get::<_, Option<i64>>("last_processed_block")?
                .map(|v| v as u64),
            processed_transactions: serde_json::from_str(&processed).unwrap_or_default(),
            confirmed_at: row.get("confirmed_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn insert_deposit_sync(&self, deposit: &Deposit) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO deposits (
                id, user_id, asset_id, method, network, crypto_address,
                tx_hash, amount, status, last_processed_block,
                processed_transactions, confirmed_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                deposit.id,
                deposit.user_id,
                deposit.asset_id,
                deposit.method.to_string(),
                deposit.network.map(|n| n.to_string()),
                deposit.crypto_address,
                deposit.tx_hash,
                deposit.amount.to_string(),
                deposit.status.to_string(),
                deposit.last_processed_block.map(|v| v as i64),
                serde_json::to_string(&deposit.processed_transactions)
                    .unwrap_or_else(|_| "[]".to_string()),
                deposit.confirmed_at,
                deposit.created_at,
                deposit.updated_at,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Duplicate(
                    deposit
                        .crypto_address
                        .clone()
                        .unwrap_or_else(|| deposit.id.clone()),
                )
            } else {
                StorageError::Database(e.to_string())
            }
        })?;

        Ok(())
    }

    fn get_deposit_sync(&self, id: &str) -> Result<Option<Deposit>, StorageError> {
        let conn = self.conn()?;

        conn.query_row("SELECT * FROM deposits WHERE id = ?1", params![id], |row| {
            Self::row_to_deposit(row)
        })
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn find_by_tx_hash_sync(&self, tx_hash: &str) -> Result<Option<Deposit>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM deposits WHERE tx_hash = ?1",
            params![tx_hash],
            |row| Self::row_to_deposit(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn find_pending_by_address_sync(
        &self,
        network: Network,
        address: &str,
    ) -> Result<Option<Deposit>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            r#"
            SELECT * FROM deposits
            WHERE network = ?1 AND crypto_address = ?2 AND status = 'pending'
            "#,
            params![network.to_string(), address],
            |row| Self::row_to_deposit(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn list_pending_crypto_sync(&self) -> Result<Vec<Deposit>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT * FROM deposits
            WHERE status = 'pending' AND method = 'crypto' AND crypto_address IS NOT NULL
            ORDER BY created_at ASC
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let deposits = stmt
            .query_map([], |row| Self::row_to_deposit(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(deposits)
    }

    fn list_user_deposits_sync(&self, user_id: &str) -> Result<Vec<Deposit>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM deposits WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let deposits = stmt
            .query_map(params![user_id], |row| Self::row_to_deposit(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(deposits)
    }

    fn mark_tx_processed_sync(&self, deposit_id: &str, tx_hash: &str) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let processed: Option<String> = tx
            .query_row(
                "SELECT processed_transactions FROM deposits WHERE id = ?1",
                params![deposit_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let Some(processed) = processed else {
            return Err(StorageError::NotFound(deposit_id.to_string()));
        };

        let mut set: Vec<String> = serde_json::from_str(&processed).unwrap_or_default();
        if !set.iter().any(|t| t == tx_hash) {
            set.push(tx_hash.to_string());
            tx.execute(
                "UPDATE deposits SET processed_transactions = ?2, updated_at = ?3 WHERE id = ?1",
                params![
                    deposit_id,
                    serde_json::to_string(&set).unwrap_or_else(|_| "[]".to_string()),
                    crate::types::unix_now(),
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        }

        tx.commit().map_err(|e| StorageError::Database(e.to_string()))
    }

    fn advance_processed_block_sync(
        &self,
        deposit_id: &str,
        block: u64,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            UPDATE deposits SET last_processed_block = ?2, updated_at = ?3
            WHERE id = ?1
              AND (last_processed_block IS NULL OR last_processed_block < ?2)
            "#,
            params![deposit_id, block as i64, crate::types::unix_now()],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn fail_deposit_sync(&self, deposit_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE deposits SET status = 'failed', updated_at = ?2 WHERE id = ?1 AND status = 'pending'",
                params![deposit_id, crate::types::unix_now()],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows > 0)
    }

    fn confirm_and_credit_sync(
        &self,
        network: Network,
        address: &str,
        tx_hash: &str,
        amount: Decimal,
        now: i64,
    ) -> Result<CreditOutcome, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        // Re-run the idempotency probe under the write lock; a race loser
        // lands here after the winner committed.
        let already: Option<String> = tx
            .query_row(
                "SELECT id FROM deposits WHERE tx_hash = ?1",
                params![tx_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        if already.is_some() {
            return Ok(CreditOutcome::DuplicateTx);
        }

        let deposit = tx
            .query_row(
                r#"
                SELECT * FROM deposits
                WHERE network = ?1 AND crypto_address = ?2 AND status = 'pending'
                "#,
                params![network.to_string(), address],
                |row| Self::row_to_deposit(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let Some(mut deposit) = deposit else {
            return Ok(CreditOutcome::NoPendingDeposit);
        };

        // Status-guarded update; the UNIQUE tx_hash index backstops any
        // concurrent writer that slipped past the probe.
        let updated = match tx.execute(
            r#"
            UPDATE deposits
            SET tx_hash = ?2, amount = ?3, status = 'confirmed',
                confirmed_at = ?4, updated_at = ?4
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![deposit.id, tx_hash, amount.to_string(), now],
        ) {
            Ok(n) => n,
            Err(e) if is_unique_violation(&e) => return Ok(CreditOutcome::DuplicateTx),
            Err(e) => return Err(StorageError::Database(e.to_string())),
        };

        if updated == 0 {
            return Ok(CreditOutcome::NoPendingDeposit);
        }

        credit_balance_in_tx(&tx, &deposit.user_id, &deposit.asset_id, amount, now)?;

        tx.commit().map_err(|e| StorageError::Database(e.to_string()))?;

        deposit.mark_confirmed(Some(tx_hash.to_string()), amount, now);
        Ok(CreditOutcome::Credited(deposit))
    }

    fn confirm_and_credit_by_id_sync(
        &self,
        deposit_id: &str,
        amount: Decimal,
        now: i64,
    ) -> Result<CreditOutcome, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let deposit = tx
            .query_row(
                "SELECT * FROM deposits WHERE id = ?1 AND status = 'pending'",
                params![deposit_id],
                |row| Self::row_to_deposit(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let Some(mut deposit) = deposit else {
            return Ok(CreditOutcome::NoPendingDeposit);
        };

        let updated = tx
            .execute(
                r#"
                UPDATE deposits
                SET amount = ?2, status = 'confirmed', confirmed_at = ?3, updated_at = ?3
                WHERE id = ?1 AND status = 'pending'
                "#,
                params![deposit.id, amount.to_string(), now],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if updated == 0 {
            return Ok(CreditOutcome::NoPendingDeposit);
        }

        credit_balance_in_tx(&tx, &deposit.user_id, &deposit.asset_id, amount, now)?;

        tx.commit().map_err(|e| StorageError::Database(e.to_string()))?;

        deposit.mark_confirmed(None, amount, now);
        Ok(CreditOutcome::Credited(deposit))
    }

    fn count_by_status_sync(&self) -> Result<HashMap<String, u64>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM deposits GROUP BY status")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows.into_iter().collect())
    }

    fn get_balance_sync(
        &self,
        user_id: &str,
        asset_id: &str,
    ) -> Result<Option<Balance>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM balances WHERE user_id = ?1 AND asset_id = ?2",
            params![user_id, asset_id],
            |row| {
                Ok(Balance {
                    user_id: row.get("user_id")?,
                    asset_id: row.get("asset_id")?,
                    balance: parse_decimal_col(row, "balance")?,
                    updated_at: row.get("updated_at")?,
                })
            },
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn insert_user_sync(&self, user: &User) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO users (id, email) VALUES (?1, ?2)",
            params![user.id, user.email],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Duplicate(user.id.clone())
            } else {
                StorageError::Database(e.to_string())
            }
        })?;

        Ok(())
    }

    fn user_exists_sync(&self, user_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let found: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(found.is_some())
    }

    fn insert_asset_sync(&self, asset: &Asset) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO assets (id, symbol, name, network, contract_address, decimals)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                asset.id,
                asset.symbol,
                asset.name,
                asset.network,
                asset.contract_address,
                asset.decimals,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Duplicate(asset.id.clone())
            } else {
                StorageError::Database(e.to_string())
            }
        })?;

        Ok(())
    }

    fn get_asset_sync(&self, asset_id: &str) -> Result<Option<Asset>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM assets WHERE id = ?1",
            params![asset_id],
            |row| {
                Ok(Asset {
                    id: row.get("id")?,
                    symbol: row.get("symbol")?,
                    name: row.get("name")?,
                    network: row.get("network")?,
                    contract_address: row.get("contract_address")?,
                    decimals: row.get("decimals")?,
                })
            },
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }
}

/// Per-connection init: WAL for concurrent readers, busy timeout so the
/// scanner and webhook writers queue instead of erroring.
fn connection_init(conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(Duration::from_secs(5))?;
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    Ok(())
}

/// Upsert the balance row inside an open transaction. Deposit credits are
/// strictly positive; a non-positive amount aborts the whole transaction.
fn credit_balance_in_tx(
    tx: &rusqlite::Transaction,
    user_id: &str,
    asset_id: &str,
    amount: Decimal,
    now: i64,
) -> Result<(), StorageError> {
    if amount <= Decimal::ZERO {
        return Err(StorageError::InvalidData(format!(
            "deposit credit must be positive, got {}",
            amount
        )));
    }

    let current: Option<String> = tx
        .query_row(
            "SELECT balance FROM balances WHERE user_id = ?1 AND asset_id = ?2",
            params![user_id, asset_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let current: Decimal = match current {
        Some(s) => s
            .parse()
            .map_err(|_| StorageError::InvalidData(format!("corrupt balance value: {}", s)))?,
        None => Decimal::ZERO,
    };

    let new_balance = current + amount;

    tx.execute(
        r#"
        INSERT INTO balances (user_id, asset_id, balance, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(user_id, asset_id) DO UPDATE SET balance = ?3, updated_at = ?4
        "#,
        params![user_id, asset_id, new_balance.to_string(), now],
    )
    .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(())
}

/// SQLITE_CONSTRAINT_PRIMARYKEY (1555) or SQLITE_CONSTRAINT_UNIQUE (2067)
fn is_unique_violation(e: &rusqlite::Error) -> bool {
    if let rusqlite::Error::SqliteFailure(err, _) = e {
        return err.extended_code == 1555 || err.extended_code == 2067;
    }
    false
}

/// Parse a TEXT column as Decimal
fn parse_decimal_col(row: &rusqlite::Row, col: &str) -> rusqlite::Result<Decimal> {
    let s: String = row.get(col)?;
    s.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn insert_deposit(&self, deposit: &Deposit) -> StorageResult<()> {
        self.insert_deposit_sync(deposit)
    }

    async fn get_deposit(&self, id: &str) -> StorageResult<Option<Deposit>> {
        self.get_deposit_sync(id)
    }

    async fn find_deposit_by_tx_hash(&self, tx_hash: &str) -> StorageResult<Option<Deposit>> {
        self.find_by_tx_hash_sync(tx_hash)
    }

    async fn find_pending_by_address(
        &self,
        network: Network,
        address: &str,
    ) -> StorageResult<Option<Deposit>> {
        self.find_pending_by_address_sync(network, address)
    }

    async fn list_pending_crypto(&self) -> StorageResult<Vec<Deposit>> {
        self.list_pending_crypto_sync()
    }

    async fn list_user_deposits(&self, user_id: &str) -> StorageResult<Vec<Deposit>> {
        self.list_user_deposits_sync(user_id)
    }

    async fn mark_tx_processed(&self, deposit_id: &str, tx_hash: &str) -> StorageResult<()> {
        self.mark_tx_processed_sync(deposit_id, tx_hash)
    }

    async fn advance_processed_block(&self, deposit_id: &str, block: u64) -> StorageResult<()> {
        self.advance_processed_block_sync(deposit_id, block)
    }

    async fn fail_deposit(&self, deposit_id: &str) -> StorageResult<bool> {
        self.fail_deposit_sync(deposit_id)
    }

    async fn confirm_and_credit(
        &self,
        network: Network,
        address: &str,
        tx_hash: &str,
        amount: Decimal,
        now: i64,
    ) -> StorageResult<CreditOutcome> {
        self.confirm_and_credit_sync(network, address, tx_hash, amount, now)
    }

    async fn confirm_and_credit_by_id(
        &self,
        deposit_id: &str,
        amount: Decimal,
        now: i64,
    ) -> StorageResult<CreditOutcome> {
        self.confirm_and_credit_by_id_sync(deposit_id, amount, now)
    }

    async fn count_by_status(&self) -> StorageResult<HashMap<String, u64>> {
        self.count_by_status_sync()
    }

    async fn get_balance(&self, user_id: &str, asset_id: &str) -> StorageResult<Option<Balance>> {
        self.get_balance_sync(user_id, asset_id)
    }

    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        self.insert_user_sync(user)
    }

    async fn user_exists(&self, user_id: &str) -> StorageResult<bool> {
        self.user_exists_sync(user_id)
    }

    async fn insert_asset(&self, asset: &Asset) -> StorageResult<()> {
        self.insert_asset_sync(asset)
    }

    async fn get_asset(&self, asset_id: &str) -> StorageResult<Option<Asset>> {
        self.get_asset_sync(asset_id)
    }
}
