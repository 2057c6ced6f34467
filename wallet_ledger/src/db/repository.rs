//! Ledger store abstractions and the PostgreSQL implementation.
//!
//! The engine talks to storage only through [`LedgerStore`] and the
//! [`UnitOfWork`] it hands out, so tests can swap in the in-process store
//! from [`super::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;

use super::config::DatabaseConfig;
use super::timeouts::{TimeoutError, pg_interval, with_default_timeout, with_timeout};
use crate::wallet::models::{EntryKind, LedgerEntry, Wallet, WalletId};

const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";
const QUERY_CANCELED: &str = "57014";

/// Whether a locking read queues behind other holders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Wait until the lock is free (bounded by the store's lock timeout)
    Blocking,
    /// Fail immediately with [`StoreError::LockNotAvailable`] if the row is held
    NoWait,
}

/// Ledger store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row lock held elsewhere, or the lock wait timed out
    #[error("Row lock not available")]
    LockNotAvailable,

    #[error("Deadlock detected")]
    Deadlock,

    #[error("Serialization failure")]
    SerializationFailure,

    /// Statement cancelled by the store's statement timeout
    #[error("Statement timed out")]
    StatementTimeout,

    /// No pooled connection became available in time
    #[error("Connection pool timed out")]
    PoolTimedOut,

    /// Client-side deadline expired
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A write did not touch the rows it was meant to, or broke a constraint
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// A stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    /// Transient conditions that a fresh attempt may not hit again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::LockNotAvailable
                | StoreError::Deadlock
                | StoreError::SerializationFailure
                | StoreError::StatementTimeout
                | StoreError::PoolTimedOut
                | StoreError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::PoolTimedOut) {
            return StoreError::PoolTimedOut;
        }
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());
        match code.as_deref() {
            Some(LOCK_NOT_AVAILABLE) => StoreError::LockNotAvailable,
            Some(DEADLOCK_DETECTED) => StoreError::Deadlock,
            Some(SERIALIZATION_FAILURE) => StoreError::SerializationFailure,
            Some(QUERY_CANCELED) => StoreError::StatementTimeout,
            _ => StoreError::Database(err),
        }
    }
}

impl From<TimeoutError> for StoreError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(duration) => StoreError::Timeout(duration),
            TimeoutError::Database(e) => e.into(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One atomic unit of work holding row locks until it ends.
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] discards
/// its writes and releases its locks.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Read a wallet and take an exclusive lock on it
    async fn locked_find(
        &mut self,
        wallet_id: WalletId,
        wait: WaitPolicy,
    ) -> StoreResult<Option<Wallet>>;

    /// Persist wallet rows in one batched write
    async fn save_wallets(&mut self, wallets: &[Wallet]) -> StoreResult<()>;

    /// Append ledger entries in one batched write
    async fn append_entries(&mut self, entries: &[LedgerEntry]) -> StoreResult<()>;

    /// Make every write visible and release the locks
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every write and release the locks
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Durable storage of wallets and ledger entries
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start a unit of work
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Unlocked read of a wallet
    async fn find_wallet(&self, wallet_id: WalletId) -> StoreResult<Option<Wallet>>;

    /// Wallets owned by a user
    async fn find_wallets_by_user(&self, user_id: &str) -> StoreResult<Vec<Wallet>>;

    /// Insert a new wallet
    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()>;

    /// Ledger entries of one wallet, oldest first
    async fn find_entries_by_wallet(&self, wallet_id: WalletId) -> StoreResult<Vec<LedgerEntry>>;

    /// Every ledger entry, oldest first
    async fn find_all_entries(&self) -> StoreResult<Vec<LedgerEntry>>;

    /// Remove all wallets and entries
    async fn delete_all(&self) -> StoreResult<()>;
}

/// PostgreSQL implementation of `LedgerStore`
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    acquire_timeout: Duration,
    lock_timeout: Duration,
    statement_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            acquire_timeout: config.acquire_timeout(),
            lock_timeout: config.lock_timeout(),
            statement_timeout: config.statement_timeout(),
        }
    }
}

const WALLET_COLUMNS: &str = "id, user_id, balance, created_at, updated_at";
const ENTRY_COLUMNS: &str =
    "id, wallet_id, amount, kind, group_id, counterparty_wallet_id, created_at";

fn wallet_from_row(row: &PgRow) -> StoreResult<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> StoreResult<LedgerEntry> {
    let kind: String = row.try_get("kind")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        amount: row.try_get("amount")?,
        kind: kind
            .parse::<EntryKind>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        group_id: row.try_get("group_id")?,
        counterparty_wallet_id: row.try_get("counterparty_wallet_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let mut tx = with_timeout(self.acquire_timeout, self.pool.begin()).await?;

        // Transaction-local limits so a waiting lock can never block forever
        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(pg_interval(self.lock_timeout))
            .bind(pg_interval(self.statement_timeout))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> StoreResult<Option<Wallet>> {
        let row = with_default_timeout(
            sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"))
                .bind(wallet_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn find_wallets_by_user(&self, user_id: &str) -> StoreResult<Vec<Wallet>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 ORDER BY created_at, id"
            ))
            .bind(user_id)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(wallet_from_row).collect()
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        with_default_timeout(
            sqlx::query(
                "INSERT INTO wallets (id, user_id, balance, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(wallet.id)
            .bind(&wallet.user_id)
            .bind(wallet.balance)
            .bind(wallet.created_at)
            .bind(wallet.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_entries_by_wallet(&self, wallet_id: WalletId) -> StoreResult<Vec<LedgerEntry>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries
                 WHERE wallet_id = $1
                 ORDER BY created_at, id"
            ))
            .bind(wallet_id)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn find_all_entries(&self) -> StoreResult<Vec<LedgerEntry>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries ORDER BY created_at, id"
            ))
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn delete_all(&self) -> StoreResult<()> {
        let mut tx = with_timeout(self.acquire_timeout, self.pool.begin()).await?;
        sqlx::query("DELETE FROM ledger_entries")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM wallets").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// A PostgreSQL transaction; sqlx rolls it back if dropped uncommitted
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn locked_find(
        &mut self,
        wallet_id: WalletId,
        wait: WaitPolicy,
    ) -> StoreResult<Option<Wallet>> {
        let lock_clause = match wait {
            WaitPolicy::Blocking => "FOR UPDATE",
            WaitPolicy::NoWait => "FOR UPDATE NOWAIT",
        };

        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1 {lock_clause}"
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn save_wallets(&mut self, wallets: &[Wallet]) -> StoreResult<()> {
        if wallets.is_empty() {
            return Ok(());
        }

        let ids: Vec<WalletId> = wallets.iter().map(|w| w.id).collect();
        let balances: Vec<i64> = wallets.iter().map(|w| w.balance).collect();
        let updated: Vec<DateTime<Utc>> = wallets.iter().map(|w| w.updated_at).collect();

        let result = sqlx::query(
            "UPDATE wallets AS w
             SET balance = v.balance, updated_at = v.updated_at
             FROM UNNEST($1::uuid[], $2::bigint[], $3::timestamptz[]) AS v(id, balance, updated_at)
             WHERE w.id = v.id",
        )
        .bind(&ids)
        .bind(&balances)
        .bind(&updated)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != wallets.len() as u64 {
            return Err(StoreError::Integrity(format!(
                "wallet update touched {} of {} rows",
                result.rows_affected(),
                wallets.len()
            )));
        }
        Ok(())
    }

    async fn append_entries(&mut self, entries: &[LedgerEntry]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        let wallet_ids: Vec<_> = entries.iter().map(|e| e.wallet_id).collect();
        let amounts: Vec<i64> = entries.iter().map(|e| e.amount).collect();
        let kinds: Vec<&str> = entries.iter().map(|e| e.kind.as_str()).collect();
        let group_ids: Vec<_> = entries.iter().map(|e| e.group_id).collect();
        let counterparties: Vec<_> = entries.iter().map(|e| e.counterparty_wallet_id).collect();
        let created: Vec<DateTime<Utc>> = entries.iter().map(|e| e.created_at).collect();

        sqlx::query(
            "INSERT INTO ledger_entries
                (id, wallet_id, amount, kind, group_id, counterparty_wallet_id, created_at)
             SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::bigint[], $4::text[],
                $5::uuid[], $6::uuid[], $7::timestamptz[]
             )",
        )
        .bind(&ids)
        .bind(&wallet_ids)
        .bind(&amounts)
        .bind(&kinds)
        .bind(&group_ids)
        .bind(&counterparties)
        .bind(&created)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
