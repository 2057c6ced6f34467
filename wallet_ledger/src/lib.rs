//! # Wallet Ledger
//!
//! Per-user monetary balances kept in step with an append-only ledger of
//! movements, correct under concurrent access.
//!
//! Every balance change is written in the same unit of work as the ledger
//! entries that explain it, under an exclusive lock on the wallet row. A
//! committed balance is never negative and always equals the signed sum of
//! its entries.
//!
//! ## Core Modules
//!
//! - [`wallet`]: Domain models, errors and the balance mutation engine
//! - [`db`]: Connection pool, ledger store boundary and its implementations
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use wallet_ledger::{MemoryLedgerStore, WalletManager};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), wallet_ledger::WalletError> {
//! let wallets = WalletManager::new(Arc::new(MemoryLedgerStore::new()));
//! let wallet = wallets.create_wallet("alice").await?;
//! let receipt = wallets.deposit(wallet.id, 5000).await?;
//! assert_eq!(receipt.balance, 5000);
//! # Ok(())
//! # }
//! ```

/// Database pool, ledger stores and timeouts.
pub mod db;

/// Wallet models and the balance mutation engine.
pub mod wallet;

pub use db::{Database, DatabaseConfig, LedgerStore, MemoryLedgerStore, PgLedgerStore};
pub use wallet::{
    EntryKind, LedgerEntry, OperationReceipt, Wallet, WalletError, WalletId, WalletManager,
    WalletResult,
};
