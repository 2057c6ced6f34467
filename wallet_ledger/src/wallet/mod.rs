//! Wallet module providing balance mutations over an append-only ledger.
//!
//! This module implements:
//! - Deposits, withdrawals and transfers, each as one atomic unit of work
//! - Pessimistic row locking, with withdrawals refusing to queue for a lock
//! - Ledger entries written in the same unit of work as the balance change
//!
//! ## Example
//!
//! ```no_run
//! use wallet_ledger::db::{Database, DatabaseConfig};
//! use wallet_ledger::wallet::WalletManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&DatabaseConfig::from_env()).await?;
//!     let wallets = WalletManager::new(Arc::new(db.ledger_store()));
//!
//!     let alice = wallets.create_wallet("alice").await?;
//!     let bob = wallets.create_wallet("bob").await?;
//!
//!     wallets.deposit(alice.id, 20_000).await?;
//!     let receipt = wallets.transfer(alice.id, bob.id, 5_000).await?;
//!     println!("Alice now holds {}", receipt.balance);
//!
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{WalletError, WalletResult};
pub use manager::WalletManager;
pub use models::{
    EntryId, EntryKind, GroupId, LedgerEntry, OperationReceipt, Wallet, WalletId, replay_balance,
};
