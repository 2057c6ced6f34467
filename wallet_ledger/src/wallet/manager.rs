//! Balance mutation engine.
//!
//! Every mutation runs as one unit of work: lock the wallet rows, validate in
//! memory, write the wallet rows and ledger entries, commit. Any failure after
//! `begin` rolls the unit of work back before the error is returned.

use chrono::Utc;
use std::slice;
use std::sync::Arc;

use super::{
    errors::{WalletError, WalletResult},
    models::{LedgerEntry, OperationReceipt, Wallet, WalletId},
};
use crate::db::repository::{LedgerStore, UnitOfWork, WaitPolicy};

/// Wallet manager
#[derive(Clone)]
pub struct WalletManager {
    store: Arc<dyn LedgerStore>,
}

impl WalletManager {
    /// Create a new wallet manager over a ledger store
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Open an empty wallet for `user_id`
    ///
    /// # Errors
    ///
    /// * `WalletError::InvalidUserId` - `user_id` is blank
    pub async fn create_wallet(&self, user_id: &str) -> WalletResult<Wallet> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(WalletError::InvalidUserId);
        }

        let wallet = Wallet::open(user_id, Utc::now());
        self.store.insert_wallet(&wallet).await.inspect_err(|e| {
            log::error!("Failed to create wallet for user {}: {}", user_id, e);
        })?;

        log::info!("Created wallet {} for user {}", wallet.id, user_id);
        Ok(wallet)
    }

    /// Wallets owned by `user_id`, oldest first
    pub async fn get_wallets_by_user(&self, user_id: &str) -> WalletResult<Vec<Wallet>> {
        Ok(self.store.find_wallets_by_user(user_id).await?)
    }

    /// Credit `amount` to a wallet
    ///
    /// Waits for the wallet lock if another unit of work holds it.
    ///
    /// # Errors
    ///
    /// * `WalletError::InvalidAmount` - `amount` is not positive
    /// * `WalletError::WalletNotFound` - no such wallet
    pub async fn deposit(&self, wallet_id: WalletId, amount: i64) -> WalletResult<OperationReceipt> {
        let result = self.run_deposit(wallet_id, amount).await;
        report("deposit", wallet_id, amount, &result);
        result
    }

    /// Debit `amount` from a wallet
    ///
    /// Does not queue for the wallet lock: if another unit of work holds it
    /// the call fails at once with a retryable error.
    ///
    /// # Errors
    ///
    /// * `WalletError::InvalidAmount` - `amount` is not positive
    /// * `WalletError::WalletNotFound` - no such wallet
    /// * `WalletError::InsufficientFunds` - balance is below `amount`
    /// * `WalletError::Store` - retryable when the wallet was locked elsewhere
    pub async fn withdraw(&self, wallet_id: WalletId, amount: i64) -> WalletResult<OperationReceipt> {
        let result = self.run_withdraw(wallet_id, amount).await;
        report("withdraw", wallet_id, amount, &result);
        result
    }

    /// Move `amount` from `wallet_id` to `counterparty_wallet_id`
    ///
    /// Both rows are locked in wallet id order, whichever side is the source,
    /// so opposite transfers between the same pair cannot deadlock. The
    /// receipt describes the `transfer_out` entry and the source balance.
    ///
    /// # Errors
    ///
    /// * `WalletError::InvalidAmount` - `amount` is not positive
    /// * `WalletError::SelfTransferNotAllowed` - both ids are equal
    /// * `WalletError::WalletNotFound` - no source wallet
    /// * `WalletError::InsufficientFunds` - source balance is below `amount`
    /// * `WalletError::CounterpartyWalletNotFound` - no counterparty wallet
    pub async fn transfer(
        &self,
        wallet_id: WalletId,
        counterparty_wallet_id: WalletId,
        amount: i64,
    ) -> WalletResult<OperationReceipt> {
        let result = self
            .run_transfer(wallet_id, counterparty_wallet_id, amount)
            .await;
        report("transfer", wallet_id, amount, &result);
        result
    }

    /// Current wallet state, read without locking
    pub async fn get_balance(&self, wallet_id: WalletId) -> WalletResult<Wallet> {
        self.store
            .find_wallet(wallet_id)
            .await?
            .ok_or(WalletError::WalletNotFound(wallet_id))
    }

    /// Ledger entries of a wallet, oldest first
    ///
    /// A wallet without entries yields an empty list; an unknown wallet is an error.
    pub async fn get_history(&self, wallet_id: WalletId) -> WalletResult<Vec<LedgerEntry>> {
        if self.store.find_wallet(wallet_id).await?.is_none() {
            return Err(WalletError::WalletNotFound(wallet_id));
        }
        Ok(self.store.find_entries_by_wallet(wallet_id).await?)
    }

    /// Every ledger entry across all wallets
    pub async fn get_all_entries(&self) -> WalletResult<Vec<LedgerEntry>> {
        Ok(self.store.find_all_entries().await?)
    }

    /// Remove every wallet and entry.
    ///
    /// Not coordinated with in-flight mutations.
    pub async fn delete_all(&self) -> WalletResult<()> {
        self.store.delete_all().await?;
        log::warn!("Deleted all wallets and ledger entries");
        Ok(())
    }

    async fn run_deposit(&self, wallet_id: WalletId, amount: i64) -> WalletResult<OperationReceipt> {
        validate_amount(amount)?;
        let mut uow = self.store.begin().await?;
        let outcome = apply_deposit(uow.as_mut(), wallet_id, amount).await;
        finish(uow, outcome).await
    }

    async fn run_withdraw(&self, wallet_id: WalletId, amount: i64) -> WalletResult<OperationReceipt> {
        validate_amount(amount)?;
        let mut uow = self.store.begin().await?;
        let outcome = apply_withdraw(uow.as_mut(), wallet_id, amount).await;
        finish(uow, outcome).await
    }

    async fn run_transfer(
        &self,
        wallet_id: WalletId,
        counterparty_wallet_id: WalletId,
        amount: i64,
    ) -> WalletResult<OperationReceipt> {
        validate_amount(amount)?;
        if wallet_id == counterparty_wallet_id {
            return Err(WalletError::SelfTransferNotAllowed);
        }
        let mut uow = self.store.begin().await?;
        let outcome = apply_transfer(uow.as_mut(), wallet_id, counterparty_wallet_id, amount).await;
        finish(uow, outcome).await
    }
}

fn validate_amount(amount: i64) -> WalletResult<()> {
    if amount <= 0 {
        return Err(WalletError::InvalidAmount(amount));
    }
    Ok(())
}

fn ensure_funds(wallet: &Wallet, amount: i64) -> WalletResult<()> {
    if wallet.balance < amount {
        return Err(WalletError::InsufficientFunds {
            available: wallet.balance,
            required: amount,
        });
    }
    Ok(())
}

/// Commit on success, otherwise roll back and hand the original error back
async fn finish<T>(uow: Box<dyn UnitOfWork>, outcome: WalletResult<T>) -> WalletResult<T> {
    match outcome {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                log::error!("Rollback failed after {}: {}", err, rollback_err);
            }
            Err(err)
        }
    }
}

fn report(operation: &str, wallet_id: WalletId, amount: i64, result: &WalletResult<OperationReceipt>) {
    match result {
        Ok(receipt) => log::info!(
            "{} of {} on wallet {} committed, balance {}",
            operation,
            amount,
            wallet_id,
            receipt.balance
        ),
        Err(e) if e.is_retryable() => {
            log::warn!("{} on wallet {} hit contention: {}", operation, wallet_id, e)
        }
        Err(e) if e.is_internal() => {
            log::error!("{} of {} on wallet {} failed: {:?}", operation, amount, wallet_id, e)
        }
        Err(e) => log::warn!("{} on wallet {} rejected: {}", operation, wallet_id, e),
    }
}

async fn apply_deposit(
    uow: &mut dyn UnitOfWork,
    wallet_id: WalletId,
    amount: i64,
) -> WalletResult<OperationReceipt> {
    let mut wallet = uow
        .locked_find(wallet_id, WaitPolicy::Blocking)
        .await?
        .ok_or(WalletError::WalletNotFound(wallet_id))?;

    let now = Utc::now();
    wallet.balance = wallet
        .balance
        .checked_add(amount)
        .ok_or(WalletError::BalanceOverflow)?;
    wallet.updated_at = now;
    let entry = LedgerEntry::deposit(wallet_id, amount, now);

    uow.save_wallets(slice::from_ref(&wallet)).await?;
    uow.append_entries(slice::from_ref(&entry)).await?;

    Ok(OperationReceipt::new(&entry, wallet.balance))
}

async fn apply_withdraw(
    uow: &mut dyn UnitOfWork,
    wallet_id: WalletId,
    amount: i64,
) -> WalletResult<OperationReceipt> {
    let mut wallet = uow
        .locked_find(wallet_id, WaitPolicy::NoWait)
        .await?
        .ok_or(WalletError::WalletNotFound(wallet_id))?;
    ensure_funds(&wallet, amount)?;

    let now = Utc::now();
    wallet.balance -= amount;
    wallet.updated_at = now;
    let entry = LedgerEntry::withdrawal(wallet_id, amount, now);

    uow.save_wallets(slice::from_ref(&wallet)).await?;
    uow.append_entries(slice::from_ref(&entry)).await?;

    Ok(OperationReceipt::new(&entry, wallet.balance))
}

async fn lock_source(
    uow: &mut dyn UnitOfWork,
    wallet_id: WalletId,
    amount: i64,
) -> WalletResult<Wallet> {
    let wallet = uow
        .locked_find(wallet_id, WaitPolicy::Blocking)
        .await?
        .ok_or(WalletError::WalletNotFound(wallet_id))?;
    ensure_funds(&wallet, amount)?;
    Ok(wallet)
}

async fn apply_transfer(
    uow: &mut dyn UnitOfWork,
    source_id: WalletId,
    counterparty_id: WalletId,
    amount: i64,
) -> WalletResult<OperationReceipt> {
    // Lower id first; source checks still run before the counterparty check
    let (mut source, counterparty) = if source_id < counterparty_id {
        let source = lock_source(uow, source_id, amount).await?;
        let counterparty = uow.locked_find(counterparty_id, WaitPolicy::Blocking).await?;
        (source, counterparty)
    } else {
        let counterparty = uow.locked_find(counterparty_id, WaitPolicy::Blocking).await?;
        let source = lock_source(uow, source_id, amount).await?;
        (source, counterparty)
    };
    let mut counterparty = counterparty.ok_or(WalletError::CounterpartyWalletNotFound(counterparty_id))?;

    let now = Utc::now();
    source.balance -= amount;
    source.updated_at = now;
    counterparty.balance = counterparty
        .balance
        .checked_add(amount)
        .ok_or(WalletError::BalanceOverflow)?;
    counterparty.updated_at = now;

    let entries = LedgerEntry::transfer_pair(source_id, counterparty_id, amount, now);
    let balance = source.balance;

    uow.save_wallets(&[source, counterparty]).await?;
    uow.append_entries(&entries).await?;

    Ok(OperationReceipt::new(&entries[0], balance))
}
