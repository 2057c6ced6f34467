//! In-process ledger store.
//!
//! Keeps committed state behind a mutex and gives every wallet its own async
//! row lock. A unit of work owns the guards of the rows it locked and stages
//! its writes; commit applies them in one step, drop throws them away.
//! Constraints mirror the database schema: balances never go negative,
//! entry amounts are positive and entries reference existing wallets.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use super::repository::{LedgerStore, StoreError, StoreResult, UnitOfWork, WaitPolicy};
use super::timeouts::DEFAULT_LOCK_TIMEOUT;
use crate::wallet::models::{LedgerEntry, Wallet, WalletId};

#[derive(Default)]
struct MemoryState {
    wallets: HashMap<WalletId, Wallet>,
    entries: Vec<LedgerEntry>,
}

struct Shared {
    state: Mutex<MemoryState>,
    row_locks: Mutex<HashMap<WalletId, Arc<RowLock<()>>>>,
    lock_timeout: Duration,
}

impl Shared {
    // Poisoning is ignored: state is only ever mutated after validation.
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_locks(&self) -> MutexGuard<'_, HashMap<WalletId, Arc<RowLock<()>>>> {
        self.row_locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_lock(&self, wallet_id: WalletId) -> Arc<RowLock<()>> {
        self.row_locks().entry(wallet_id).or_default().clone()
    }

    /// Forget the row lock of `wallet_id` unless a unit of work holds or awaits it
    fn release_row_lock(&self, wallet_id: WalletId) {
        let mut locks = self.row_locks();
        if locks
            .get(&wallet_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&wallet_id);
        }
    }

    /// Drop every row lock nobody holds or awaits
    fn prune_row_locks(&self) {
        self.row_locks()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn committed_wallet(&self, wallet_id: WalletId) -> Option<Wallet> {
        self.state().wallets.get(&wallet_id).cloned()
    }
}

/// Ledger store kept in process memory
#[derive(Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Store whose blocking lock waits give up after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            shared: self.shared.clone(),
            held: HashMap::new(),
            staged_wallets: HashMap::new(),
            staged_entries: Vec::new(),
        }))
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> StoreResult<Option<Wallet>> {
        Ok(self.shared.committed_wallet(wallet_id))
    }

    async fn find_wallets_by_user(&self, user_id: &str) -> StoreResult<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self
            .shared
            .state()
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(wallets)
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        if wallet.balance < 0 {
            return Err(StoreError::Integrity(
                "wallet balance must not be negative".to_string(),
            ));
        }
        let mut state = self.shared.state();
        if state.wallets.contains_key(&wallet.id) {
            return Err(StoreError::Integrity(format!(
                "duplicate wallet id {}",
                wallet.id
            )));
        }
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn find_entries_by_wallet(&self, wallet_id: WalletId) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .shared
            .state()
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn find_all_entries(&self) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self.shared.state().entries.clone())
    }

    async fn delete_all(&self) -> StoreResult<()> {
        {
            let mut state = self.shared.state();
            state.entries.clear();
            state.wallets.clear();
        }
        self.shared.prune_row_locks();
        Ok(())
    }
}

/// Unit of work over [`MemoryLedgerStore`]
pub struct MemoryUnitOfWork {
    shared: Arc<Shared>,
    held: HashMap<WalletId, OwnedMutexGuard<()>>,
    staged_wallets: HashMap<WalletId, Wallet>,
    staged_entries: Vec<LedgerEntry>,
}

impl MemoryUnitOfWork {
    async fn acquire(&self, wallet_id: WalletId, wait: WaitPolicy) -> StoreResult<OwnedMutexGuard<()>> {
        let lock = self.shared.row_lock(wallet_id);
        match wait {
            WaitPolicy::Blocking => tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned())
                .await
                .map_err(|_| StoreError::LockNotAvailable),
            WaitPolicy::NoWait => lock
                .try_lock_owned()
                .map_err(|_| StoreError::LockNotAvailable),
        }
    }

    fn wallet_exists(&self, wallet_id: WalletId) -> bool {
        self.staged_wallets.contains_key(&wallet_id)
            || self.shared.state().wallets.contains_key(&wallet_id)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn locked_find(
        &mut self,
        wallet_id: WalletId,
        wait: WaitPolicy,
    ) -> StoreResult<Option<Wallet>> {
        if !self.held.contains_key(&wallet_id) {
            let guard = self.acquire(wallet_id, wait).await?;
            if self.shared.committed_wallet(wallet_id).is_none() {
                drop(guard);
                self.shared.release_row_lock(wallet_id);
                return Ok(None);
            }
            self.held.insert(wallet_id, guard);
        }

        if let Some(staged) = self.staged_wallets.get(&wallet_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.shared.committed_wallet(wallet_id))
    }

    async fn save_wallets(&mut self, wallets: &[Wallet]) -> StoreResult<()> {
        for wallet in wallets {
            if !self.held.contains_key(&wallet.id) {
                return Err(StoreError::Integrity(format!(
                    "wallet {} saved without holding its lock",
                    wallet.id
                )));
            }
            if wallet.balance < 0 {
                return Err(StoreError::Integrity(format!(
                    "wallet {} balance must not be negative",
                    wallet.id
                )));
            }
        }
        for wallet in wallets {
            self.staged_wallets.insert(wallet.id, wallet.clone());
        }
        Ok(())
    }

    async fn append_entries(&mut self, entries: &[LedgerEntry]) -> StoreResult<()> {
        for entry in entries {
            if entry.amount <= 0 {
                return Err(StoreError::Integrity(format!(
                    "entry {} amount must be positive",
                    entry.id
                )));
            }
            if entry.kind.is_transfer() != entry.group_id.is_some() {
                return Err(StoreError::Integrity(format!(
                    "entry {} group id does not match its kind",
                    entry.id
                )));
            }
            if !self.wallet_exists(entry.wallet_id) {
                return Err(StoreError::Integrity(format!(
                    "entry {} references unknown wallet {}",
                    entry.id, entry.wallet_id
                )));
            }
        }
        self.staged_entries.extend_from_slice(entries);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork {
            shared,
            held,
            staged_wallets,
            staged_entries,
        } = *self;

        {
            let mut state = shared.state();
            state.wallets.extend(staged_wallets);
            state.entries.extend(staged_entries);
        }

        // Locks are released only once the new state is visible
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn store_with_wallet(balance: i64) -> (MemoryLedgerStore, Wallet) {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(200));
        let mut wallet = Wallet::open("alice", Utc::now());
        wallet.balance = balance;
        store.insert_wallet(&wallet).await.unwrap();
        (store, wallet)
    }

    #[tokio::test]
    async fn test_nowait_fails_while_row_is_held() {
        let (store, wallet) = store_with_wallet(100).await;

        let mut first = store.begin().await.unwrap();
        first
            .locked_find(wallet.id, WaitPolicy::Blocking)
            .await
            .unwrap()
            .expect("wallet exists");

        let mut second = store.begin().await.unwrap();
        let result = second.locked_find(wallet.id, WaitPolicy::NoWait).await;
        assert!(matches!(result, Err(StoreError::LockNotAvailable)));
    }

    #[tokio::test]
    async fn test_blocking_wait_times_out() {
        let (store, wallet) = store_with_wallet(100).await;

        let mut first = store.begin().await.unwrap();
        first
            .locked_find(wallet.id, WaitPolicy::Blocking)
            .await
            .unwrap();

        let mut second = store.begin().await.unwrap();
        let result = second.locked_find(wallet.id, WaitPolicy::Blocking).await;
        assert!(matches!(result, Err(StoreError::LockNotAvailable)));
    }

    #[tokio::test]
    async fn test_waiter_sees_committed_balance() {
        let (store, wallet) = store_with_wallet(100).await;

        let mut first = store.begin().await.unwrap();
        let mut locked = first
            .locked_find(wallet.id, WaitPolicy::Blocking)
            .await
            .unwrap()
            .unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut uow = waiter_store.begin().await.unwrap();
            uow.locked_find(wallet.id, WaitPolicy::Blocking)
                .await
                .unwrap()
                .unwrap()
                .balance
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        locked.balance = 250;
        first.save_wallets(&[locked]).await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes_and_releases_lock() {
        let (store, wallet) = store_with_wallet(100).await;

        let mut uow = store.begin().await.unwrap();
        let mut locked = uow
            .locked_find(wallet.id, WaitPolicy::NoWait)
            .await
            .unwrap()
            .unwrap();
        locked.balance = 0;
        uow.save_wallets(&[locked.clone()]).await.unwrap();
        uow.append_entries(&[LedgerEntry::withdrawal(wallet.id, 100, Utc::now())])
            .await
            .unwrap();
        uow.rollback().await.unwrap();

        assert_eq!(store.find_wallet(wallet.id).await.unwrap().unwrap().balance, 100);
        assert!(store.find_all_entries().await.unwrap().is_empty());

        let mut next = store.begin().await.unwrap();
        assert!(next.locked_find(wallet.id, WaitPolicy::NoWait).await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let (store, wallet) = store_with_wallet(100).await;

        {
            let mut uow = store.begin().await.unwrap();
            uow.locked_find(wallet.id, WaitPolicy::NoWait).await.unwrap();
        }

        let mut next = store.begin().await.unwrap();
        assert!(next.locked_find(wallet.id, WaitPolicy::NoWait).await.is_ok());
    }

    #[tokio::test]
    async fn test_reads_inside_unit_of_work_see_staged_writes() {
        let (store, wallet) = store_with_wallet(100).await;

        let mut uow = store.begin().await.unwrap();
        let mut locked = uow
            .locked_find(wallet.id, WaitPolicy::Blocking)
            .await
            .unwrap()
            .unwrap();
        locked.balance = 40;
        uow.save_wallets(&[locked]).await.unwrap();

        let again = uow
            .locked_find(wallet.id, WaitPolicy::NoWait)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.balance, 40);
        assert_eq!(store.find_wallet(wallet.id).await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_missing_wallet_is_not_locked() {
        let store = MemoryLedgerStore::new();
        let mut uow = store.begin().await.unwrap();
        let missing = uuid::Uuid::new_v4();
        assert!(uow
            .locked_find(missing, WaitPolicy::Blocking)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_constraints_are_enforced() {
        let (store, wallet) = store_with_wallet(100).await;
        let mut uow = store.begin().await.unwrap();

        let mut unlocked = wallet.clone();
        unlocked.balance = 50;
        assert!(matches!(
            uow.save_wallets(&[unlocked]).await,
            Err(StoreError::Integrity(_))
        ));

        let mut locked = uow
            .locked_find(wallet.id, WaitPolicy::Blocking)
            .await
            .unwrap()
            .unwrap();
        locked.balance = -1;
        assert!(matches!(
            uow.save_wallets(&[locked]).await,
            Err(StoreError::Integrity(_))
        ));

        let orphan = LedgerEntry::deposit(uuid::Uuid::new_v4(), 10, Utc::now());
        assert!(matches!(
            uow.append_entries(&[orphan]).await,
            Err(StoreError::Integrity(_))
        ));

        let zero = LedgerEntry::deposit(wallet.id, 0, Utc::now());
        assert!(matches!(
            uow.append_entries(&[zero]).await,
            Err(StoreError::Integrity(_))
        ));
    }

    fn row_lock_count(store: &MemoryLedgerStore) -> usize {
        store.shared.row_locks().len()
    }

    #[tokio::test]
    async fn test_missing_wallet_lookups_leave_no_row_locks() {
        let store = MemoryLedgerStore::new();
        for _ in 0..1000 {
            let mut uow = store.begin().await.unwrap();
            let found = uow
                .locked_find(uuid::Uuid::new_v4(), WaitPolicy::Blocking)
                .await
                .unwrap();
            assert!(found.is_none());
            uow.rollback().await.unwrap();
        }
        assert_eq!(row_lock_count(&store), 0);
    }

    #[tokio::test]
    async fn test_delete_all_prunes_unheld_row_locks() {
        let (store, wallet) = store_with_wallet(100).await;
        let other = Wallet::open("bob", Utc::now());
        store.insert_wallet(&other).await.unwrap();

        let mut idle = store.begin().await.unwrap();
        idle.locked_find(wallet.id, WaitPolicy::Blocking).await.unwrap();
        idle.commit().await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.locked_find(other.id, WaitPolicy::Blocking).await.unwrap();
        assert_eq!(row_lock_count(&store), 2);

        store.delete_all().await.unwrap();
        assert_eq!(row_lock_count(&store), 1);

        holder.rollback().await.unwrap();
        store.delete_all().await.unwrap();
        assert_eq!(row_lock_count(&store), 0);
    }

    #[tokio::test]
    async fn test_delete_all_clears_everything() {
        let (store, wallet) = store_with_wallet(0).await;
        store.delete_all().await.unwrap();
        assert!(store.find_wallet(wallet.id).await.unwrap().is_none());
        assert!(store.find_wallets_by_user("alice").await.unwrap().is_empty());
    }
}
