//! Integration tests for the PostgreSQL ledger store.
//!
//! These tests need a reachable database in `DATABASE_URL` and return early
//! when it is not set. They share one database, so they run serially.

use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use wallet_ledger::db::{Database, DatabaseConfig, LedgerStore, UnitOfWork, WaitPolicy};
use wallet_ledger::wallet::{EntryKind, WalletError, WalletManager, replay_balance};

/// Helper to connect, migrate and wipe the test database
async fn setup_test_db() -> Option<(Database, WalletManager)> {
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let config = DatabaseConfig {
        database_url,
        max_connections: 16,
        min_connections: 1,
        connection_timeout_secs: 5,
        idle_timeout_secs: 300,
        max_lifetime_secs: 1800,
        lock_timeout_ms: 2000,
        statement_timeout_ms: 5000,
    };

    let db = Database::new(&config)
        .await
        .expect("Failed to create test database");
    db.migrate().await.expect("Failed to run migrations");

    let wallets = WalletManager::new(Arc::new(db.ledger_store()));
    wallets.delete_all().await.expect("Failed to reset ledger");
    Some((db, wallets))
}

#[tokio::test]
#[serial]
async fn test_health_check() {
    let Some((db, _)) = setup_test_db().await else {
        return;
    };
    db.health_check().await.expect("Health check failed");
    db.close().await;
}

#[tokio::test]
#[serial]
async fn test_deposit_withdraw_and_history() {
    let Some((db, wallets)) = setup_test_db().await else {
        return;
    };

    let wallet = wallets.create_wallet("pg_alice").await.unwrap();
    wallets.deposit(wallet.id, 5000).await.unwrap();
    let receipt = wallets.deposit(wallet.id, 1000).await.unwrap();
    assert_eq!(receipt.balance, 6000);

    let receipt = wallets.withdraw(wallet.id, 2500).await.unwrap();
    assert_eq!(receipt.balance, 3500);

    let err = wallets.withdraw(wallet.id, 10_000).await.unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { .. }));

    let history = wallets.get_history(wallet.id).await.unwrap();
    let kinds: Vec<_> = history.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EntryKind::Deposit, EntryKind::Deposit, EntryKind::Withdrawal]
    );
    assert_eq!(replay_balance(&history), Some(3500));

    db.close().await;
}

#[tokio::test]
#[serial]
async fn test_transfer_and_missing_counterparty() {
    let Some((db, wallets)) = setup_test_db().await else {
        return;
    };

    let source = wallets.create_wallet("pg_alice").await.unwrap();
    let counterparty = wallets.create_wallet("pg_bob").await.unwrap();
    wallets.deposit(source.id, 20000).await.unwrap();
    wallets.deposit(counterparty.id, 1000).await.unwrap();

    let receipt = wallets
        .transfer(source.id, counterparty.id, 5000)
        .await
        .unwrap();
    assert_eq!(receipt.balance, 15000);
    assert_eq!(
        wallets.get_balance(counterparty.id).await.unwrap().balance,
        6000
    );

    let inc = wallets
        .get_history(counterparty.id)
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(inc.kind, EntryKind::TransferIn);
    assert_eq!(inc.wallet_id, counterparty.id);

    let err = wallets
        .transfer(source.id, uuid::Uuid::new_v4(), 100)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::CounterpartyWalletNotFound(_)));
    assert_eq!(wallets.get_balance(source.id).await.unwrap().balance, 15000);

    db.close().await;
}

#[tokio::test]
#[serial]
async fn test_nowait_withdraw_reports_contention() {
    let Some((db, wallets)) = setup_test_db().await else {
        return;
    };

    let wallet = wallets.create_wallet("pg_alice").await.unwrap();
    wallets.deposit(wallet.id, 1000).await.unwrap();

    let store = db.ledger_store();
    let mut holder = store.begin().await.unwrap();
    holder
        .locked_find(wallet.id, WaitPolicy::Blocking)
        .await
        .unwrap();

    let err = wallets.withdraw(wallet.id, 100).await.unwrap_err();
    assert!(err.is_retryable(), "expected contention, got {err}");

    holder.rollback().await.unwrap();
    assert!(wallets.withdraw(wallet.id, 100).await.is_ok());

    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_withdrawals() {
    let Some((db, wallets)) = setup_test_db().await else {
        return;
    };
    let wallets = Arc::new(wallets);

    let wallet = wallets.create_wallet("pg_alice").await.unwrap();
    wallets.deposit(wallet.id, 20000).await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let wallets = wallets.clone();
            tokio::spawn(async move {
                loop {
                    match wallets.withdraw(wallet.id, 10000).await {
                        Err(e) if e.is_retryable() => {
                            tokio::time::sleep(Duration::from_millis(5)).await
                        }
                        other => return other,
                    }
                }
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(WalletError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 2);
    assert_eq!(wallets.get_balance(wallet.id).await.unwrap().balance, 0);

    db.close().await;
}
