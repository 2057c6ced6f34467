/// Property-based tests for the ledger invariants using proptest
///
/// Random sequences of deposits, withdrawals and transfers are replayed
/// against the engine and a plain balance model side by side.
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use wallet_ledger::db::MemoryLedgerStore;
use wallet_ledger::wallet::{EntryKind, WalletError, WalletManager, replay_balance};

const WALLETS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Deposit(usize, i64),
    Withdraw(usize, i64),
    Transfer(usize, usize, i64),
}

// Strategy to generate one operation over a small set of wallets
fn op_strategy() -> impl Strategy<Value = Op> {
    let wallet = 0..WALLETS;
    let amount = 1i64..=5000;
    prop_oneof![
        (wallet.clone(), amount.clone()).prop_map(|(w, a)| Op::Deposit(w, a)),
        (wallet.clone(), amount.clone()).prop_map(|(w, a)| Op::Withdraw(w, a)),
        (wallet.clone(), wallet, amount).prop_map(|(from, to, a)| Op::Transfer(from, to, a)),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_balances_match_model_and_ledger(ops in prop::collection::vec(op_strategy(), 1..40)) {
        runtime().block_on(async {
            let wallets = WalletManager::new(Arc::new(MemoryLedgerStore::new()));
            let mut ids = Vec::new();
            for i in 0..WALLETS {
                ids.push(wallets.create_wallet(&format!("user{i}")).await.unwrap().id);
            }
            let mut model = [0i64; WALLETS];

            for op in &ops {
                match *op {
                    Op::Deposit(w, amount) => {
                        let receipt = wallets.deposit(ids[w], amount).await.unwrap();
                        model[w] += amount;
                        prop_assert_eq!(receipt.balance, model[w]);
                    }
                    Op::Withdraw(w, amount) => {
                        match wallets.withdraw(ids[w], amount).await {
                            Ok(receipt) => {
                                prop_assert!(model[w] >= amount);
                                model[w] -= amount;
                                prop_assert_eq!(receipt.balance, model[w]);
                            }
                            Err(WalletError::InsufficientFunds { available, required }) => {
                                prop_assert!(model[w] < amount);
                                prop_assert_eq!(available, model[w]);
                                prop_assert_eq!(required, amount);
                            }
                            Err(e) => prop_assert!(false, "unexpected error: {}", e),
                        }
                    }
                    Op::Transfer(from, to, amount) => {
                        match wallets.transfer(ids[from], ids[to], amount).await {
                            Ok(receipt) => {
                                prop_assert!(from != to && model[from] >= amount);
                                model[from] -= amount;
                                model[to] += amount;
                                prop_assert_eq!(receipt.balance, model[from]);
                            }
                            Err(WalletError::SelfTransferNotAllowed) => prop_assert_eq!(from, to),
                            Err(WalletError::InsufficientFunds { .. }) => {
                                prop_assert!(model[from] < amount);
                            }
                            Err(e) => prop_assert!(false, "unexpected error: {}", e),
                        }
                    }
                }

                for (i, id) in ids.iter().enumerate() {
                    let balance = wallets.get_balance(*id).await.unwrap().balance;
                    prop_assert!(balance >= 0);
                    prop_assert_eq!(balance, model[i]);
                }
            }

            for (i, id) in ids.iter().enumerate() {
                let history = wallets.get_history(*id).await.unwrap();
                prop_assert_eq!(replay_balance(&history), Some(model[i]));
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_transfer_entries_come_in_pairs(ops in prop::collection::vec(op_strategy(), 1..40)) {
        runtime().block_on(async {
            let wallets = WalletManager::new(Arc::new(MemoryLedgerStore::new()));
            let mut ids = Vec::new();
            for i in 0..WALLETS {
                let id = wallets.create_wallet(&format!("user{i}")).await.unwrap().id;
                wallets.deposit(id, 10_000).await.unwrap();
                ids.push(id);
            }

            for op in &ops {
                let _ = match *op {
                    Op::Deposit(w, amount) => wallets.deposit(ids[w], amount).await,
                    Op::Withdraw(w, amount) => wallets.withdraw(ids[w], amount).await,
                    Op::Transfer(from, to, amount) => {
                        wallets.transfer(ids[from], ids[to], amount).await
                    }
                };
            }

            let mut groups: HashMap<_, Vec<_>> = HashMap::new();
            for entry in wallets.get_all_entries().await.unwrap() {
                prop_assert!(entry.amount > 0);
                match entry.group_id {
                    Some(group) => {
                        prop_assert!(entry.kind.is_transfer());
                        groups.entry(group).or_default().push(entry);
                    }
                    None => prop_assert!(!entry.kind.is_transfer()),
                }
            }

            for pair in groups.values() {
                prop_assert_eq!(pair.len(), 2);
                let out = pair.iter().find(|e| e.kind == EntryKind::TransferOut);
                let inc = pair.iter().find(|e| e.kind == EntryKind::TransferIn);
                prop_assert!(out.is_some() && inc.is_some());
                if let (Some(out), Some(inc)) = (out, inc) {
                    prop_assert_eq!(out.amount, inc.amount);
                    prop_assert_ne!(out.wallet_id, inc.wallet_id);
                    prop_assert_eq!(out.counterparty_wallet_id, Some(inc.wallet_id));
                }
            }
            Ok(())
        })?;
    }
}
