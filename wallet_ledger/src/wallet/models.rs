//! Wallet data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Wallet ID type
pub type WalletId = Uuid;

/// Ledger entry ID type
pub type EntryId = Uuid;

/// Links the two entries written by a single transfer
pub type GroupId = Uuid;

/// Wallet model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: String,
    /// Balance in the smallest currency unit, never negative once committed
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet owned by `user_id`
    pub fn open(user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            balance: 0,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Movement kind of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    TransferOut,
    TransferIn,
}

impl EntryKind {
    /// Stored representation, matching the `kind` column constraint
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Deposit => "deposit",
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::TransferOut => "transfer_out",
            EntryKind::TransferIn => "transfer_in",
        }
    }

    /// Whether the movement adds to the wallet balance
    pub fn is_credit(self) -> bool {
        matches!(self, EntryKind::Deposit | EntryKind::TransferIn)
    }

    /// Whether the movement is one half of a transfer
    pub fn is_transfer(self) -> bool {
        matches!(self, EntryKind::TransferOut | EntryKind::TransferIn)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown entry kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown ledger entry kind: {0}")]
pub struct UnknownEntryKind(pub String);

impl FromStr for EntryKind {
    type Err = UnknownEntryKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(EntryKind::Deposit),
            "withdrawal" => Ok(EntryKind::Withdrawal),
            "transfer_out" => Ok(EntryKind::TransferOut),
            "transfer_in" => Ok(EntryKind::TransferIn),
            other => Err(UnknownEntryKind(other.to_string())),
        }
    }
}

/// Immutable ledger entry.
///
/// `amount` is always positive; the direction comes from `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub wallet_id: WalletId,
    pub amount: i64,
    pub kind: EntryKind,
    pub group_id: Option<GroupId>,
    pub counterparty_wallet_id: Option<WalletId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn single(wallet_id: WalletId, amount: i64, kind: EntryKind, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            amount,
            kind,
            group_id: None,
            counterparty_wallet_id: None,
            created_at: at,
        }
    }

    /// Entry recording a deposit into `wallet_id`
    pub fn deposit(wallet_id: WalletId, amount: i64, at: DateTime<Utc>) -> Self {
        Self::single(wallet_id, amount, EntryKind::Deposit, at)
    }

    /// Entry recording a withdrawal from `wallet_id`
    pub fn withdrawal(wallet_id: WalletId, amount: i64, at: DateTime<Utc>) -> Self {
        Self::single(wallet_id, amount, EntryKind::Withdrawal, at)
    }

    /// Both halves of a transfer, `[transfer_out, transfer_in]`.
    ///
    /// The two entries share a fresh group id and amount. The `transfer_in`
    /// entry belongs to the receiving wallet.
    pub fn transfer_pair(
        source: WalletId,
        counterparty: WalletId,
        amount: i64,
        at: DateTime<Utc>,
    ) -> [Self; 2] {
        let group_id = Uuid::new_v4();
        let outgoing = Self {
            id: Uuid::new_v4(),
            wallet_id: source,
            amount,
            kind: EntryKind::TransferOut,
            group_id: Some(group_id),
            counterparty_wallet_id: Some(counterparty),
            created_at: at,
        };
        let incoming = Self {
            id: Uuid::new_v4(),
            wallet_id: counterparty,
            amount,
            kind: EntryKind::TransferIn,
            group_id: Some(group_id),
            counterparty_wallet_id: Some(source),
            created_at: at,
        };
        [outgoing, incoming]
    }

    /// Amount with the sign of its effect on the wallet balance
    pub fn signed_amount(&self) -> i64 {
        if self.kind.is_credit() {
            self.amount
        } else {
            -self.amount
        }
    }
}

/// Rebuild a balance from its ledger, starting at zero.
///
/// Returns `None` if the running sum leaves the `i64` range.
pub fn replay_balance<'a, I>(entries: I) -> Option<i64>
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    entries
        .into_iter()
        .try_fold(0i64, |acc, entry| acc.checked_add(entry.signed_amount()))
}

/// Result of a committed balance mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReceipt {
    /// The entry written for the calling wallet (the `transfer_out` half for transfers)
    pub entry_id: EntryId,
    pub wallet_id: WalletId,
    pub amount: i64,
    /// Balance of `wallet_id` after the commit
    pub balance: i64,
}

impl OperationReceipt {
    pub fn new(entry: &LedgerEntry, balance: i64) -> Self {
        Self {
            entry_id: entry.id,
            wallet_id: entry.wallet_id,
            amount: entry.amount,
            balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_round_trips_through_str() {
        for kind in [
            EntryKind::Deposit,
            EntryKind::Withdrawal,
            EntryKind::TransferOut,
            EntryKind::TransferIn,
        ] {
            assert_eq!(kind.as_str().parse::<EntryKind>(), Ok(kind));
        }
        assert!("refund".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_entry_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EntryKind::TransferOut).unwrap();
        assert_eq!(json, "\"transfer_out\"");
    }

    #[test]
    fn test_transfer_pair_links_both_wallets() {
        let source = Uuid::new_v4();
        let counterparty = Uuid::new_v4();
        let [out, inc] = LedgerEntry::transfer_pair(source, counterparty, 5000, Utc::now());

        assert_eq!(out.kind, EntryKind::TransferOut);
        assert_eq!(out.wallet_id, source);
        assert_eq!(inc.kind, EntryKind::TransferIn);
        assert_eq!(inc.wallet_id, counterparty);
        assert_eq!(out.group_id, inc.group_id);
        assert!(out.group_id.is_some());
        assert_eq!(out.amount, inc.amount);
        assert_ne!(out.id, inc.id);
    }

    #[test]
    fn test_single_entries_have_no_group() {
        let wallet = Uuid::new_v4();
        assert!(LedgerEntry::deposit(wallet, 1, Utc::now()).group_id.is_none());
        assert!(LedgerEntry::withdrawal(wallet, 1, Utc::now()).group_id.is_none());
    }

    #[test]
    fn test_replay_balance_signs_by_kind() {
        let wallet = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();
        let [out, _] = LedgerEntry::transfer_pair(wallet, other, 300, now);
        let [_, inc] = LedgerEntry::transfer_pair(other, wallet, 50, now);
        let entries = vec![
            LedgerEntry::deposit(wallet, 1000, now),
            LedgerEntry::withdrawal(wallet, 200, now),
            out,
            inc,
        ];

        assert_eq!(replay_balance(&entries), Some(550));
        assert_eq!(replay_balance(std::iter::empty::<&LedgerEntry>()), Some(0));
    }

    #[test]
    fn test_receipt_uses_entry_identity() {
        let entry = LedgerEntry::deposit(Uuid::new_v4(), 1000, Utc::now());
        let receipt = OperationReceipt::new(&entry, 6000);
        assert_eq!(receipt.entry_id, entry.id);
        assert_eq!(receipt.wallet_id, entry.wallet_id);
        assert_eq!(receipt.balance, 6000);
    }
}
