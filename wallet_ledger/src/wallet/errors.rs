//! Wallet error types.

use thiserror::Error;

use super::models::WalletId;
use crate::db::repository::StoreError;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Wallet not found
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// Transfer target not found
    #[error("Counterparty wallet not found: {0}")]
    CounterpartyWalletNotFound(WalletId),

    /// Transfer target is the source wallet
    #[error("Counterparty wallet cannot be the same as the source wallet")]
    SelfTransferNotAllowed,

    /// Insufficient balance
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: i64, required: i64 },

    /// Invalid amount (must be positive)
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Empty owner on wallet creation
    #[error("User id must not be empty")]
    InvalidUserId,

    /// Balance would leave the representable range
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Ledger store failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl WalletError {
    /// Stable machine-readable kind for callers
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::WalletNotFound(_) => "wallet_not_found",
            WalletError::CounterpartyWalletNotFound(_) => "counterparty_wallet_not_found",
            WalletError::SelfTransferNotAllowed => "self_transfer_not_allowed",
            WalletError::InsufficientFunds { .. } => "insufficient_funds",
            WalletError::InvalidAmount(_) => "invalid_amount",
            WalletError::InvalidUserId => "invalid_user_id",
            WalletError::BalanceOverflow => "balance_overflow",
            WalletError::Store(e) if e.is_transient() => "retryable_contention",
            WalletError::Store(_) => "internal_failure",
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Covers lock contention (including a withdrawal finding its wallet
    /// locked) and every other transient store condition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Store(e) if e.is_transient())
    }

    /// Whether the error is a storage failure rather than a business rejection
    pub fn is_internal(&self) -> bool {
        matches!(self, WalletError::Store(_))
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Storage errors are reduced to a generic message; the details are logged
    /// where they occur.
    pub fn client_message(&self) -> String {
        match self {
            WalletError::Store(e) if e.is_transient() => {
                "Wallet is busy, please retry".to_string()
            }
            WalletError::Store(_) => "Internal server error".to_string(),
            WalletError::WalletNotFound(_) => "Wallet not found".to_string(),
            WalletError::CounterpartyWalletNotFound(_) => {
                "Counterparty wallet not found".to_string()
            }
            WalletError::InsufficientFunds { .. } => "Insufficient funds".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_business_errors_are_not_retryable() {
        let errors = [
            WalletError::WalletNotFound(Uuid::new_v4()),
            WalletError::CounterpartyWalletNotFound(Uuid::new_v4()),
            WalletError::SelfTransferNotAllowed,
            WalletError::InsufficientFunds {
                available: 10,
                required: 20,
            },
            WalletError::InvalidAmount(0),
        ];
        for err in errors {
            assert!(!err.is_retryable(), "{err} should not be retryable");
            assert!(!err.is_internal());
        }
    }

    #[test]
    fn test_lock_contention_is_retryable() {
        let err = WalletError::from(StoreError::LockNotAvailable);
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "retryable_contention");

        let err = WalletError::from(StoreError::Timeout(Duration::from_secs(5)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_store_errors_are_sanitized() {
        let err = WalletError::from(StoreError::Integrity(
            "UPDATE wallets touched 0 rows".to_string(),
        ));
        assert_eq!(err.kind(), "internal_failure");
        assert_eq!(err.client_message(), "Internal server error");
        assert!(!err.client_message().contains("wallets"));
    }

    #[test]
    fn test_not_found_message_hides_id() {
        let id = Uuid::new_v4();
        let err = WalletError::WalletNotFound(id);
        assert!(!err.client_message().contains(&id.to_string()));
        assert!(err.to_string().contains(&id.to_string()));
    }
}
