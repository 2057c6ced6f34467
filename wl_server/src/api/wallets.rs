//! Wallet API handlers.
//!
//! Thin HTTP layer over [`WalletManager`]: decode the wallet id and body,
//! call the engine once, serialize the result. Engine failures become
//! [`ApiError`] responses.
//!
//! # Examples
//!
//! Deposit into a wallet:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/wallets/WALLET_ID/deposit \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": 1000}'
//! ```
//!
//! Transfer between wallets:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/wallets/WALLET_ID/transfer \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": 5000, "counterparty_wallet_id": "OTHER_ID"}'
//! ```

use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;
use wallet_ledger::wallet::{LedgerEntry, OperationReceipt, Wallet, WalletResult};

use super::{AppState, errors::ApiError, request_id::RequestId};
use crate::metrics;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    #[serde(alias = "userId")]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AmountRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: i64,
    #[serde(alias = "counterpartyWalletId")]
    pub counterparty_wallet_id: Uuid,
}

/// Run one engine mutation inside a request span and record its metrics.
///
/// The engine logs the outcome itself.
async fn observe<F>(
    operation: &'static str,
    request_id: &RequestId,
    call: F,
) -> WalletResult<OperationReceipt>
where
    F: Future<Output = WalletResult<OperationReceipt>>,
{
    let span = tracing::info_span!("wallet_operation", request_id = %request_id.as_str(), operation);
    let started = Instant::now();
    let result = call.instrument(span).await;

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::wallet_operations_total(operation, outcome);
    metrics::wallet_operation_duration_ms(operation, started.elapsed().as_secs_f64() * 1000.0);

    result
}

/// Create a wallet.
///
/// # Request Body
///
/// ```json
/// { "user_id": "alice" }
/// ```
///
/// # Response
///
/// Returns `201 Created` with the new wallet, balance 0.
///
/// # Errors
///
/// - `400 Bad Request`: Blank user id or malformed body
pub async fn create_wallet(
    State(state): State<AppState>,
    payload: Result<Json<CreateWalletRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Wallet>), ApiError> {
    let Json(request) = payload?;
    let wallet = state.wallet_manager.create_wallet(&request.user_id).await?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

/// List the wallets owned by a user.
pub async fn list_user_wallets(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Wallet>>, ApiError> {
    let wallets = state.wallet_manager.get_wallets_by_user(&user_id).await?;
    Ok(Json(wallets))
}

/// Deposit into a wallet.
///
/// # Response
///
/// Returns `200 OK` with the receipt:
/// ```json
/// { "entry_id": "...", "wallet_id": "...", "amount": 1000, "balance": 6000 }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Amount not positive, malformed id or body
/// - `404 Not Found`: Wallet doesn't exist
pub async fn deposit(
    State(state): State<AppState>,
    request_id: RequestId,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<Json<OperationReceipt>, ApiError> {
    let Path(wallet_id) = path?;
    let Json(request) = payload?;

    let receipt = observe(
        "deposit",
        &request_id,
        state.wallet_manager.deposit(wallet_id, request.amount),
    )
    .await?;
    Ok(Json(receipt))
}

/// Withdraw from a wallet.
///
/// # Errors
///
/// - `400 Bad Request`: Amount not positive, malformed id or body
/// - `404 Not Found`: Wallet doesn't exist
/// - `409 Conflict`: Wallet locked by another request; `retryable` is true
/// - `422 Unprocessable Entity`: Insufficient funds
pub async fn withdraw(
    State(state): State<AppState>,
    request_id: RequestId,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<Json<OperationReceipt>, ApiError> {
    let Path(wallet_id) = path?;
    let Json(request) = payload?;

    let receipt = observe(
        "withdraw",
        &request_id,
        state.wallet_manager.withdraw(wallet_id, request.amount),
    )
    .await?;
    Ok(Json(receipt))
}

/// Transfer from a wallet to a counterparty wallet.
///
/// # Request Body
///
/// ```json
/// { "amount": 5000, "counterparty_wallet_id": "..." }
/// ```
///
/// `counterpartyWalletId` is accepted as well.
///
/// # Errors
///
/// - `400 Bad Request`: Self transfer, amount not positive, malformed id or body
/// - `404 Not Found`: Source or counterparty wallet doesn't exist
/// - `422 Unprocessable Entity`: Insufficient funds
pub async fn transfer(
    State(state): State<AppState>,
    request_id: RequestId,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Json<OperationReceipt>, ApiError> {
    let Path(wallet_id) = path?;
    let Json(request) = payload?;

    let receipt = observe(
        "transfer",
        &request_id,
        state
            .wallet_manager
            .transfer(wallet_id, request.counterparty_wallet_id, request.amount),
    )
    .await?;
    Ok(Json(receipt))
}

/// Current wallet state.
pub async fn get_balance(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Wallet>, ApiError> {
    let Path(wallet_id) = path?;
    Ok(Json(state.wallet_manager.get_balance(wallet_id).await?))
}

/// Ledger entries of a wallet, oldest first.
pub async fn get_history(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let Path(wallet_id) = path?;
    Ok(Json(state.wallet_manager.get_history(wallet_id).await?))
}

/// Every ledger entry (administrative).
pub async fn list_all_entries(
    State(state): State<AppState>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    Ok(Json(state.wallet_manager.get_all_entries().await?))
}

/// Remove all wallets and entries (administrative).
///
/// Returns `204 No Content`.
pub async fn reset(
    State(state): State<AppState>,
    request_id: RequestId,
) -> Result<StatusCode, ApiError> {
    tracing::warn!(request_id = %request_id.as_str(), "Ledger reset requested");
    state.wallet_manager.delete_all().await?;
    Ok(StatusCode::NO_CONTENT)
}
