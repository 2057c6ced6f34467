//! Mapping of engine failures to HTTP responses.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use wallet_ledger::wallet::WalletError;

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable kind, e.g. `insufficient_funds`
    pub error: String,
    pub message: String,
    /// Whether repeating the request may succeed
    pub retryable: bool,
}

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// The request could not be decoded
    #[error("{0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Wallet(err) => match err {
                WalletError::WalletNotFound(_) | WalletError::CounterpartyWalletNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                WalletError::SelfTransferNotAllowed
                | WalletError::InvalidAmount(_)
                | WalletError::InvalidUserId => StatusCode::BAD_REQUEST,
                WalletError::InsufficientFunds { .. } | WalletError::BalanceOverflow => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                WalletError::Store(_) if err.is_retryable() => StatusCode::CONFLICT,
                WalletError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            ApiError::InvalidRequest(message) => ErrorResponse {
                error: "invalid_request".to_string(),
                message: message.clone(),
                retryable: false,
            },
            ApiError::Wallet(err) => ErrorResponse {
                error: err.kind().to_string(),
                message: err.client_message(),
                retryable: err.is_retryable(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
