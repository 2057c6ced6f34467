//! HTTP API for the wallet server.
//!
//! # Modules
//!
//! - [`wallets`]: Wallet creation, balance mutations and ledger reads
//! - [`errors`]: Mapping of engine failures to status codes and error bodies
//! - [`request_id`]: Request correlation ids and HTTP metrics
//!
//! # Endpoints Overview
//!
//! ```text
//! GET    /health                                   - Health check
//! POST   /api/v1/wallets                           - Create wallet
//! GET    /api/v1/wallets/user/{user_id}            - Wallets of a user
//! POST   /api/v1/wallets/{wallet_id}/deposit       - Deposit
//! POST   /api/v1/wallets/{wallet_id}/withdraw      - Withdraw
//! POST   /api/v1/wallets/{wallet_id}/transfer      - Transfer
//! GET    /api/v1/wallets/{wallet_id}/balance       - Current wallet state
//! GET    /api/v1/wallets/{wallet_id}/transactions  - Wallet ledger
//! GET    /api/v1/transactions                      - Whole ledger (administrative)
//! DELETE /api/v1/admin/reset                       - Remove everything (administrative)
//! ```
//!
//! Failures answer with `{"error": kind, "message": text, "retryable": bool}`.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wallet_ledger::{MemoryLedgerStore, WalletManager};
//! use wl_server::api::{AppState, create_router};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let state = AppState {
//!     wallet_manager: Arc::new(WalletManager::new(Arc::new(MemoryLedgerStore::new()))),
//!     database: None,
//! };
//!
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod errors;
pub mod request_id;
pub mod wallets;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use wallet_ledger::{db::Database, wallet::WalletManager};

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub wallet_manager: Arc<WalletManager>,
    /// Database handle for health checks; `None` with the memory backend
    pub database: Option<Database>,
}

/// Create the complete API router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_v1_router())
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Create API v1 router with all versioned endpoints.
fn create_v1_router() -> Router<AppState> {
    let wallet_routes = Router::new()
        .route("/wallets", post(wallets::create_wallet))
        .route("/wallets/user/{user_id}", get(wallets::list_user_wallets))
        .route("/wallets/{wallet_id}/deposit", post(wallets::deposit))
        .route("/wallets/{wallet_id}/withdraw", post(wallets::withdraw))
        .route("/wallets/{wallet_id}/transfer", post(wallets::transfer))
        .route("/wallets/{wallet_id}/balance", get(wallets::get_balance))
        .route("/wallets/{wallet_id}/transactions", get(wallets::get_history));

    let admin_routes = Router::new()
        .route("/transactions", get(wallets::list_all_entries))
        .route("/admin/reset", delete(wallets::reset));

    Router::new().merge(wallet_routes).merge(admin_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage answers, `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","storage":"postgres","database":true,"timestamp":"2025-11-22T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (storage, healthy) = match &state.database {
        Some(db) => ("postgres", db.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage,
        "database": healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
