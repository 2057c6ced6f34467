//! Prometheus metrics for monitoring the wallet server.
//!
//! Metrics are exposed in Prometheus text format on a separate listener when
//! `METRICS_BIND` is set. Without an installed exporter the recording helpers
//! are no-ops.
//!
//! # Metrics
//!
//! - `http_requests_total{method,path,status}`
//! - `http_request_duration_ms{method,path}`
//! - `wallet_operations_total{operation,outcome}`
//! - `wallet_operation_duration_ms{operation}`
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use wl_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::wallet_operations_total("withdraw", "insufficient_funds");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Wallet Metrics
// ============================================================================

/// Count a wallet mutation by operation and outcome (`ok` or error kind).
pub fn wallet_operations_total(operation: &str, outcome: &str) {
    metrics::counter!("wallet_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record wallet mutation duration in milliseconds.
pub fn wallet_operation_duration_ms(operation: &str, duration_ms: f64) {
    metrics::histogram!("wallet_operation_duration_ms",
        "operation" => operation.to_string()
    )
    .record(duration_ms);
}
