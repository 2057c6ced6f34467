//! HTTP server for the wallet ledger.
//!
//! Exposes the balance mutation engine over a JSON API, with structured
//! logging, Prometheus metrics and environment-driven configuration.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
