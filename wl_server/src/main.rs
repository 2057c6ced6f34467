//! Wallet ledger HTTP server.
//!
//! Serves the balance mutation engine over HTTP, backed by PostgreSQL or by
//! the in-process store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Error};
use pico_args::Arguments;
use tracing::info;
use wallet_ledger::{
    db::{Database, LedgerStore, MemoryLedgerStore},
    wallet::WalletManager,
};
use wl_server::{
    api,
    config::{ServerConfig, StorageBackend},
    logging, metrics,
};

const HELP: &str = "\
Run the wallet ledger server

USAGE:
  wl_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL or postgres://postgres@localhost/wallet_db]
  --storage    BACKEND     postgres or memory          [default: env STORAGE_BACKEND or postgres]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  METRICS_BIND             Prometheus listener address (disabled when unset)
  DB_LOCK_TIMEOUT_MS       Row lock wait limit
  DB_STATEMENT_TIMEOUT_MS  Statement limit inside a unit of work
  RUST_LOG                 Log filter (default: info,sqlx=warn,hyper=warn)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    storage: Option<StorageBackend>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        storage: pargs.opt_value_from_str("--storage")?,
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url, args.storage)?;
    config.validate()?;

    if let Some(metrics_bind) = config.metrics_bind {
        metrics::init_metrics(metrics_bind).map_err(anyhow::Error::msg)?;
        info!("Prometheus metrics listening on {}", metrics_bind);
    }

    let (store, database): (Arc<dyn LedgerStore>, Option<Database>) = match config.storage {
        StorageBackend::Postgres => {
            let started = Instant::now();
            let db = Database::new(&config.database)
                .await
                .context("Failed to connect to database")?;
            logging::log_database_operation("connect", started.elapsed().as_millis() as u64);

            let started = Instant::now();
            db.migrate().await.context("Failed to run migrations")?;
            logging::log_database_operation("migrate", started.elapsed().as_millis() as u64);

            info!("Database connected and migrated");
            let store: Arc<dyn LedgerStore> = Arc::new(db.ledger_store());
            (store, Some(db))
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; data is lost on exit");
            let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::with_lock_timeout(
                config.database.lock_timeout(),
            ));
            (store, None)
        }
    };

    let state = api::AppState {
        wallet_manager: Arc::new(WalletManager::new(store)),
        database: database.clone(),
    };
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{} with {} storage. Press Ctrl+C to stop.",
        config.bind, config.storage
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down server...");
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}
