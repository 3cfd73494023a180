//! rowsync service.
//!
//! Main entry point. Loads configuration, prepares the store, runs the
//! polling scheduler and the HTTP server, and coordinates graceful
//! shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use rowsync_api::{AppState, Config};
use rowsync_core::{storage::Storage, Clock, RealClock};
use rowsync_sync::{DeliveryClient, PostgresRecordStore, Scheduler, SyncEngine};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!("Starting rowsync");
    let server_addr = config.parse_server_addr()?;
    info!(
        database_url = %config.database_url_masked(),
        server_addr = %server_addr,
        downstream_url = %config.downstream_url,
        max_connections = config.database_max_connections,
        scheduler_enabled = config.scheduler_enabled,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    rowsync_core::storage::schema::ensure_schema(&db_pool)
        .await
        .context("Failed to prepare database schema")?;
    info!("Database schema ready");

    let storage = Arc::new(Storage::new(db_pool.clone()));
    let store = Arc::new(PostgresRecordStore::new(storage));
    let client =
        DeliveryClient::new(config.to_client_config()).context("Failed to build delivery client")?;
    let engine = Arc::new(
        SyncEngine::new(store, client, config.to_sync_config())
            .context("Failed to build sync engine")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let shutdown = CancellationToken::new();

    let scheduler = config.scheduler_enabled.then(|| {
        Scheduler::new(engine.clone(), clock.clone(), shutdown.child_token()).spawn()
    });
    if scheduler.is_none() {
        warn!("Background scheduler disabled; records sync on demand only");
    }

    let server_handle = tokio::spawn({
        let state = AppState::new(engine.clone(), clock);
        let token = shutdown.clone();
        async move {
            if let Err(e) =
                rowsync_api::start_server(state, server_addr, token.cancelled_owned()).await
            {
                error!(error = %e, "Server failed");
            }
        }
    });

    info!(addr = %server_addr, "rowsync is ready");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");
    shutdown.cancel();

    let deadline = tokio::time::Instant::now() + config.shutdown_grace();
    let scheduler_stopped = async move {
        if let Some(scheduler) = scheduler {
            match scheduler.shutdown_until(deadline).await {
                Ok(()) => info!("Scheduler stopped"),
                Err(e) => warn!(error = %e, "Scheduler did not stop cleanly"),
            }
        }
    };
    let server_stopped = async move {
        match tokio::time::timeout_at(deadline, server_handle).await {
            Ok(_) => info!("Server stopped"),
            Err(_) => warn!("Shutdown grace period expired before server stopped"),
        }
    };
    tokio::join!(scheduler_stopped, server_stopped);

    db_pool.close().await;
    info!("Database connections closed");

    let stats = engine.stats().await;
    info!(
        passes_completed = stats.passes_completed,
        passes_failed = stats.passes_failed,
        records_synced = stats.records_synced,
        records_failed = stats.records_failed,
        "rowsync shutdown complete"
    );
    Ok(())
}

/// Initializes tracing from the configured filter directives.
///
/// `RUST_LOG` reaches `directives` through the configuration layers, so a
/// value in `config.toml` applies unless the environment overrides it.
fn init_tracing(directives: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let (filter, invalid) = match EnvFilter::try_new(directives) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new("info"), Some(e)),
    };

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();

    if let Some(e) = invalid {
        warn!(directives, error = %e, "Invalid log filter, falling back to info");
    }
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(config.database_idle_timeout))
            .max_lifetime(Duration::from_secs(config.database_max_lifetime))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
