//! Careflow provisioning webhook service.
//!
//! Loads configuration, connects to PostgreSQL, ensures the delivery log
//! table exists and serves the webhook API until shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use careflow_api::{AppState, Config};
use careflow_core::{storage::Storage, RealClock};
use careflow_provisioning::{PostgresProvisioningStorage, WebhookOrchestrator};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

const MAX_CONNECT_RETRIES: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!("Starting Careflow provisioning webhook service");
    info!(
        database_url = %config.database_url_masked(),
        max_connections = config.database_max_connections,
        manager_url = %config.lorawan_manager_url,
        "Configuration loaded"
    );

    let provisioning = config.to_provisioning_config();
    if !provisioning.is_configured() {
        warn!("LoRaWAN manager not configured, provisioning webhooks are disabled");
    }

    let pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    ensure_schema(&pool).await?;
    info!("Database schema ready");

    let clock = Arc::new(RealClock::new());
    let storage = Arc::new(PostgresProvisioningStorage::new(Arc::new(Storage::new(pool.clone()))));
    let orchestrator = WebhookOrchestrator::new(provisioning, storage.clone(), clock.clone())
        .context("Failed to build webhook orchestrator")?;

    let addr = config.parse_server_addr()?;
    careflow_api::start_server(AppState::new(orchestrator, storage, clock), addr)
        .await
        .context("HTTP server failed")?;

    pool.close().await;
    info!("Careflow shutdown complete");
    Ok(())
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured filter. `LOG_FORMAT=json` switches
/// to JSON lines.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_file(true).with_line_number(true))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_file(true).with_line_number(true))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    }

    Ok(())
}

async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < MAX_CONNECT_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_CONNECT_RETRIES,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Creates the delivery log table when missing.
///
/// Task and device tables belong to the CRM and are expected to exist.
async fn ensure_schema(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhook_logs (
            id UUID PRIMARY KEY,
            task_id UUID NOT NULL,
            webhook_type TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TIMESTAMPTZ,
            status_code INTEGER,
            response JSONB,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create webhook_logs table")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_task
        ON webhook_logs(task_id, created_at DESC)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create webhook_logs task index")?;

    Ok(())
}
