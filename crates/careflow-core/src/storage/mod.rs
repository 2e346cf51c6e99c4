//! PostgreSQL repositories for provisioning data.
//!
//! The delivery log is owned by this service. Task, product and device tables
//! belong to the CRM; the repositories here read them and touch only the
//! LoRaWAN provisioning columns on device records.

use std::sync::Arc;

use sqlx::PgPool;

pub mod device_provisioning;
pub mod tasks;
pub mod webhook_logs;

use crate::error::Result;

/// Container for all repository instances sharing one pool.
#[derive(Clone)]
pub struct Storage {
    /// Repository for the webhook delivery log.
    pub webhook_logs: Arc<webhook_logs::Repository>,

    /// Read-only repository for task aggregates.
    pub tasks: Arc<tasks::Repository>,

    /// Repository for device provisioning status writes.
    pub devices: Arc<device_provisioning::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            webhook_logs: Arc::new(webhook_logs::Repository::new(pool.clone())),
            tasks: Arc::new(tasks::Repository::new(pool.clone())),
            devices: Arc::new(device_provisioning::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.webhook_logs.pool()).await?;

        Ok(())
    }
}
