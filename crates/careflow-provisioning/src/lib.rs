//! LoRaWAN provisioning webhook delivery.
//!
//! When an onboarding task becomes ready for provisioning, the
//! [`WebhookOrchestrator`] notifies the external LoRaWAN manager and tracks
//! the outcome back onto the task's device provisioning records.
//!
//! # Flow
//!
//! 1. **Guards** - integration configured, task exists, product uses LoRaWAN
//! 2. **Payload** - task aggregate mapped to the wire payload
//! 3. **Log** - delivery log entry created in `PENDING`
//! 4. **Devices** - every device marked `IN_PROGRESS`
//! 5. **Delivery** - bounded retries with fixed backoff, each attempt logged
//! 6. **Devices** - `COMPLETED` or `FAILED` depending on the outcome
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use careflow_core::{storage::Storage, RealClock, TaskId};
//! use careflow_provisioning::{
//!     PostgresProvisioningStorage, ProvisioningConfig, ProvisioningError, WebhookOrchestrator,
//! };
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool, task_id: TaskId) -> Result<(), ProvisioningError> {
//! let storage = Arc::new(PostgresProvisioningStorage::new(Arc::new(Storage::new(pool))));
//! let config = ProvisioningConfig::new("https://lorawan.example.com", "api-key");
//! let orchestrator = WebhookOrchestrator::new(config, storage, Arc::new(RealClock::new()))?;
//!
//! if orchestrator.send_provisioning_webhook(task_id).await.delivered() {
//!     println!("devices provisioned");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod devices;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod payload;
pub mod retry;
pub mod storage;

pub use client::{ClientConfig, ProvisioningClient};
pub use config::ProvisioningConfig;
pub use devices::{DeviceStatusUpdater, DeviceSync};
pub use engine::{DeliveryEngine, DeliveryReport, Lifecycle};
pub use error::{ProvisioningError, Result};
pub use orchestrator::{SendOutcome, SkipReason, WebhookOrchestrator, DELIVERY_FAILED_MESSAGE};
pub use payload::{build_payload, ProvisioningPayload};
pub use retry::RetryPolicy;
pub use storage::{PostgresProvisioningStorage, ProvisioningStorage};
