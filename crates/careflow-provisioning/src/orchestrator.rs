//! Public entry point for provisioning webhooks.
//!
//! Sequences the guard checks, payload builder, delivery log, device status
//! updater and delivery engine. `send_provisioning_webhook` never returns an
//! error: every failure is logged, reflected on the devices and reported
//! through [`SendOutcome`].

use std::sync::Arc;

use careflow_core::{
    Clock, DeliveryLogEntry, DeliveryStatus, LogCompletion, LogId, NewDeliveryLog,
    ProvisioningStatus, TaskId, WebhookType,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    config::ProvisioningConfig,
    devices::DeviceStatusUpdater,
    engine::{failure_message, DeliveryEngine, DeliveryReport, Lifecycle},
    error::{ProvisioningError, Result},
    payload::build_payload,
    storage::ProvisioningStorage,
};

/// Error stored on devices when delivery gives up.
pub const DELIVERY_FAILED_MESSAGE: &str = "Webhook delivery failed after retries";

/// Why a send did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Manager URL or API key missing.
    NotConfigured,
    /// The task's product does not use LoRaWAN.
    ProductNotEligible,
}

/// Outcome of `send_provisioning_webhook`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// The manager accepted the webhook.
    Delivered {
        /// Log entry of this send
        log_id: LogId,
        /// HTTP attempts made
        attempts: u32,
    },
    /// Nothing was written.
    Skipped {
        /// Guard that short-circuited the send
        reason: SkipReason,
    },
    /// The send failed; devices were marked `FAILED` where applicable.
    Failed {
        /// Log entry, when one was created before the failure
        log_id: Option<LogId>,
        /// Failure description
        error: String,
    },
}

impl SendOutcome {
    /// Whether the webhook was delivered.
    pub fn delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Coordinates provisioning webhook sends, manual retries and log queries.
#[derive(Clone)]
pub struct WebhookOrchestrator {
    config: ProvisioningConfig,
    storage: Arc<dyn ProvisioningStorage>,
    engine: DeliveryEngine,
    devices: DeviceStatusUpdater,
    clock: Arc<dyn Clock>,
}

impl WebhookOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningError::ConfigurationError` if the HTTP client
    /// cannot be built.
    pub fn new(
        config: ProvisioningConfig,
        storage: Arc<dyn ProvisioningStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let engine = DeliveryEngine::new(storage.clone(), &config, clock.clone())?;
        let devices = DeviceStatusUpdater::new(storage.clone(), clock.clone());

        Ok(Self { config, storage, engine, devices, clock })
    }

    /// Integration settings in use.
    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Notifies the manager that a task is ready for provisioning.
    pub async fn send_provisioning_webhook(&self, task_id: TaskId) -> SendOutcome {
        if !self.config.is_configured() {
            warn!(%task_id, "LoRaWAN manager not configured, provisioning webhook skipped");
            return SendOutcome::Skipped { reason: SkipReason::NotConfigured };
        }

        let mut log_id = None;
        match self.try_send(task_id, &mut log_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%task_id, log_id = ?log_id, error = %err, "provisioning webhook send failed");
                let message = err.to_string();
                if let Some(log_id) = log_id {
                    self.close_interrupted_log(log_id, &message).await;
                }
                if let Err(sync_err) = self
                    .devices
                    .update(task_id, ProvisioningStatus::Failed, Some(message.clone()))
                    .await
                {
                    error!(%task_id, error = %sync_err, "failed to mark devices as failed");
                }
                SendOutcome::Failed { log_id, error: message }
            },
        }
    }

    async fn try_send(&self, task_id: TaskId, log_id: &mut Option<LogId>) -> Result<SendOutcome> {
        let Some(task) = self.storage.find_task(task_id).await? else {
            let err = ProvisioningError::TaskNotFound { task_id };
            error!(%task_id, "task not found, provisioning webhook not sent");
            return Ok(SendOutcome::Failed { log_id: None, error: err.to_string() });
        };

        if !task.product.uses_lorawan {
            debug!(%task_id, product = %task.product.code, "product does not use LoRaWAN, skipped");
            return Ok(SendOutcome::Skipped { reason: SkipReason::ProductNotEligible });
        }

        let payload = serde_json::to_value(build_payload(&task))?;
        let entry = self
            .storage
            .create_log(
                NewDeliveryLog {
                    task_id,
                    webhook_type: WebhookType::LorawanProvisioning,
                    endpoint: self.config.endpoint(),
                    payload,
                },
                self.clock.now_utc(),
            )
            .await?;
        *log_id = Some(entry.id);

        self.devices.update(task_id, ProvisioningStatus::InProgress, None).await?;

        let report = self.engine.deliver(&entry, Lifecycle::Initial).await?;
        if report.succeeded() {
            self.devices.update(task_id, ProvisioningStatus::Completed, None).await?;
            info!(%task_id, log_id = %entry.id, attempts = report.attempts_made, "devices provisioned");
            return Ok(SendOutcome::Delivered { log_id: entry.id, attempts: report.attempts_made });
        }

        self.devices
            .update(task_id, ProvisioningStatus::Failed, Some(DELIVERY_FAILED_MESSAGE.to_string()))
            .await?;
        Ok(SendOutcome::Failed {
            log_id: Some(entry.id),
            error: report.error_message().unwrap_or(DELIVERY_FAILED_MESSAGE).to_string(),
        })
    }

    /// Every log entry of a task, newest first.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningError::Storage` if the query fails.
    pub async fn get_webhook_logs(&self, task_id: TaskId) -> Result<Vec<DeliveryLogEntry>> {
        Ok(self.storage.find_logs_by_task(task_id).await?)
    }

    /// Re-sends the stored payload of a `FAILED` entry.
    ///
    /// The attempt budget starts over while the entry's `attempts` counter
    /// keeps accumulating. Devices are synced to the new outcome.
    ///
    /// # Errors
    ///
    /// Returns `LogNotFound` for an unknown id, `NotRetryable` for an entry
    /// that is not `FAILED` (or was claimed by a concurrent retry),
    /// `NotConfigured` when the integration is off and `Storage` if a log
    /// write fails. An entry interrupted by a storage error is left `FAILED`.
    pub async fn retry_webhook(&self, log_id: LogId) -> Result<DeliveryReport> {
        let entry = self
            .storage
            .find_log(log_id)
            .await?
            .ok_or(ProvisioningError::LogNotFound { log_id })?;

        if entry.status != DeliveryStatus::Failed {
            return Err(ProvisioningError::NotRetryable { log_id, status: entry.status });
        }

        if !self.config.is_configured() {
            return Err(ProvisioningError::NotConfigured);
        }

        let Some(entry) = self.storage.claim_retry(log_id).await? else {
            let status = self.storage.find_log(log_id).await?.map_or(entry.status, |e| e.status);
            return Err(ProvisioningError::NotRetryable { log_id, status });
        };

        info!(task_id = %entry.task_id, %log_id, attempts = entry.attempts, "retrying provisioning webhook");
        let report = match self.engine.deliver(&entry, Lifecycle::ManualRetry).await {
            Ok(report) => report,
            Err(err) => {
                error!(task_id = %entry.task_id, %log_id, error = %err, "manual retry interrupted");
                let message = err.to_string();
                self.close_interrupted_log(log_id, &message).await;
                if let Err(sync_err) =
                    self.devices.update(entry.task_id, ProvisioningStatus::Failed, Some(message)).await
                {
                    error!(task_id = %entry.task_id, error = %sync_err, "failed to mark devices as failed");
                }
                return Err(err);
            },
        };

        let sync = if report.succeeded() {
            self.devices.update(entry.task_id, ProvisioningStatus::Completed, None).await
        } else {
            let message = report.error_message().unwrap_or(DELIVERY_FAILED_MESSAGE).to_string();
            self.devices.update(entry.task_id, ProvisioningStatus::Failed, Some(message)).await
        };
        if let Err(err) = sync {
            error!(task_id = %entry.task_id, %log_id, error = %err, "device sync after retry failed");
        }

        Ok(report)
    }

    /// Fails an entry a storage error left `PENDING` or `RETRYING`, so a
    /// manual retry can pick it up. Best effort: errors are only logged.
    async fn close_interrupted_log(&self, log_id: LogId, message: &str) {
        let in_flight = match self.storage.find_log(log_id).await {
            Ok(entry) => entry.is_some_and(|entry| !entry.status.is_terminal()),
            Err(err) => {
                error!(%log_id, error = %err, "failed to read interrupted webhook log");
                return;
            },
        };
        if !in_flight {
            return;
        }

        let completion = LogCompletion::failed(None, None, failure_message(message));
        match self.storage.complete_log(log_id, completion).await {
            Ok(_) => warn!(%log_id, "interrupted webhook log marked FAILED"),
            Err(err) => error!(%log_id, error = %err, "failed to close interrupted webhook log"),
        }
    }
}
