//! Retry-delivery engine.
//!
//! Sends one stored payload to its stored endpoint with a bounded number of
//! attempts, recording every attempt and the final outcome on the log entry.
//! Attempts are sequential; the only suspension points are the HTTP call and
//! the backoff sleep.

use std::sync::Arc;

use careflow_core::{Clock, DeliveryLogEntry, DeliveryStatus, LogCompletion};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    client::ProvisioningClient,
    config::ProvisioningConfig,
    error::{ProvisioningError, Result},
    retry::{RetryDecision, RetryPolicy},
    storage::ProvisioningStorage,
};

/// Maximum length of an error message stored on a failed entry.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Stored when an error carries no description.
pub const GENERIC_FAILURE_MESSAGE: &str = "Webhook delivery failed";

/// Which lifecycle a delivery run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// First send of a freshly created log entry; attempt 1 is `PENDING`.
    Initial,
    /// Manual retry of a `FAILED` entry; every attempt is `RETRYING`.
    ManualRetry,
}

impl Lifecycle {
    fn attempt_status(self, attempt_index: u32) -> DeliveryStatus {
        match (self, attempt_index) {
            (Self::Initial, 0) => DeliveryStatus::Pending,
            _ => DeliveryStatus::Retrying,
        }
    }
}

/// Result of one delivery run.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Log entry as left by the final write.
    pub entry: DeliveryLogEntry,
    /// HTTP attempts made in this run.
    pub attempts_made: u32,
}

impl DeliveryReport {
    /// Whether the manager accepted the webhook.
    pub fn succeeded(&self) -> bool {
        self.entry.status == DeliveryStatus::Success
    }

    /// Failure description stored on the entry, if the run failed.
    pub fn error_message(&self) -> Option<&str> {
        (!self.succeeded()).then_some(self.entry.error_message.as_deref()).flatten()
    }
}

/// Delivers stored payloads with retries.
#[derive(Clone)]
pub struct DeliveryEngine {
    storage: Arc<dyn ProvisioningStorage>,
    client: ProvisioningClient,
    policy: RetryPolicy,
    api_key: String,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngine {
    /// Creates an engine from the integration settings.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningError::ConfigurationError` if the HTTP client
    /// cannot be built.
    pub fn new(
        storage: Arc<dyn ProvisioningStorage>,
        config: &ProvisioningConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut policy = config.retry.clone();
        policy.max_attempts = policy.max_attempts.max(1);

        Ok(Self {
            storage,
            client: ProvisioningClient::new(config.client.clone())?,
            policy,
            api_key: config.api_key.clone(),
            clock,
        })
    }

    /// Runs one delivery lifecycle for `entry`.
    ///
    /// Delivery failures are recorded on the entry and reported through the
    /// returned [`DeliveryReport`]; they are not errors.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningError::Storage` if a log write fails.
    pub async fn deliver(
        &self,
        entry: &DeliveryLogEntry,
        lifecycle: Lifecycle,
    ) -> Result<DeliveryReport> {
        let log_id = entry.id;
        let task_id = entry.task_id;
        let mut attempt_index = 0;

        loop {
            let status = lifecycle.attempt_status(attempt_index);
            self.storage.record_attempt(log_id, status, self.clock.now_utc()).await?;
            let attempts_made = attempt_index + 1;

            let (error, response) = match self
                .client
                .send(&entry.endpoint, &self.api_key, entry.payload(), attempts_made)
                .await
            {
                Ok(response) if response.is_success() => {
                    info!(
                        %task_id,
                        %log_id,
                        attempt = attempts_made,
                        status_code = response.status_code,
                        duration_ms = response.duration.as_millis(),
                        "provisioning webhook delivered"
                    );
                    let completion = LogCompletion::succeeded(response.status_code, response.body);
                    let entry = self.storage.complete_log(log_id, completion).await?;
                    return Ok(DeliveryReport { entry, attempts_made });
                },
                Ok(response) => (
                    ProvisioningError::from_status(response.status_code, response.text),
                    Some(response.body),
                ),
                Err(error) => (error, None),
            };

            match self.policy.decide(attempt_index, &error) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        %task_id,
                        %log_id,
                        attempt = attempts_made,
                        status_code = error.status_code(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "provisioning webhook attempt failed, retrying"
                    );
                    self.clock.sleep(delay).await;
                    attempt_index += 1;
                },
                RetryDecision::GiveUp { reason } => {
                    error!(
                        %task_id,
                        %log_id,
                        attempt = attempts_made,
                        status_code = error.status_code(),
                        reason = %reason,
                        error = %error,
                        "provisioning webhook delivery failed"
                    );
                    let completion = failure_completion(&error, response);
                    let entry = self.storage.complete_log(log_id, completion).await?;
                    return Ok(DeliveryReport { entry, attempts_made });
                },
            }
        }
    }
}

fn failure_completion(error: &ProvisioningError, response: Option<Value>) -> LogCompletion {
    LogCompletion::failed(error.status_code(), response, failure_message(&error.to_string()))
}

/// Message stored for a failed lifecycle: truncated, generic when blank.
pub fn failure_message(message: &str) -> String {
    if message.trim().is_empty() {
        GENERIC_FAILURE_MESSAGE.to_string()
    } else {
        truncate_chars(message, MAX_ERROR_MESSAGE_CHARS)
    }
}

/// Cuts `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
