//! Connection settings for the LoRaWAN manager integration.

use std::{fmt, time::Duration};

use crate::{client::ClientConfig, retry::RetryPolicy};

/// Path appended to the manager base URL.
pub const PROVISION_PATH: &str = "/webhooks/crm-careflow/provision";

/// Settings injected into the orchestrator at startup.
///
/// The integration is disabled when either the manager URL or the API key is
/// empty.
#[derive(Clone, Default)]
pub struct ProvisioningConfig {
    /// Manager base URL, e.g. `https://lorawan.example.com`.
    pub manager_url: String,
    /// Shared secret sent as `x-api-key`.
    pub api_key: String,
    /// HTTP client settings.
    pub client: ClientConfig,
    /// Attempt budget and backoff table.
    pub retry: RetryPolicy,
}

impl ProvisioningConfig {
    /// Creates a config with default client and retry settings.
    pub fn new(manager_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            manager_url: manager_url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the client settings.
    #[must_use]
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Whether both the manager URL and the API key are set.
    pub fn is_configured(&self) -> bool {
        !self.manager_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }

    /// Longest a single delivery lifecycle can take: every attempt hitting
    /// the client timeout plus the backoff in between.
    pub fn lifecycle_budget(&self) -> Duration {
        self.client.timeout.saturating_mul(self.retry.max_attempts.max(1))
            + self.retry.total_backoff()
    }

    /// Fully resolved provisioning endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}{PROVISION_PATH}", self.manager_url.trim().trim_end_matches('/'))
    }
}

impl fmt::Debug for ProvisioningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.api_key.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("ProvisioningConfig")
            .field("manager_url", &self.manager_url)
            .field("api_key", &api_key)
            .field("client", &self.client)
            .field("retry", &self.retry)
            .finish()
    }
}
