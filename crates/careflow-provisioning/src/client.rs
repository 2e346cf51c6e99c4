//! HTTP client for the LoRaWAN manager's provisioning endpoint.
//!
//! Transport failures are categorized here. Non-2xx responses are returned
//! as regular responses and categorized by the engine.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{ProvisioningError, Result};

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Per-request timeout; the only bound on a single attempt.
    pub timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("Careflow-Provisioning/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Response received from the manager.
#[derive(Debug, Clone)]
pub struct ManagerResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Body parsed as JSON, or `{"raw": text}` when it is not JSON.
    pub body: Value,
    /// Body as received.
    pub text: String,
    /// Time from send to body read.
    pub duration: Duration,
}

impl ManagerResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Reusable HTTP client with connection pooling.
#[derive(Debug, Clone)]
pub struct ProvisioningClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ProvisioningClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningError::ConfigurationError` if the underlying HTTP
    /// client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProvisioningError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// See [`ProvisioningClient::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Posts `payload` as JSON to `url`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the request exceeds the configured timeout and
    /// `NetworkError` for any other transport failure. HTTP error statuses
    /// are not errors at this layer.
    pub async fn send(
        &self,
        url: &str,
        api_key: &str,
        payload: &Value,
        attempt: u32,
    ) -> Result<ManagerResponse> {
        let span = info_span!("provisioning_webhook", url = %url, attempt);

        async move {
            let start = Instant::now();

            let response = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(API_KEY_HEADER, api_key)
                .json(payload)
                .send()
                .await
                .map_err(|e| {
                    warn!(duration_ms = start.elapsed().as_millis(), "request failed: {e}");
                    self.categorize(&e)
                })?;

            let status_code = response.status().as_u16();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) if e.is_timeout() => return Err(self.categorize(&e)),
                Err(e) => {
                    warn!("failed to read response body: {e}");
                    String::new()
                },
            };
            let duration = start.elapsed();

            debug!(
                status_code,
                duration_ms = duration.as_millis(),
                "received manager response"
            );

            Ok(ManagerResponse { status_code, body: parse_body(&text), text, duration })
        }
        .instrument(span)
        .await
    }

    fn categorize(&self, error: &reqwest::Error) -> ProvisioningError {
        if error.is_timeout() {
            ProvisioningError::timeout(self.config.timeout.as_secs())
        } else if error.is_connect() {
            ProvisioningError::network(format!("connection failed: {error}"))
        } else {
            ProvisioningError::network(error.to_string())
        }
    }
}

/// Parses a response body as JSON, wrapping anything else as `{"raw": text}`.
pub fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn json_body_parsed() {
        assert_eq!(parse_body(r#"{"accepted":true}"#), json!({"accepted": true}));
    }

    #[test]
    fn non_json_body_wrapped_as_raw() {
        assert_eq!(parse_body("Bad Gateway"), json!({"raw": "Bad Gateway"}));
        assert_eq!(parse_body(""), json!({"raw": ""}));
    }

    #[tokio::test]
    async fn sends_api_key_and_json_content_type() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhooks/crm-careflow/provision"))
            .and(matchers::header("x-api-key", "secret"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_json(json!({"eventType": "task.ready_for_provisioning"})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"queued": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProvisioningClient::with_defaults().unwrap();
        let response = client
            .send(
                &format!("{}/webhooks/crm-careflow/provision", server.uri()),
                "secret",
                &json!({"eventType": "task.ready_for_provisioning"}),
                1,
            )
            .await
            .unwrap();

        assert_eq!(response.status_code, 202);
        assert!(response.is_success());
        assert_eq!(response.body, json!({"queued": true}));
    }

    #[tokio::test]
    async fn error_status_returned_as_response() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;

        let client = ProvisioningClient::with_defaults().unwrap();
        let response = client.send(&server.uri(), "secret", &json!({}), 1).await.unwrap();

        assert_eq!(response.status_code, 500);
        assert!(!response.is_success());
        assert_eq!(response.text, "Internal Server Error");
        assert_eq!(response.body, json!({"raw": "Internal Server Error"}));
    }

    #[tokio::test]
    async fn slow_manager_times_out() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = ProvisioningClient::new(ClientConfig {
            timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        })
        .unwrap();

        let error = client.send(&server.uri(), "secret", &json!({}), 1).await.unwrap_err();
        assert!(matches!(error, ProvisioningError::Timeout { .. }));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_manager_is_network_error() {
        let client = ProvisioningClient::with_defaults().unwrap();

        let error = client.send("http://127.0.0.1:1/provision", "secret", &json!({}), 1).await.unwrap_err();
        assert!(matches!(error, ProvisioningError::NetworkError { .. }));
    }
}
