//! Error types for provisioning webhook operations.
//!
//! Covers transport and HTTP failures (categorized for retry decisions),
//! storage failures, and the usage errors manual retry reports to callers.

use careflow_core::{CoreError, DeliveryStatus, LogId, TaskId};
use thiserror::Error;

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisioningError>;

/// Error types for provisioning webhook operations.
#[derive(Debug, Clone, Error)]
pub enum ProvisioningError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Manager rejected the request (4xx other than 429).
    #[error("client error: HTTP {status_code}: {body}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body text
        body: String,
    },

    /// Manager failed to process the request (5xx or any other non-2xx,
    /// non-4xx status).
    #[error("server error: HTTP {status_code}: {body}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Response body text
        body: String,
    },

    /// Manager is rate limiting (429).
    #[error("rate limited: HTTP 429: {body}")]
    RateLimited {
        /// Response body text
        body: String,
    },

    /// Storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message
        message: String,
    },

    /// Task does not exist.
    #[error("task {task_id} not found")]
    TaskNotFound {
        /// Missing task
        task_id: TaskId,
    },

    /// Webhook log entry does not exist.
    #[error("webhook log {log_id} not found")]
    LogNotFound {
        /// Missing log entry
        log_id: LogId,
    },

    /// Only failed log entries can be retried.
    #[error("webhook log {log_id} is {status}; only FAILED entries can be retried")]
    NotRetryable {
        /// Log entry that was asked to retry
        log_id: LogId,
        /// Its current status
        status: DeliveryStatus,
    },

    /// Manager URL or API key is missing.
    #[error("LoRaWAN manager integration is not configured")]
    NotConfigured,

    /// Invalid client or endpoint configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Background delivery task panicked or was aborted.
    #[error("delivery task failed: {message}")]
    TaskFailed {
        /// Join error description
        message: String,
    },

    /// Payload could not be serialized.
    #[error("payload serialization failed: {message}")]
    Serialization {
        /// Serializer error message
        message: String,
    },
}

impl ProvisioningError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Categorizes a non-2xx HTTP response.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status_code {
            429 => Self::RateLimited { body },
            400..=499 => Self::ClientError { status_code, body },
            _ => Self::ServerError { status_code, body },
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Network errors, timeouts, server errors and 429 are retryable.
    /// Client errors and usage or configuration errors are not.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. }
                | Self::Timeout { .. }
                | Self::ServerError { .. }
                | Self::RateLimited { .. }
        )
    }

    /// HTTP status code carried by the error, if it came from a response.
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. } | Self::ServerError { status_code, .. } => {
                Some(*status_code)
            },
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Stable error code used in API responses.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::LogNotFound { .. } => "E1001",
            Self::NotRetryable { .. } => "E1002",
            Self::TaskNotFound { .. } => "E1003",
            Self::NotConfigured => "E1004",
            Self::NetworkError { .. } => "E2001",
            Self::Timeout { .. } => "E2002",
            Self::ClientError { .. } => "E2003",
            Self::ServerError { .. } => "E2004",
            Self::RateLimited { .. } => "E2005",
            Self::Storage { .. } => "E3001",
            Self::ConfigurationError { .. } => "E3002",
            Self::Serialization { .. } => "E3003",
            Self::TaskFailed { .. } => "E3004",
        }
    }
}

impl From<CoreError> for ProvisioningError {
    fn from(error: CoreError) -> Self {
        Self::storage(error.to_string())
    }
}

impl From<serde_json::Error> for ProvisioningError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { message: error.to_string() }
    }
}
