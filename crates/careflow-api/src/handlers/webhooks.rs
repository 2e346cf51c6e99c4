//! Provisioning webhook endpoints.
//!
//! Sends and manual retries run on a spawned task that the handler awaits.
//! A dropped request (client gone, timeout layer) stops waiting but never
//! cancels a delivery halfway through its attempts.
//!
//! Error responses use the shared `{"error": {"code", "message"}}` shape.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use careflow_core::{DeliveryLogEntry, LogId, TaskId};
use careflow_provisioning::ProvisioningError;
use serde::Serialize;
use tracing::{error, info, instrument, warn, Instrument};

use crate::server::AppState;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable error code (E1001-E3004)
    pub code: String,
    /// Human-readable description
    pub message: String,
}

/// Result of a manual retry.
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    /// Whether the manager accepted the webhook
    pub delivered: bool,
    /// Attempts made by this retry
    pub attempts_made: u32,
    /// Log entry after the retry
    pub log: DeliveryLogEntry,
}

/// Sends the provisioning webhook for a task.
///
/// Answers 200 with the [`careflow_provisioning::SendOutcome`]; delivery
/// failures are part of the outcome rather than HTTP errors. Only a crashed
/// delivery task yields 500.
#[instrument(name = "send_provisioning_webhook", skip(state))]
pub async fn send_provisioning_webhook(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Response {
    let orchestrator = state.orchestrator.clone();
    let delivery = tokio::spawn(
        async move { orchestrator.send_provisioning_webhook(task_id).await }.in_current_span(),
    );

    match delivery.await {
        Ok(outcome) => {
            info!(delivered = outcome.delivered(), "provisioning webhook request handled");
            (StatusCode::OK, Json(outcome)).into_response()
        },
        Err(join_error) => {
            error!(error = %join_error, "provisioning webhook task failed");
            error_response(&ProvisioningError::TaskFailed { message: join_error.to_string() })
        },
    }
}

/// Lists a task's delivery log, newest first.
#[instrument(name = "list_webhook_logs", skip(state))]
pub async fn list_webhook_logs(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Response {
    match state.orchestrator.get_webhook_logs(task_id).await {
        Ok(logs) => (StatusCode::OK, Json(logs)).into_response(),
        Err(error) => error_response(&error),
    }
}

/// Manually retries a failed delivery.
///
/// # Errors
///
/// - 404: unknown log entry
/// - 409: entry is not `FAILED`
/// - 503: integration not configured
/// - 500: storage failure or crashed delivery task
#[instrument(name = "retry_webhook", skip(state))]
pub async fn retry_webhook(State(state): State<AppState>, Path(log_id): Path<LogId>) -> Response {
    let orchestrator = state.orchestrator.clone();
    let retry =
        tokio::spawn(async move { orchestrator.retry_webhook(log_id).await }.in_current_span());
    let result = retry.await.unwrap_or_else(|join_error| {
        Err(ProvisioningError::TaskFailed { message: join_error.to_string() })
    });

    match result {
        Ok(report) => {
            let response = RetryResponse {
                delivered: report.succeeded(),
                attempts_made: report.attempts_made,
                log: report.entry,
            };
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(error) => {
            warn!(error = %error, "manual retry rejected");
            error_response(&error)
        },
    }
}

/// HTTP status for an orchestrator error.
pub fn status_for(error: &ProvisioningError) -> StatusCode {
    match error {
        ProvisioningError::LogNotFound { .. } | ProvisioningError::TaskNotFound { .. } => {
            StatusCode::NOT_FOUND
        },
        ProvisioningError::NotRetryable { .. } => StatusCode::CONFLICT,
        ProvisioningError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &ProvisioningError) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail { code: error.code().to_string(), message: error.to_string() },
    };

    (status_for(error), Json(body)).into_response()
}
