//! Health, readiness and liveness probes.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use careflow_core::Clock;
use careflow_provisioning::ProvisioningStorage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::server::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health
    pub status: HealthStatus,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Per-component results
    pub checks: HealthChecks,
    /// Whether provisioning webhooks are enabled
    pub provisioning_enabled: bool,
    /// Service version
    pub version: String,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All components up
    Healthy,
    /// A critical component is down
    Unhealthy,
}

/// Per-component health results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity
    pub database: ComponentHealth,
}

/// Health of one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub response_time_ms: u64,
}

/// Component-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Reachable
    Up,
    /// Unreachable
    Down,
}

/// Runs health checks against injected storage and clock.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Checks every component.
    pub async fn health_check(
        &self,
        storage: &dyn ProvisioningStorage,
        provisioning_enabled: bool,
    ) -> HealthResponse {
        let timestamp = self.clock.now_utc();
        let start = self.clock.now();

        let (status, message) = match storage.health_check().await {
            Ok(()) => (ComponentStatus::Up, None),
            Err(e) => {
                error!("Database health check failed: {}", e);
                (ComponentStatus::Down, Some(format!("Database connection failed: {e}")))
            },
        };
        let elapsed = self.clock.now().saturating_duration_since(start);

        HealthResponse {
            status: match status {
                ComponentStatus::Up => HealthStatus::Healthy,
                ComponentStatus::Down => HealthStatus::Unhealthy,
            },
            timestamp,
            checks: HealthChecks {
                database: ComponentHealth {
                    status,
                    message,
                    response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                },
            },
            provisioning_enabled,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health endpoint; 503 when the database is unreachable.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let response = HealthService::new(state.clock.clone())
        .health_check(state.storage.as_ref(), state.orchestrator.config().is_configured())
        .await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, "Health check completed");
    (status_code, Json(response)).into_response()
}

/// Readiness probe; same checks as `/health`.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    health_check(State(state)).await
}

/// Liveness probe; no dependency checks.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "careflow-api"
    });

    (StatusCode::OK, Json(response)).into_response()
}
