//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response tracing
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! On SIGTERM or CTRL+C the server stops accepting connections and lets
//! in-flight requests finish.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use careflow_core::Clock;
use careflow_provisioning::{ProvisioningConfig, ProvisioningStorage, WebhookOrchestrator};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::handlers;

/// Slack added on top of the delivery lifecycle budget.
pub const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Upper bound for one API request: the longest delivery lifecycle the
/// configuration allows plus [`REQUEST_TIMEOUT_MARGIN`].
pub fn request_timeout(config: &ProvisioningConfig) -> Duration {
    config.lifecycle_budget() + REQUEST_TIMEOUT_MARGIN
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Provisioning webhook entry point.
    pub orchestrator: Arc<WebhookOrchestrator>,
    /// Storage used for health checks.
    pub storage: Arc<dyn ProvisioningStorage>,
    /// Clock for response timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Bundles handler dependencies.
    pub fn new(
        orchestrator: WebhookOrchestrator,
        storage: Arc<dyn ProvisioningStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { orchestrator: Arc::new(orchestrator), storage, clock }
    }
}

/// Creates the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let timeout = request_timeout(state.orchestrator.config());
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let webhook_routes = Router::new()
        .route("/tasks/{task_id}/provisioning-webhook", post(handlers::send_provisioning_webhook))
        .route("/tasks/{task_id}/webhook-logs", get(handlers::list_webhook_logs))
        .route("/webhook-logs/{log_id}/retry", post(handlers::retry_webhook));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Adds an `X-Request-Id` header to every response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Serves the API until a shutdown signal arrives.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or serving fails.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight deliveries to complete");
}
