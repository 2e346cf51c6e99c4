//! HTTP request handlers.
//!
//! - `health` - health, readiness and liveness probes
//! - `webhooks` - provisioning webhook send, log listing and manual retry

pub mod health;
pub mod webhooks;

pub use health::{health_check, liveness_check, readiness_check};
pub use webhooks::{list_webhook_logs, retry_webhook, send_provisioning_webhook};
