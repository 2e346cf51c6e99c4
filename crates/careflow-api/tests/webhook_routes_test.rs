//! Route-level tests for the provisioning webhook API.
//!
//! Storage is the in-memory mock and the LoRaWAN manager is a wiremock
//! server, so no database is needed.

use std::{sync::Arc, time::Duration};

use axum::{body::Body, http::Request, Router};
use careflow_api::{create_router, AppState};
use careflow_core::{
    DeliveryStatus, DeviceId, DeviceProvisioning, LogId, ProductId, ProductSummary,
    ProvisioningStatus, TaskAggregate, TaskId, TestClock,
};
use careflow_provisioning::{
    storage::mock::{MockProvisioningStorage, Operation},
    ProvisioningConfig, WebhookOrchestrator,
};
use http::StatusCode;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn task() -> TaskAggregate {
    TaskAggregate {
        id: TaskId::new(),
        client_name: "Northwind Orchards".to_string(),
        client_address: "7 Orchard Way".to_string(),
        contact_email: None,
        contact_phone: Some("+31 20 555 0100".to_string()),
        latitude: None,
        longitude: None,
        product: ProductSummary {
            id: ProductId::new(),
            name: "Orchard Frost Kit".to_string(),
            code: "OFK-1".to_string(),
            lorawan_region: Some("EU868".to_string()),
            uses_lorawan: true,
        },
        devices: vec![DeviceProvisioning {
            id: DeviceId::new(),
            device_serial: "FROST-01".to_string(),
            device_type: "Frost sensor".to_string(),
            firmware_version: "3.2.0".to_string(),
            hardware: None,
            dev_eui: Some("A84041000181C061".to_string()),
            app_key: None,
            notes: None,
            lorawan_provisioning_status: None,
            lorawan_provisioned_at: None,
            lorawan_provisioning_error: None,
        }],
    }
}

fn app(config: ProvisioningConfig, storage: &MockProvisioningStorage) -> Router {
    let clock = Arc::new(TestClock::new());
    let storage: Arc<MockProvisioningStorage> = Arc::new(storage.clone());
    let orchestrator = WebhookOrchestrator::new(config, storage.clone(), clock.clone()).unwrap();

    create_router(AppState::new(orchestrator, storage, clock))
}

async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };

    (status, body)
}

async fn manager(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/webhooks/crm-careflow/provision"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"accepted": status == 200})))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn send_returns_delivered_outcome() {
    let server = manager(200).await;
    let storage = MockProvisioningStorage::new();
    let task = task();
    storage.add_task(task.clone()).await;
    let app = app(ProvisioningConfig::new(server.uri(), "key"), &storage);

    let (status, body) =
        call(app, "POST", &format!("/tasks/{}/provisioning-webhook", task.id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "delivered");
    assert_eq!(body["attempts"], 1);
    assert_eq!(
        storage.devices(task.id).await[0].lorawan_provisioning_status,
        Some(ProvisioningStatus::Completed)
    );
}

#[tokio::test]
async fn send_reports_skip_when_not_configured() {
    let storage = MockProvisioningStorage::new();
    let task = task();
    storage.add_task(task.clone()).await;
    let app = app(ProvisioningConfig::default(), &storage);

    let (status, body) =
        call(app, "POST", &format!("/tasks/{}/provisioning-webhook", task.id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"outcome": "skipped", "reason": "not_configured"}));
}

#[tokio::test]
async fn logs_listed_for_task() {
    let server = manager(500).await;
    let storage = MockProvisioningStorage::new();
    let task = task();
    storage.add_task(task.clone()).await;
    let app = app(ProvisioningConfig::new(server.uri(), "key"), &storage);

    let (_, outcome) =
        call(app.clone(), "POST", &format!("/tasks/{}/provisioning-webhook", task.id)).await;
    assert_eq!(outcome["outcome"], "failed");

    let (status, logs) = call(app, "GET", &format!("/tasks/{}/webhook-logs", task.id)).await;

    assert_eq!(status, StatusCode::OK);
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["status"], "FAILED");
    assert_eq!(logs[0]["attempts"], 3);
    assert_eq!(logs[0]["webhook_type"], "LORAWAN_PROVISIONING");
    assert_eq!(logs[0]["payload"]["productCode"], "OFK-1");
}

#[tokio::test]
async fn retry_of_unknown_log_is_not_found() {
    let storage = MockProvisioningStorage::new();
    let app = app(ProvisioningConfig::new("http://127.0.0.1:9", "key"), &storage);

    let (status, body) = call(app, "POST", &format!("/webhook-logs/{}/retry", LogId::new())).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "E1001");
}

#[tokio::test]
async fn retry_of_delivered_log_conflicts() {
    let server = manager(200).await;
    let storage = MockProvisioningStorage::new();
    let task = task();
    storage.add_task(task.clone()).await;
    let app = app(ProvisioningConfig::new(server.uri(), "key"), &storage);

    let (_, outcome) =
        call(app.clone(), "POST", &format!("/tasks/{}/provisioning-webhook", task.id)).await;
    let log_id = outcome["log_id"].as_str().unwrap().to_string();

    let (status, body) = call(app, "POST", &format!("/webhook-logs/{log_id}/retry")).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "E1002");
}

#[tokio::test]
async fn retry_of_failed_log_redelivers() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;
    let storage = MockProvisioningStorage::new();
    let task = task();
    storage.add_task(task.clone()).await;
    let app = app(ProvisioningConfig::new(server.uri(), "key"), &storage);

    let (_, outcome) =
        call(app.clone(), "POST", &format!("/tasks/{}/provisioning-webhook", task.id)).await;
    assert_eq!(outcome["outcome"], "failed");
    let log_id = outcome["log_id"].as_str().unwrap().to_string();

    let (status, body) = call(app, "POST", &format!("/webhook-logs/{log_id}/retry")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delivered"], true);
    assert_eq!(body["attempts_made"], 1);
    assert_eq!(body["log"]["attempts"], 2);
    assert_eq!(body["log"]["status"], "SUCCESS");
}

#[tokio::test]
async fn dropped_request_does_not_cancel_delivery() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    let storage = MockProvisioningStorage::new();
    let task = task();
    storage.add_task(task.clone()).await;
    let app = app(ProvisioningConfig::new(server.uri(), "key"), &storage);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/tasks/{}/provisioning-webhook", task.id))
        .body(Body::empty())
        .unwrap();
    let abandoned = tokio::time::timeout(Duration::from_millis(450), app.oneshot(request)).await;
    assert!(abandoned.is_err());

    let mut status = None;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = storage.all_logs().await.first().map(|entry| (entry.status, entry.attempts));
        if status.is_some_and(|(status, _)| status == DeliveryStatus::Failed) {
            break;
        }
    }

    assert_eq!(status, Some((DeliveryStatus::Failed, 3)));
    for device in storage.devices(task.id).await {
        assert_eq!(device.lorawan_provisioning_status, Some(ProvisioningStatus::Failed));
    }
}

#[tokio::test]
async fn health_reports_storage_state() {
    let storage = MockProvisioningStorage::new();
    let (status, body) = call(app(ProvisioningConfig::default(), &storage), "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["provisioning_enabled"], false);

    storage.inject_failure(Operation::HealthCheck, "connection refused").await;
    let (status, body) = call(app(ProvisioningConfig::default(), &storage), "GET", "/ready").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["database"]["status"], "down");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let storage = MockProvisioningStorage::new();
    let request = Request::builder().uri("/live").body(Body::empty()).unwrap();

    let response = app(ProvisioningConfig::default(), &storage).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}
