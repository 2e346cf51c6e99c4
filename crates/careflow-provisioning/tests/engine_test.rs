//! Retry-delivery engine against a simulated LoRaWAN manager.
//!
//! The manager is a wiremock server; storage is the in-memory mock and the
//! clock records backoff sleeps without waiting.

mod common;

use std::{sync::Arc, time::Duration};

use careflow_core::{
    Clock, DeliveryLogEntry, DeliveryStatus, NewDeliveryLog, TaskId, TestClock, WebhookType,
};
use careflow_provisioning::{
    storage::mock::MockProvisioningStorage, DeliveryEngine, Lifecycle, ProvisioningConfig,
    ProvisioningStorage,
};
use serde_json::json;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct Fixture {
    storage: MockProvisioningStorage,
    clock: TestClock,
    engine: DeliveryEngine,
    entry: DeliveryLogEntry,
}

async fn fixture(config: ProvisioningConfig) -> Fixture {
    let storage = MockProvisioningStorage::new();
    let clock = TestClock::new();
    let engine =
        DeliveryEngine::new(Arc::new(storage.clone()), &config, Arc::new(clock.clone())).unwrap();

    let entry = storage
        .create_log(
            NewDeliveryLog {
                task_id: TaskId::new(),
                webhook_type: WebhookType::LorawanProvisioning,
                endpoint: config.endpoint(),
                payload: json!({"eventType": "task.ready_for_provisioning"}),
            },
            clock.now_utc(),
        )
        .await
        .unwrap();

    Fixture { storage, clock, engine, entry }
}

async fn respond(server: &MockServer, template: ResponseTemplate, times: u64) {
    Mock::given(matchers::method("POST"))
        .and(matchers::path(common::PROVISION_PATH))
        .respond_with(template)
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn always_failing_manager_exhausts_three_attempts() {
    let server = MockServer::start().await;
    respond(&server, ResponseTemplate::new(500).set_body_string("Internal Server Error"), 3).await;
    let fx = fixture(common::config(&server)).await;

    let report = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.attempts_made, 3);
    assert_eq!(report.entry.status, DeliveryStatus::Failed);
    assert_eq!(report.entry.attempts, 3);
    assert_eq!(report.entry.status_code, Some(500));
    assert_eq!(report.entry.response(), Some(&json!({"raw": "Internal Server Error"})));
    assert!(report.entry.error_message.as_deref().is_some_and(|m| m.contains("500")));
    assert_eq!(fx.clock.recorded_sleeps(), vec![Duration::from_secs(1), Duration::from_secs(5)]);
}

#[tokio::test]
async fn success_on_second_attempt_stops_retrying() {
    let server = MockServer::start().await;
    respond(&server, ResponseTemplate::new(503), 1).await;
    respond(&server, ResponseTemplate::new(200).set_body_json(json!({"provisioned": 2})), 1).await;
    let fx = fixture(common::config(&server)).await;

    let report = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.entry.attempts, 2);
    assert_eq!(report.entry.status_code, Some(200));
    assert_eq!(report.entry.response(), Some(&json!({"provisioned": 2})));
    assert_eq!(report.entry.error_message, None);
    assert_eq!(fx.clock.recorded_sleeps(), vec![Duration::from_secs(1)]);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    respond(&server, ResponseTemplate::new(404).set_body_string("Not Found"), 1).await;
    let fx = fixture(common::config(&server)).await;

    let report = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();

    assert_eq!(report.entry.status, DeliveryStatus::Failed);
    assert_eq!(report.entry.attempts, 1);
    assert_eq!(report.entry.status_code, Some(404));
    assert_eq!(report.entry.response(), Some(&json!({"raw": "Not Found"})));
    assert!(fx.clock.recorded_sleeps().is_empty());
}

#[tokio::test]
async fn oversized_client_error_message_is_truncated() {
    let server = MockServer::start().await;
    respond(&server, ResponseTemplate::new(422).set_body_string("x".repeat(2_000)), 1).await;
    let fx = fixture(common::config(&server)).await;

    let report = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();

    let message = report.entry.error_message.unwrap();
    assert!(message.chars().count() <= 500);
}

#[tokio::test]
async fn rate_limiting_is_retried_until_exhausted() {
    let server = MockServer::start().await;
    respond(&server, ResponseTemplate::new(429).set_body_json(json!({"error": "slow down"})), 3)
        .await;
    let fx = fixture(common::config(&server)).await;

    let report = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();

    assert_eq!(report.entry.status, DeliveryStatus::Failed);
    assert_eq!(report.entry.attempts, 3);
    assert_eq!(report.entry.status_code, Some(429));
}

#[tokio::test]
async fn unreachable_manager_records_transport_failure() {
    let fx = fixture(ProvisioningConfig::new("http://127.0.0.1:1", common::API_KEY)).await;

    let report = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();

    assert_eq!(report.entry.status, DeliveryStatus::Failed);
    assert_eq!(report.entry.attempts, 3);
    assert_eq!(report.entry.status_code, None);
    assert!(report.entry.error_message.is_some());
    assert_eq!(fx.clock.recorded_sleeps().len(), 2);
}

#[tokio::test]
async fn every_attempt_carries_api_key_and_stored_payload() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path(common::PROVISION_PATH))
        .and(matchers::header("x-api-key", common::API_KEY))
        .and(matchers::body_json(json!({"eventType": "task.ready_for_provisioning"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    let fx = fixture(common::config(&server)).await;

    let report = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();

    assert!(report.succeeded());
    assert!(report.entry.last_attempt_at.is_some());
}

#[tokio::test]
async fn manual_retry_keeps_accumulating_attempts() {
    let server = MockServer::start().await;
    respond(&server, ResponseTemplate::new(500), 3).await;
    let fx = fixture(common::config(&server)).await;

    let failed = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();
    assert_eq!(failed.entry.attempts, 3);

    server.reset().await;
    respond(&server, ResponseTemplate::new(200).set_body_string("ok"), 1).await;

    let retried = fx.engine.deliver(&failed.entry, Lifecycle::ManualRetry).await.unwrap();

    assert!(retried.succeeded());
    assert_eq!(retried.attempts_made, 1);
    assert_eq!(retried.entry.attempts, 4);
    assert_eq!(retried.entry.response(), Some(&json!({"raw": "ok"})));

    let stored = fx.storage.find_log(fx.entry.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Success);
}

#[tokio::test]
async fn attempts_beyond_the_delay_table_reuse_the_last_delay() {
    let server = MockServer::start().await;
    respond(&server, ResponseTemplate::new(502), 5).await;
    let config = common::config(&server).with_retry(careflow_provisioning::RetryPolicy::new(
        5,
        vec![Duration::from_secs(1), Duration::from_secs(5)],
    ));
    let fx = fixture(config).await;

    let report = fx.engine.deliver(&fx.entry, Lifecycle::Initial).await.unwrap();

    assert_eq!(report.entry.attempts, 5);
    assert_eq!(fx.clock.recorded_sleeps(), vec![
        Duration::from_secs(1),
        Duration::from_secs(5),
        Duration::from_secs(5),
        Duration::from_secs(5),
    ]);
}
