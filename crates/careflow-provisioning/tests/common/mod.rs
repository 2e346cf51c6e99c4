//! Fixtures shared by the provisioning integration tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use careflow_core::{
    DeviceId, DeviceProvisioning, ProductId, ProductSummary, TaskAggregate, TaskId, TestClock,
};
use careflow_provisioning::{
    storage::mock::MockProvisioningStorage, ClientConfig, ProvisioningConfig,
    WebhookOrchestrator,
};
use wiremock::MockServer;

pub const API_KEY: &str = "test-api-key";
pub const PROVISION_PATH: &str = "/webhooks/crm-careflow/provision";

pub fn device(serial: &str, device_type: &str) -> DeviceProvisioning {
    DeviceProvisioning {
        id: DeviceId::new(),
        device_serial: serial.to_string(),
        device_type: device_type.to_string(),
        firmware_version: "2.0.1".to_string(),
        hardware: None,
        dev_eui: Some(format!("70B3D57ED00{serial}")),
        app_key: None,
        notes: None,
        lorawan_provisioning_status: None,
        lorawan_provisioned_at: None,
        lorawan_provisioning_error: None,
    }
}

pub fn task(uses_lorawan: bool) -> TaskAggregate {
    TaskAggregate {
        id: TaskId::new(),
        client_name: "Greenfield Dairy".to_string(),
        client_address: "12 Meadow Lane".to_string(),
        contact_email: Some("ops@greenfield.example".to_string()),
        contact_phone: None,
        latitude: Some(52.37),
        longitude: Some(4.89),
        product: ProductSummary {
            id: ProductId::new(),
            name: "Barn Climate Kit".to_string(),
            code: "BCK-2".to_string(),
            lorawan_region: None,
            uses_lorawan,
        },
        devices: vec![device("001", "Temperature sensor"), device("002", "LoRa Gateway")],
    }
}

pub fn config(server: &MockServer) -> ProvisioningConfig {
    ProvisioningConfig::new(server.uri(), API_KEY).with_client(ClientConfig {
        timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    })
}

pub struct Harness {
    pub storage: MockProvisioningStorage,
    pub clock: TestClock,
    pub orchestrator: WebhookOrchestrator,
}

pub fn harness(config: ProvisioningConfig) -> Harness {
    let storage = MockProvisioningStorage::new();
    let clock = TestClock::new();
    let orchestrator =
        WebhookOrchestrator::new(config, Arc::new(storage.clone()), Arc::new(clock.clone()))
            .expect("orchestrator builds");

    Harness { storage, clock, orchestrator }
}
