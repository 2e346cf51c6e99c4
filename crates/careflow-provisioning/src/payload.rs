//! Wire payload sent to the LoRaWAN manager.
//!
//! `build_payload` is pure: the same task aggregate always yields the same
//! payload. Absent optional inputs stay absent on the wire.

use careflow_core::{
    models::HardwareId, DeviceId, DeviceProvisioning, TaskAggregate, TaskId,
};
use serde::{Deserialize, Serialize};

/// Event name carried by every provisioning webhook.
pub const EVENT_TYPE: &str = "task.ready_for_provisioning";

/// Frequency plan used when the product declares none.
pub const DEFAULT_REGION: &str = "EU868";

/// Provisioning request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningPayload {
    /// Always [`EVENT_TYPE`]
    pub event_type: String,
    /// Task being provisioned
    pub task_id: TaskId,
    /// Client name
    pub client_name: String,
    /// Installation address
    pub client_address: String,
    /// Product display name
    pub product_name: String,
    /// Product catalog code
    pub product_code: String,
    /// Frequency plan, [`DEFAULT_REGION`] when the product has none
    pub region: String,
    /// Every device of the task, in creation order
    pub devices: Vec<DevicePayload>,
    /// First device identified as a gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayPayload>,
    /// Client contact email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    /// Client contact phone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    /// Site latitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Site longitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// One device in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload {
    /// Device record id
    pub id: DeviceId,
    /// Manufacturer serial number
    pub device_serial: String,
    /// Free-text device type
    pub device_type: String,
    /// Installed firmware version
    pub firmware_version: String,
    /// Linked hardware catalog entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<HardwareId>,
    /// LoRaWAN device EUI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<String>,
    /// LoRaWAN application key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_key: Option<String>,
    /// Engineer notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The device acting as the site gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPayload {
    /// Device record id
    pub id: DeviceId,
    /// Manufacturer serial number
    pub device_serial: String,
    /// Free-text device type
    pub device_type: String,
    /// Installed firmware version
    pub firmware_version: String,
    /// LoRaWAN gateway EUI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<String>,
    /// Engineer notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl From<&DeviceProvisioning> for DevicePayload {
    fn from(device: &DeviceProvisioning) -> Self {
        Self {
            id: device.id,
            device_serial: device.device_serial.clone(),
            device_type: device.device_type.clone(),
            firmware_version: device.firmware_version.clone(),
            hardware_id: device.hardware.as_ref().map(|hardware| hardware.id),
            dev_eui: device.dev_eui.clone(),
            app_key: device.app_key.clone(),
            notes: device.notes.clone(),
        }
    }
}

impl From<&DeviceProvisioning> for GatewayPayload {
    fn from(device: &DeviceProvisioning) -> Self {
        Self {
            id: device.id,
            device_serial: device.device_serial.clone(),
            device_type: device.device_type.clone(),
            firmware_version: device.firmware_version.clone(),
            dev_eui: device.dev_eui.clone(),
            notes: device.notes.clone(),
        }
    }
}

/// Whether the device's type or linked hardware name mentions a gateway.
pub fn is_gateway(device: &DeviceProvisioning) -> bool {
    let mentions = |text: &str| text.to_lowercase().contains("gateway");
    mentions(&device.device_type)
        || device.hardware.as_ref().is_some_and(|hardware| mentions(&hardware.name))
}

/// Builds the provisioning payload for a task.
///
/// Every device record is mapped in order. The gateway is the first device
/// matching [`is_gateway`]; later matches are ignored.
pub fn build_payload(task: &TaskAggregate) -> ProvisioningPayload {
    ProvisioningPayload {
        event_type: EVENT_TYPE.to_string(),
        task_id: task.id,
        client_name: task.client_name.clone(),
        client_address: task.client_address.clone(),
        product_name: task.product.name.clone(),
        product_code: task.product.code.clone(),
        region: task
            .product
            .lorawan_region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        devices: task.devices.iter().map(DevicePayload::from).collect(),
        gateway: task.devices.iter().find(|device| is_gateway(device)).map(GatewayPayload::from),
        contact_email: task.contact_email.clone(),
        contact_phone: task.contact_phone.clone(),
        latitude: task.latitude,
        longitude: task.longitude,
    }
}

#[cfg(test)]
mod tests {
    use careflow_core::{HardwareRef, ProductId, ProductSummary};
    use serde_json::json;

    use super::*;

    fn device(serial: &str, device_type: &str) -> DeviceProvisioning {
        DeviceProvisioning {
            id: DeviceId::new(),
            device_serial: serial.to_string(),
            device_type: device_type.to_string(),
            firmware_version: "1.4.2".to_string(),
            hardware: None,
            dev_eui: None,
            app_key: None,
            notes: None,
            lorawan_provisioning_status: None,
            lorawan_provisioned_at: None,
            lorawan_provisioning_error: None,
        }
    }

    fn task(devices: Vec<DeviceProvisioning>) -> TaskAggregate {
        TaskAggregate {
            id: TaskId::new(),
            client_name: "Acme Farms".to_string(),
            client_address: "1 Field Road".to_string(),
            contact_email: None,
            contact_phone: None,
            latitude: None,
            longitude: None,
            product: ProductSummary {
                id: ProductId::new(),
                name: "Soil Monitoring Kit".to_string(),
                code: "SMK-01".to_string(),
                lorawan_region: None,
                uses_lorawan: true,
            },
            devices,
        }
    }

    #[test]
    fn missing_region_defaults_to_eu868() {
        let payload = build_payload(&task(vec![]));
        assert_eq!(payload.region, "EU868");
        assert_eq!(payload.event_type, "task.ready_for_provisioning");
    }

    #[test]
    fn product_region_is_kept() {
        let mut task = task(vec![]);
        task.product.lorawan_region = Some("US915".to_string());

        assert_eq!(build_payload(&task).region, "US915");
    }

    #[test]
    fn gateway_matched_through_hardware_name() {
        let mut gateway = device("GW-7", "Outdoor unit");
        gateway.hardware = Some(HardwareRef {
            id: HardwareId::new(),
            name: "Kerlink Wirnet iStation GATEWAY".to_string(),
        });
        let task = task(vec![device("S-1", "Soil sensor"), gateway.clone()]);

        let payload = build_payload(&task);
        let found = payload.gateway.expect("gateway detected");
        assert_eq!(found.id, gateway.id);
        assert_eq!(payload.devices[1].hardware_id, gateway.hardware.map(|h| h.id));
    }

    #[test]
    fn first_gateway_wins() {
        let first = device("GW-1", "LoRa Gateway");
        let task = task(vec![device("S-1", "sensor"), first.clone(), device("GW-2", "gateway")]);

        assert_eq!(build_payload(&task).gateway.map(|g| g.device_serial), Some(first.device_serial));
    }

    #[test]
    fn absent_optionals_are_omitted_on_the_wire() {
        let task = task(vec![device("S-1", "sensor")]);
        let value = serde_json::to_value(build_payload(&task)).unwrap();

        assert!(value.get("gateway").is_none());
        assert!(value.get("contactEmail").is_none());
        assert!(value.get("latitude").is_none());
        assert!(value["devices"][0].get("devEui").is_none());
        assert_eq!(value["devices"][0]["deviceSerial"], json!("S-1"));
        assert_eq!(value["productCode"], json!("SMK-01"));
    }
}
