//! Read-only repository for onboarding task aggregates.
//!
//! Joins a task with its product and its device provisioning records (plus
//! linked hardware) into the `TaskAggregate` read model.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{
        DeviceId, DeviceProvisioning, HardwareId, HardwareRef, ProductId, ProductSummary,
        ProvisioningStatus, TaskAggregate, TaskId,
    },
};

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: TaskId,
    client_name: String,
    client_address: String,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    product_id: ProductId,
    product_name: String,
    product_code: String,
    lorawan_region: Option<String>,
    uses_lorawan: bool,
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: DeviceId,
    device_serial: String,
    device_type: String,
    firmware_version: String,
    hardware_id: Option<HardwareId>,
    hardware_name: Option<String>,
    dev_eui: Option<String>,
    app_key: Option<String>,
    notes: Option<String>,
    lorawan_provisioning_status: Option<ProvisioningStatus>,
    lorawan_provisioned_at: Option<DateTime<Utc>>,
    lorawan_provisioning_error: Option<String>,
}

impl From<DeviceRow> for DeviceProvisioning {
    fn from(row: DeviceRow) -> Self {
        let hardware = match (row.hardware_id, row.hardware_name) {
            (Some(id), Some(name)) => Some(HardwareRef { id, name }),
            _ => None,
        };

        Self {
            id: row.id,
            device_serial: row.device_serial,
            device_type: row.device_type,
            firmware_version: row.firmware_version,
            hardware,
            dev_eui: row.dev_eui,
            app_key: row.app_key,
            notes: row.notes,
            lorawan_provisioning_status: row.lorawan_provisioning_status,
            lorawan_provisioned_at: row.lorawan_provisioned_at,
            lorawan_provisioning_error: row.lorawan_provisioning_error,
        }
    }
}

const DEVICE_QUERY: &str = r"
    SELECT dp.id, dp.device_serial, dp.device_type, dp.firmware_version,
           h.id AS hardware_id, h.name AS hardware_name,
           dp.dev_eui, dp.app_key, dp.notes,
           dp.lorawan_provisioning_status, dp.lorawan_provisioned_at,
           dp.lorawan_provisioning_error
    FROM device_provisionings dp
    LEFT JOIN hardware h ON h.id = dp.hardware_id
    WHERE dp.task_id = $1
    ORDER BY dp.created_at ASC, dp.id ASC
";

/// Repository for task reads.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Loads a task with its product, devices and linked hardware.
    ///
    /// Returns `None` when the task does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if either query fails.
    pub async fn find_with_devices(&self, task_id: TaskId) -> Result<Option<TaskAggregate>> {
        let Some(task) = sqlx::query_as::<_, TaskRow>(
            r"
            SELECT t.id, t.client_name, t.client_address,
                   t.contact_email, t.contact_phone, t.latitude, t.longitude,
                   p.id AS product_id, p.name AS product_name, p.code AS product_code,
                   p.lorawan_region, p.uses_lorawan
            FROM onboarding_tasks t
            JOIN products p ON p.id = t.product_id
            WHERE t.id = $1
            ",
        )
        .bind(task_id)
        .fetch_optional(&*self.pool)
        .await?
        else {
            return Ok(None);
        };

        let devices = sqlx::query_as::<_, DeviceRow>(DEVICE_QUERY)
            .bind(task_id)
            .fetch_all(&*self.pool)
            .await?
            .into_iter()
            .map(DeviceProvisioning::from)
            .collect();

        Ok(Some(TaskAggregate {
            id: task.id,
            client_name: task.client_name,
            client_address: task.client_address,
            contact_email: task.contact_email,
            contact_phone: task.contact_phone,
            latitude: task.latitude,
            longitude: task.longitude,
            product: ProductSummary {
                id: task.product_id,
                name: task.product_name,
                code: task.product_code,
                lorawan_region: task.lorawan_region,
                uses_lorawan: task.uses_lorawan,
            },
            devices,
        }))
    }

    /// Reads the current LoRaWAN flag of the task's product.
    ///
    /// Returns `None` when the task does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn product_uses_lorawan(&self, task_id: TaskId) -> Result<Option<bool>> {
        let flag: Option<(bool,)> = sqlx::query_as(
            r"
            SELECT p.uses_lorawan
            FROM onboarding_tasks t
            JOIN products p ON p.id = t.product_id
            WHERE t.id = $1
            ",
        )
        .bind(task_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(flag.map(|(uses_lorawan,)| uses_lorawan))
    }
}
