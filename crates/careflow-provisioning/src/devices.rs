//! Flag-gated bulk updates of device provisioning status.

use std::sync::Arc;

use careflow_core::{Clock, ProvisioningStatus, ProvisioningUpdate, TaskId};
use tracing::debug;

use crate::{error::Result, storage::ProvisioningStorage};

/// Outcome of a device status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSync {
    /// The task is gone or its product does not use LoRaWAN.
    Skipped,
    /// Every device of the task was updated.
    Updated(u64),
}

/// Applies a provisioning status to every device of a task.
///
/// The product flag is re-read on every call, so a product switched off
/// mid-delivery stops receiving device writes.
#[derive(Clone)]
pub struct DeviceStatusUpdater {
    storage: Arc<dyn ProvisioningStorage>,
    clock: Arc<dyn Clock>,
}

impl DeviceStatusUpdater {
    /// Creates an updater over the given storage.
    pub fn new(storage: Arc<dyn ProvisioningStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Sets `status` (and optionally an error message) on every device.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningError::Storage` if the flag read or the bulk
    /// update fails.
    pub async fn update(
        &self,
        task_id: TaskId,
        status: ProvisioningStatus,
        error_message: Option<String>,
    ) -> Result<DeviceSync> {
        if self.storage.product_uses_lorawan(task_id).await? != Some(true) {
            debug!(%task_id, %status, "product not using LoRaWAN, device update skipped");
            return Ok(DeviceSync::Skipped);
        }

        let update = ProvisioningUpdate::new(status, error_message, self.clock.now_utc());
        let updated = self.storage.update_devices(task_id, update).await?;

        debug!(%task_id, %status, devices = updated, "device provisioning status updated");
        Ok(DeviceSync::Updated(updated))
    }
}
