//! Repository for device provisioning status writes.
//!
//! Only the `lorawan_*` columns are written. Every call updates all records
//! of one task in a single statement.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{ErrorField, ProvisioningUpdate, TaskId},
};

/// Repository for device provisioning records.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Applies the update to every device record of a task.
    ///
    /// Returns the number of rows updated.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_for_task(&self, task_id: TaskId, update: &ProvisioningUpdate) -> Result<u64> {
        let (touch_error, error_value) = match &update.error {
            ErrorField::Unchanged => (false, None),
            ErrorField::Clear => (true, None),
            ErrorField::Set(message) => (true, Some(message.as_str())),
        };

        let result = sqlx::query(
            r"
            UPDATE device_provisionings
            SET lorawan_provisioning_status = $2,
                lorawan_provisioned_at = COALESCE($3, lorawan_provisioned_at),
                lorawan_provisioning_error = CASE WHEN $4 THEN $5 ELSE lorawan_provisioning_error END
            WHERE task_id = $1
            ",
        )
        .bind(task_id)
        .bind(update.status)
        .bind(update.provisioned_at)
        .bind(touch_error)
        .bind(error_value)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
