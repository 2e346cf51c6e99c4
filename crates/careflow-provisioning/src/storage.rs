//! Storage abstraction for provisioning webhooks.
//!
//! The orchestrator, engine and device updater only see `ProvisioningStorage`.
//! Production wraps `careflow_core::storage::Storage`; tests use the
//! in-memory [`mock::MockProvisioningStorage`].

use std::{future::Future, pin::Pin, sync::Arc};

use careflow_core::{
    error::Result, DeliveryLogEntry, DeliveryStatus, LogCompletion, LogId, NewDeliveryLog,
    ProvisioningUpdate, TaskAggregate, TaskId,
};
use chrono::{DateTime, Utc};

/// Boxed future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage operations required for provisioning webhooks.
pub trait ProvisioningStorage: Send + Sync + 'static {
    /// Loads a task with product and devices; `None` when it does not exist.
    fn find_task(&self, task_id: TaskId) -> StorageFuture<'_, Option<TaskAggregate>>;

    /// Reads the product's current LoRaWAN flag; `None` when the task is gone.
    fn product_uses_lorawan(&self, task_id: TaskId) -> StorageFuture<'_, Option<bool>>;

    /// Applies one update to every device of a task, returning rows touched.
    fn update_devices(
        &self,
        task_id: TaskId,
        update: ProvisioningUpdate,
    ) -> StorageFuture<'_, u64>;

    /// Persists a new log entry in `PENDING` with zero attempts.
    fn create_log(
        &self,
        log: NewDeliveryLog,
        created_at: DateTime<Utc>,
    ) -> StorageFuture<'_, DeliveryLogEntry>;

    /// Increments `attempts`, stamps `last_attempt_at` and sets the in-flight
    /// status.
    fn record_attempt(
        &self,
        log_id: LogId,
        status: DeliveryStatus,
        attempted_at: DateTime<Utc>,
    ) -> StorageFuture<'_, DeliveryLogEntry>;

    /// Writes the terminal outcome of a lifecycle.
    fn complete_log(
        &self,
        log_id: LogId,
        completion: LogCompletion,
    ) -> StorageFuture<'_, DeliveryLogEntry>;

    /// Atomically moves a `FAILED` entry to `RETRYING`; `None` when the
    /// entry is missing or in any other state.
    fn claim_retry(&self, log_id: LogId) -> StorageFuture<'_, Option<DeliveryLogEntry>>;

    /// Finds one log entry.
    fn find_log(&self, log_id: LogId) -> StorageFuture<'_, Option<DeliveryLogEntry>>;

    /// Finds every log entry of a task, newest first.
    fn find_logs_by_task(&self, task_id: TaskId) -> StorageFuture<'_, Vec<DeliveryLogEntry>>;

    /// Verifies the backing store is reachable.
    fn health_check(&self) -> StorageFuture<'_, ()>;
}

/// PostgreSQL implementation over the core repositories.
pub struct PostgresProvisioningStorage {
    storage: Arc<careflow_core::storage::Storage>,
}

impl PostgresProvisioningStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<careflow_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl ProvisioningStorage for PostgresProvisioningStorage {
    fn find_task(&self, task_id: TaskId) -> StorageFuture<'_, Option<TaskAggregate>> {
        Box::pin(async move { self.storage.tasks.find_with_devices(task_id).await })
    }

    fn product_uses_lorawan(&self, task_id: TaskId) -> StorageFuture<'_, Option<bool>> {
        Box::pin(async move { self.storage.tasks.product_uses_lorawan(task_id).await })
    }

    fn update_devices(
        &self,
        task_id: TaskId,
        update: ProvisioningUpdate,
    ) -> StorageFuture<'_, u64> {
        Box::pin(async move { self.storage.devices.update_for_task(task_id, &update).await })
    }

    fn create_log(
        &self,
        log: NewDeliveryLog,
        created_at: DateTime<Utc>,
    ) -> StorageFuture<'_, DeliveryLogEntry> {
        Box::pin(async move { self.storage.webhook_logs.create(&log, created_at).await })
    }

    fn record_attempt(
        &self,
        log_id: LogId,
        status: DeliveryStatus,
        attempted_at: DateTime<Utc>,
    ) -> StorageFuture<'_, DeliveryLogEntry> {
        Box::pin(async move {
            self.storage.webhook_logs.record_attempt(log_id, status, attempted_at).await
        })
    }

    fn complete_log(
        &self,
        log_id: LogId,
        completion: LogCompletion,
    ) -> StorageFuture<'_, DeliveryLogEntry> {
        Box::pin(async move { self.storage.webhook_logs.complete(log_id, &completion).await })
    }

    fn claim_retry(&self, log_id: LogId) -> StorageFuture<'_, Option<DeliveryLogEntry>> {
        Box::pin(async move { self.storage.webhook_logs.claim_retry(log_id).await })
    }

    fn find_log(&self, log_id: LogId) -> StorageFuture<'_, Option<DeliveryLogEntry>> {
        Box::pin(async move { self.storage.webhook_logs.find_by_id(log_id).await })
    }

    fn find_logs_by_task(&self, task_id: TaskId) -> StorageFuture<'_, Vec<DeliveryLogEntry>> {
        Box::pin(async move { self.storage.webhook_logs.find_by_task(task_id).await })
    }

    fn health_check(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move { self.storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory storage for exercising delivery logic without a database.
    //!
    //! Enforces the same status transition rules as the service and supports
    //! injecting a failure into a single operation.

    use std::{collections::HashMap, sync::Arc};

    use careflow_core::{CoreError, DeviceProvisioning};
    use sqlx::types::Json;
    use tokio::sync::RwLock;

    use super::{
        DateTime, DeliveryLogEntry, DeliveryStatus, LogCompletion, LogId, NewDeliveryLog,
        ProvisioningStorage, ProvisioningUpdate, StorageFuture, TaskAggregate, TaskId, Utc,
    };

    /// Operations a failure can be injected into.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Operation {
        /// `find_task`
        FindTask,
        /// `update_devices`
        UpdateDevices,
        /// `create_log`
        CreateLog,
        /// `record_attempt`
        RecordAttempt,
        /// `complete_log`
        CompleteLog,
        /// `health_check`
        HealthCheck,
    }

    /// Mock storage backed by in-memory maps.
    #[derive(Clone, Default)]
    pub struct MockProvisioningStorage {
        tasks: Arc<RwLock<HashMap<TaskId, TaskAggregate>>>,
        logs: Arc<RwLock<Vec<DeliveryLogEntry>>>,
        device_updates: Arc<RwLock<Vec<(TaskId, ProvisioningUpdate)>>>,
        failures: Arc<RwLock<HashMap<Operation, String>>>,
    }

    impl MockProvisioningStorage {
        /// Creates an empty mock storage.
        pub fn new() -> Self {
            Self::default()
        }

        /// Stores a task aggregate.
        pub async fn add_task(&self, task: TaskAggregate) {
            self.tasks.write().await.insert(task.id, task);
        }

        /// Flips a stored task's product flag.
        pub async fn set_uses_lorawan(&self, task_id: TaskId, uses_lorawan: bool) {
            if let Some(task) = self.tasks.write().await.get_mut(&task_id) {
                task.product.uses_lorawan = uses_lorawan;
            }
        }

        /// Stores a log entry as is, bypassing transition checks.
        pub async fn insert_log(&self, entry: DeliveryLogEntry) {
            self.logs.write().await.push(entry);
        }

        /// Current device records of a task.
        pub async fn devices(&self, task_id: TaskId) -> Vec<DeviceProvisioning> {
            self.tasks
                .read()
                .await
                .get(&task_id)
                .map(|task| task.devices.clone())
                .unwrap_or_default()
        }

        /// Every device update applied so far, in order.
        pub async fn device_updates(&self) -> Vec<(TaskId, ProvisioningUpdate)> {
            self.device_updates.read().await.clone()
        }

        /// Every stored log entry, in creation order.
        pub async fn all_logs(&self) -> Vec<DeliveryLogEntry> {
            self.logs.read().await.clone()
        }

        /// Makes the next call of `operation` fail with `message`.
        pub async fn inject_failure(&self, operation: Operation, message: impl Into<String>) {
            self.failures.write().await.insert(operation, message.into());
        }

        async fn take_failure(&self, operation: Operation) -> Result<(), CoreError> {
            match self.failures.write().await.remove(&operation) {
                Some(message) => Err(CoreError::Database(message)),
                None => Ok(()),
            }
        }

        async fn update_log<F>(
            &self,
            log_id: LogId,
            next: DeliveryStatus,
            apply: F,
        ) -> Result<DeliveryLogEntry, CoreError>
        where
            F: FnOnce(&mut DeliveryLogEntry),
        {
            let mut logs = self.logs.write().await;
            let entry = logs
                .iter_mut()
                .find(|entry| entry.id == log_id)
                .ok_or_else(|| CoreError::NotFound(format!("webhook log {log_id} not found")))?;

            if !entry.status.can_transition_to(next) {
                return Err(CoreError::Conflict(format!(
                    "webhook log {log_id} cannot move from {} to {next}",
                    entry.status
                )));
            }

            apply(entry);
            entry.status = next;
            Ok(entry.clone())
        }
    }

    impl ProvisioningStorage for MockProvisioningStorage {
        fn find_task(&self, task_id: TaskId) -> StorageFuture<'_, Option<TaskAggregate>> {
            Box::pin(async move {
                self.take_failure(Operation::FindTask).await?;
                Ok(self.tasks.read().await.get(&task_id).cloned())
            })
        }

        fn product_uses_lorawan(&self, task_id: TaskId) -> StorageFuture<'_, Option<bool>> {
            Box::pin(async move {
                Ok(self.tasks.read().await.get(&task_id).map(|task| task.product.uses_lorawan))
            })
        }

        fn update_devices(
            &self,
            task_id: TaskId,
            update: ProvisioningUpdate,
        ) -> StorageFuture<'_, u64> {
            Box::pin(async move {
                self.take_failure(Operation::UpdateDevices).await?;

                let mut tasks = self.tasks.write().await;
                let touched = match tasks.get_mut(&task_id) {
                    Some(task) => {
                        task.devices.iter_mut().for_each(|device| update.apply_to(device));
                        task.devices.len() as u64
                    },
                    None => 0,
                };
                drop(tasks);

                self.device_updates.write().await.push((task_id, update));
                Ok(touched)
            })
        }

        fn create_log(
            &self,
            log: NewDeliveryLog,
            created_at: DateTime<Utc>,
        ) -> StorageFuture<'_, DeliveryLogEntry> {
            Box::pin(async move {
                self.take_failure(Operation::CreateLog).await?;

                let entry = log.into_entry(LogId::new(), created_at);
                self.logs.write().await.push(entry.clone());
                Ok(entry)
            })
        }

        fn record_attempt(
            &self,
            log_id: LogId,
            status: DeliveryStatus,
            attempted_at: DateTime<Utc>,
        ) -> StorageFuture<'_, DeliveryLogEntry> {
            Box::pin(async move {
                self.take_failure(Operation::RecordAttempt).await?;

                self.update_log(log_id, status, |entry| {
                    entry.attempts += 1;
                    entry.last_attempt_at = Some(attempted_at);
                })
                .await
            })
        }

        fn complete_log(
            &self,
            log_id: LogId,
            completion: LogCompletion,
        ) -> StorageFuture<'_, DeliveryLogEntry> {
            Box::pin(async move {
                self.take_failure(Operation::CompleteLog).await?;

                let LogCompletion { status, status_code, response, error_message } = completion;
                self.update_log(log_id, status, |entry| {
                    entry.status_code = status_code;
                    entry.response = response.map(Json);
                    entry.error_message = error_message;
                })
                .await
            })
        }

        fn claim_retry(&self, log_id: LogId) -> StorageFuture<'_, Option<DeliveryLogEntry>> {
            Box::pin(async move {
                let mut logs = self.logs.write().await;
                let claimed = logs
                    .iter_mut()
                    .find(|entry| entry.id == log_id && entry.status == DeliveryStatus::Failed)
                    .map(|entry| {
                        entry.status = DeliveryStatus::Retrying;
                        entry.clone()
                    });
                Ok(claimed)
            })
        }

        fn find_log(&self, log_id: LogId) -> StorageFuture<'_, Option<DeliveryLogEntry>> {
            Box::pin(async move {
                Ok(self.logs.read().await.iter().find(|entry| entry.id == log_id).cloned())
            })
        }

        fn find_logs_by_task(
            &self,
            task_id: TaskId,
        ) -> StorageFuture<'_, Vec<DeliveryLogEntry>> {
            Box::pin(async move {
                let mut entries: Vec<DeliveryLogEntry> = self
                    .logs
                    .read()
                    .await
                    .iter()
                    .rev()
                    .filter(|entry| entry.task_id == task_id)
                    .cloned()
                    .collect();
                entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(entries)
            })
        }

        fn health_check(&self) -> StorageFuture<'_, ()> {
            Box::pin(async move { self.take_failure(Operation::HealthCheck).await })
        }
    }
}
