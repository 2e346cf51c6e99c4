//! Repository for the webhook delivery log.
//!
//! One row per send lifecycle. Rows are created and updated, never deleted.
//! The `attempts` counter is only ever incremented in SQL so concurrent
//! readers always see a monotonic value. Status writes are conditional on
//! the allowed predecessor states; a row in any other state is left alone
//! and reported as `CoreError::Conflict`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};

use crate::{
    error::{CoreError, Result},
    models::{DeliveryLogEntry, DeliveryStatus, LogCompletion, LogId, NewDeliveryLog, TaskId},
};

const COLUMNS: &str = "id, task_id, webhook_type, endpoint, payload, status, attempts, \
                       last_attempt_at, status_code, response, error_message, created_at";

/// Repository for delivery log operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new entry in `PENDING` with zero attempts.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create(
        &self,
        log: &NewDeliveryLog,
        created_at: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        let query = format!(
            r"
            INSERT INTO webhook_logs (
                id, task_id, webhook_type, endpoint, payload, status, attempts, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            RETURNING {COLUMNS}
            "
        );

        let entry = sqlx::query_as::<_, DeliveryLogEntry>(&query)
            .bind(LogId::new())
            .bind(log.task_id)
            .bind(log.webhook_type)
            .bind(&log.endpoint)
            .bind(Json(&log.payload))
            .bind(DeliveryStatus::Pending)
            .bind(created_at)
            .fetch_one(&*self.pool)
            .await?;

        Ok(entry)
    }

    /// Records the start of an attempt: increments `attempts`, stamps
    /// `last_attempt_at` and sets the in-flight status.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the entry does not exist and
    /// `CoreError::Conflict` if its status cannot move to `status`.
    pub async fn record_attempt(
        &self,
        id: LogId,
        status: DeliveryStatus,
        attempted_at: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        let query = format!(
            r"
            UPDATE webhook_logs
            SET attempts = attempts + 1,
                last_attempt_at = $2,
                status = $3
            WHERE id = $1 AND status = ANY($4)
            RETURNING {COLUMNS}
            "
        );

        let updated = sqlx::query_as::<_, DeliveryLogEntry>(&query)
            .bind(id)
            .bind(attempted_at)
            .bind(status)
            .bind(labels(&status.predecessors()))
            .fetch_optional(&*self.pool)
            .await?;

        match updated {
            Some(entry) => Ok(entry),
            None => Err(self.rejected(id, status).await),
        }
    }

    /// Writes the terminal outcome of a lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the entry does not exist and
    /// `CoreError::Conflict` if it is not in flight.
    pub async fn complete(&self, id: LogId, completion: &LogCompletion) -> Result<DeliveryLogEntry> {
        let query = format!(
            r"
            UPDATE webhook_logs
            SET status = $2,
                status_code = $3,
                response = $4,
                error_message = $5
            WHERE id = $1 AND status = ANY($6)
            RETURNING {COLUMNS}
            "
        );

        let updated = sqlx::query_as::<_, DeliveryLogEntry>(&query)
            .bind(id)
            .bind(completion.status)
            .bind(completion.status_code)
            .bind(completion.response.as_ref().map(Json))
            .bind(&completion.error_message)
            .bind(labels(&completion.status.predecessors()))
            .fetch_optional(&*self.pool)
            .await?;

        match updated {
            Some(entry) => Ok(entry),
            None => Err(self.rejected(id, completion.status).await),
        }
    }

    /// Moves a `FAILED` entry to `RETRYING` in one statement.
    ///
    /// Returns `None` when the entry is missing or not `FAILED`, so at most
    /// one concurrent manual retry wins.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn claim_retry(&self, id: LogId) -> Result<Option<DeliveryLogEntry>> {
        let query = format!(
            r"
            UPDATE webhook_logs
            SET status = $2
            WHERE id = $1 AND status = $3
            RETURNING {COLUMNS}
            "
        );

        let entry = sqlx::query_as::<_, DeliveryLogEntry>(&query)
            .bind(id)
            .bind(DeliveryStatus::Retrying)
            .bind(DeliveryStatus::Failed)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(entry)
    }

    async fn rejected(&self, id: LogId, next: DeliveryStatus) -> CoreError {
        match self.find_by_id(id).await {
            Ok(Some(entry)) => CoreError::Conflict(format!(
                "webhook log {id} cannot move from {} to {next}",
                entry.status
            )),
            Ok(None) => CoreError::NotFound(format!("webhook log {id} not found")),
            Err(err) => err,
        }
    }

    /// Finds an entry by id.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, id: LogId) -> Result<Option<DeliveryLogEntry>> {
        let query = format!("SELECT {COLUMNS} FROM webhook_logs WHERE id = $1");

        let entry = sqlx::query_as::<_, DeliveryLogEntry>(&query)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(entry)
    }

    /// Finds every entry for a task, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<DeliveryLogEntry>> {
        let query = format!(
            r"
            SELECT {COLUMNS}
            FROM webhook_logs
            WHERE task_id = $1
            ORDER BY created_at DESC
            "
        );

        let entries = sqlx::query_as::<_, DeliveryLogEntry>(&query)
            .bind(task_id)
            .fetch_all(&*self.pool)
            .await?;

        Ok(entries)
    }
}

fn labels(statuses: &[DeliveryStatus]) -> Vec<&'static str> {
    statuses.iter().map(DeliveryStatus::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }

    #[test]
    fn completion_guard_only_admits_in_flight_rows() {
        assert_eq!(labels(&DeliveryStatus::Failed.predecessors()), vec!["PENDING", "RETRYING"]);
        assert_eq!(labels(&DeliveryStatus::Retrying.predecessors()), vec![
            "PENDING", "RETRYING", "FAILED"
        ]);
    }
}
