//! PostgreSQL queue store.
//!
//! Every state change is a single conditional `UPDATE`; a zero row count means the
//! precondition did not hold, and a follow-up lookup tells `NotFound` apart from
//! `InvalidState`. Attempt counts are incremented in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::core::error::QueueError;
use crate::core::store::{ensure_retention_statuses, QueueStore};
use crate::core::task::{QueueStats, Recipients, TaskFilter, TaskRecord, TaskStatus};
use crate::util::serde::{OwnerId, TaskId};

const COLUMNS: &str = "id, owner_id, form_id, submission_id, provider_id, template_id, \
    recipients, subject, html_body, text_body, variables, scheduled_at, sent_at, priority, \
    status, attempts, last_error, created_at, updated_at";

const ORDER: &str = "ORDER BY priority DESC, scheduled_at ASC, created_at ASC, id ASC";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    owner_id: Uuid,
    form_id: Option<Uuid>,
    submission_id: Option<Uuid>,
    provider_id: Option<Uuid>,
    template_id: Option<Uuid>,
    recipients: Json<Recipients>,
    subject: String,
    html_body: String,
    text_body: String,
    variables: Json<Map<String, Value>>,
    scheduled_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    priority: i32,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = QueueError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(|e| QueueError::Persistence(format!("row {}: {e}", row.id)))?;
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| QueueError::Persistence(format!("row {}: negative attempts", row.id)))?;
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            form_id: row.form_id,
            submission_id: row.submission_id,
            provider_id: row.provider_id,
            template_id: row.template_id,
            recipients: row.recipients.0,
            subject: row.subject,
            html_body: row.html_body,
            text_body: row.text_body,
            variables: row.variables.0,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            priority: row.priority,
            status,
            attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_names(statuses: &[TaskStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_owned()).collect()
}

fn sql_limit(limit: usize) -> Option<i64> {
    (limit > 0).then(|| i64::try_from(limit).unwrap_or(i64::MAX))
}

/// Queue store backed by the `delivery_queue` table.
#[derive(Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url`.
    ///
    /// # Errors
    /// [`QueueError::Persistence`] when the database is unreachable.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Schema statements, safe to run repeatedly.
    #[must_use]
    pub const fn migrations() -> &'static [&'static str] {
        &[r"
CREATE TABLE IF NOT EXISTS delivery_queue (
    id UUID PRIMARY KEY,
    owner_id UUID NOT NULL,
    form_id UUID,
    submission_id UUID,
    provider_id UUID,
    template_id UUID,
    recipients JSONB NOT NULL,
    subject TEXT NOT NULL,
    html_body TEXT NOT NULL DEFAULT '',
    text_body TEXT NOT NULL DEFAULT '',
    variables JSONB NOT NULL DEFAULT '{}'::jsonb,
    scheduled_at TIMESTAMPTZ NOT NULL,
    sent_at TIMESTAMPTZ,
    priority INT NOT NULL DEFAULT 0,
    status TEXT NOT NULL CHECK (status IN ('pending', 'scheduled', 'sending', 'sent', 'failed', 'cancelled')),
    attempts INT NOT NULL DEFAULT 0 CHECK (attempts >= 0),
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_delivery_queue_ready ON delivery_queue (status, priority DESC, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_delivery_queue_owner ON delivery_queue (owner_id, status);
CREATE INDEX IF NOT EXISTS idx_delivery_queue_created ON delivery_queue (created_at);
"]
    }

    /// Apply [`PostgresQueueStore::migrations`].
    ///
    /// # Errors
    /// [`QueueError::Persistence`] if a statement fails.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        for statement in Self::migrations() {
            sqlx::raw_sql(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn status_of(&self, id: TaskId) -> Result<Option<TaskStatus>, QueueError> {
        let status: Option<String> =
            sqlx::query_scalar::<Postgres, String>("SELECT status FROM delivery_queue WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        status.map(|s| s.parse()).transpose()
    }

    /// Turn a zero-row conditional update into the right error.
    async fn explain_miss(&self, id: TaskId, operation: &'static str) -> QueueError {
        match self.status_of(id).await {
            Ok(Some(status)) => QueueError::InvalidState {
                id,
                status,
                operation,
            },
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[tracing::instrument(skip_all, fields(task_id = %record.id))]
    async fn enqueue(&self, record: TaskRecord) -> Result<(), QueueError> {
        let attempts = i32::try_from(record.attempts).unwrap_or(i32::MAX);
        sqlx::query(&format!(
            "INSERT INTO delivery_queue ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ))
        .bind(record.id)
        .bind(record.owner_id)
        .bind(record.form_id)
        .bind(record.submission_id)
        .bind(record.provider_id)
        .bind(record.template_id)
        .bind(Json(&record.recipients))
        .bind(&record.subject)
        .bind(&record.html_body)
        .bind(&record.text_body)
        .bind(Json(&record.variables))
        .bind(record.scheduled_at)
        .bind(record.sent_at)
        .bind(record.priority)
        .bind(record.status.as_str())
        .bind(attempts)
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to insert task");
            QueueError::from(e)
        })?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, QueueError> {
        sqlx::query_as::<Postgres, TaskRow>(&format!(
            "SELECT {COLUMNS} FROM delivery_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(TaskRecord::try_from)
        .transpose()
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRecord>, QueueError> {
        let rows = sqlx::query_as::<Postgres, TaskRow>(&format!(
            "SELECT {COLUMNS} FROM delivery_queue \
             WHERE ($1::uuid IS NULL OR owner_id = $1) AND ($2::text IS NULL OR status = $2) \
             {ORDER} LIMIT $3 OFFSET $4"
        ))
        .bind(filter.owner_id)
        .bind(filter.status.map(TaskStatus::as_str))
        .bind(sql_limit(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRecord::try_from).collect()
    }

    async fn fetch_ready_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>, QueueError> {
        let ids = sqlx::query_scalar::<Postgres, Uuid>(&format!(
            "SELECT id FROM delivery_queue \
             WHERE status = 'pending' OR (status = 'scheduled' AND scheduled_at <= $1) \
             {ORDER} LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn claim(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE delivery_queue SET status = 'sending', last_error = NULL, updated_at = $2 \
             WHERE id = $1 AND (status = 'pending' OR (status = 'scheduled' AND scheduled_at <= $2))",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE delivery_queue \
             SET status = $2, last_error = $3, updated_at = $4, \
                 sent_at = CASE WHEN $2 = 'sent' THEN $4 ELSE NULL END \
             WHERE id = $1 AND status = ANY($5)",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .bind(status_names(status.predecessors()))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.explain_miss(id, "update status of").await);
        }
        Ok(())
    }

    async fn increment_attempts(&self, id: TaskId, now: DateTime<Utc>) -> Result<u32, QueueError> {
        let attempts = sqlx::query_scalar::<Postgres, i32>(
            "UPDATE delivery_queue SET attempts = attempts + 1, updated_at = $2 \
             WHERE id = $1 RETURNING attempts",
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(QueueError::NotFound(id))?;
        u32::try_from(attempts)
            .map_err(|_| QueueError::Persistence(format!("row {id}: negative attempts")))
    }

    async fn cancel(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE delivery_queue SET status = 'cancelled', last_error = NULL, updated_at = $2 \
             WHERE id = $1 AND status = ANY($3)",
        )
        .bind(id)
        .bind(now)
        .bind(status_names(TaskStatus::Cancelled.predecessors()))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.explain_miss(id, "cancel").await);
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: TaskId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE delivery_queue \
             SET status = 'scheduled', scheduled_at = $2, last_error = NULL, updated_at = $3 \
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .bind(at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.explain_miss(id, "reschedule").await);
        }
        Ok(())
    }

    async fn stats(&self, owner: Option<OwnerId>) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query_as::<Postgres, (String, i64)>(
            "SELECT status, COUNT(*) FROM delivery_queue \
             WHERE ($1::uuid IS NULL OR owner_id = $1) GROUP BY status",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.add(status.parse()?, u64::try_from(count).unwrap_or(0));
        }
        Ok(stats)
    }

    #[tracing::instrument(skip(self))]
    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> Result<u64, QueueError> {
        ensure_retention_statuses(statuses)?;
        let result = sqlx::query(
            "DELETE FROM delivery_queue WHERE created_at < $1 AND status = ANY($2)",
        )
        .bind(cutoff)
        .bind(status_names(statuses))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
