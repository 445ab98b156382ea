//! Job queue repository

use async_trait::async_trait;
use cadence_common::types::JobId;
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::DatabasePool;
use crate::models::{Job, JobStatus};

/// Job repository trait
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        scheduled_at: DateTime<Utc>,
    ) -> Result<JobId>;
    /// Atomically move up to `limit` due jobs to `running` and return them
    async fn claim_due(&self, queue: &str, limit: i64, now: DateTime<Utc>) -> Result<Vec<Job>>;
    async fn complete(&self, id: JobId, at: DateTime<Utc>) -> Result<()>;
    async fn fail(&self, id: JobId, error: &str, at: DateTime<Utc>) -> Result<()>;
    async fn count_by_status(&self, queue: &str, status: JobStatus) -> Result<i64>;
}

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    queue: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            queue: row.queue,
            payload: row.payload,
            status: row.status.parse()?,
            attempts: row.attempts,
            last_error: row.last_error,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        })
    }
}

/// Database job repository
pub struct DbJobRepository {
    pool: DatabasePool,
}

impl DbJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for DbJobRepository {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        scheduled_at: DateTime<Utc>,
    ) -> Result<JobId> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, queue, payload, status, attempts, scheduled_at, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, NOW())
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(&payload)
        .bind(scheduled_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(id)
    }

    async fn claim_due(&self, queue: &str, limit: i64, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = $3, attempts = attempts + 1
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND queue = $1
                  AND scheduled_at <= $3
                ORDER BY scheduled_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(limit)
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut jobs = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by_key(|j| j.scheduled_at);
        Ok(jobs)
    }

    async fn complete(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'completed', completed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = $2, completed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn count_by_status(&self, queue: &str, status: JobStatus) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE queue = $1 AND status = $2")
            .bind(queue)
            .bind(status.as_str())
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
