//! Send run repository

use async_trait::async_trait;
use cadence_common::types::{CampaignId, SendRunId};
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::DatabasePool;
use crate::models::{RunStatus, SendRun};

/// Send run repository trait
#[async_trait]
pub trait SendRunRepository: Send + Sync {
    async fn create(&self, campaign_id: CampaignId, at: DateTime<Utc>) -> Result<SendRun>;
    async fn get(&self, id: SendRunId) -> Result<Option<SendRun>>;
    /// Close an in-progress run; `false` if it was already closed
    async fn close(
        &self,
        id: SendRunId,
        status: RunStatus,
        end_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<SendRun>>;
}

#[derive(FromRow)]
struct SendRunRow {
    id: Uuid,
    campaign_id: Uuid,
    status: String,
    end_reason: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<SendRunRow> for SendRun {
    type Error = Error;

    fn try_from(row: SendRunRow) -> Result<Self> {
        Ok(SendRun {
            id: row.id,
            campaign_id: row.campaign_id,
            status: row.status.parse()?,
            end_reason: row.end_reason,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

/// Database send run repository
pub struct DbSendRunRepository {
    pool: DatabasePool,
}

impl DbSendRunRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SendRunRepository for DbSendRunRepository {
    async fn create(&self, campaign_id: CampaignId, at: DateTime<Utc>) -> Result<SendRun> {
        sqlx::query_as::<_, SendRunRow>(
            r#"
            INSERT INTO send_runs (id, campaign_id, status, started_at)
            VALUES ($1, $2, 'in_progress', $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(campaign_id)
        .bind(at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .try_into()
    }

    async fn get(&self, id: SendRunId) -> Result<Option<SendRun>> {
        sqlx::query_as::<_, SendRunRow>("SELECT * FROM send_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .map(SendRun::try_from)
            .transpose()
    }

    async fn close(
        &self,
        id: SendRunId,
        status: RunStatus,
        end_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE send_runs SET status = $2, end_reason = $3, ended_at = $4
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(end_reason)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<SendRun>> {
        let rows = sqlx::query_as::<_, SendRunRow>(
            "SELECT * FROM send_runs WHERE campaign_id = $1 ORDER BY started_at ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.into_iter().map(SendRun::try_from).collect()
    }
}
