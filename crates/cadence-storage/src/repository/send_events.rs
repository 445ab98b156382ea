//! Send event log
//!
//! Append-only. Rows are never updated or deleted.

use async_trait::async_trait;
use cadence_common::types::{CampaignId, SendRunId};
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::DatabasePool;
use crate::models::{NewSendEvent, SendEvent};

/// Send event repository trait
#[async_trait]
pub trait SendEventRepository: Send + Sync {
    async fn append(&self, event: NewSendEvent) -> Result<SendEvent>;
    /// Successful sends of any kind in `[from, to)`
    async fn count_sent_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64>;
    /// Time of the latest successful send of a run
    async fn last_sent_in_run(&self, run_id: SendRunId) -> Result<Option<DateTime<Utc>>>;
    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SendEvent>>;
}

#[derive(FromRow)]
struct SendEventRow {
    id: Uuid,
    campaign_id: Option<Uuid>,
    send_run_id: Option<Uuid>,
    draft_item_id: Option<Uuid>,
    recipient_address: String,
    kind: String,
    outcome: String,
    provider_message_id: Option<String>,
    permalink: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SendEventRow> for SendEvent {
    type Error = Error;

    fn try_from(row: SendEventRow) -> Result<Self> {
        Ok(SendEvent {
            id: row.id,
            campaign_id: row.campaign_id,
            send_run_id: row.send_run_id,
            draft_item_id: row.draft_item_id,
            recipient_address: row.recipient_address,
            kind: row.kind.parse()?,
            outcome: row.outcome.parse()?,
            provider_message_id: row.provider_message_id,
            permalink: row.permalink,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

/// Database send event repository
pub struct DbSendEventRepository {
    pool: DatabasePool,
}

impl DbSendEventRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SendEventRepository for DbSendEventRepository {
    async fn append(&self, event: NewSendEvent) -> Result<SendEvent> {
        sqlx::query_as::<_, SendEventRow>(
            r#"
            INSERT INTO send_events (
                id, campaign_id, send_run_id, draft_item_id, recipient_address,
                kind, outcome, provider_message_id, permalink, error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(event.campaign_id)
        .bind(event.send_run_id)
        .bind(event.draft_item_id)
        .bind(&event.recipient_address)
        .bind(event.kind.as_str())
        .bind(event.outcome.as_str())
        .bind(&event.provider_message_id)
        .bind(&event.permalink)
        .bind(&event.error)
        .bind(event.at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .try_into()
    }

    async fn count_sent_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM send_events
            WHERE outcome = 'sent' AND created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn last_sent_in_run(&self, run_id: SendRunId) -> Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(created_at) FROM send_events WHERE send_run_id = $1 AND outcome = 'sent'",
        )
        .bind(run_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SendEvent>> {
        let rows = sqlx::query_as::<_, SendEventRow>(
            r#"
            SELECT * FROM send_events
            WHERE campaign_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.into_iter().map(SendEvent::try_from).collect()
    }
}
