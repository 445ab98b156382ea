//! Draft item repository
//!
//! Drafts move one way: `pending` to `sent`, `failed` or `excluded`. Every
//! state change is conditional on the row still being pending, so a repeated
//! mark is a no-op that reports `false`.

use async_trait::async_trait;
use cadence_common::types::{CampaignId, ContactId, DraftItemId};
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::DatabasePool;
use crate::models::{DraftCounts, DraftItem, DraftState, ExclusionKind, InsertReport, NewDraftItem};

/// Draft repository trait
#[async_trait]
pub trait DraftRepository: Send + Sync {
    /// Insert drafts, skipping any whose address already has a non-excluded
    /// draft in the same campaign
    async fn insert_batch(&self, drafts: Vec<NewDraftItem>) -> Result<InsertReport>;
    async fn get(&self, id: DraftItemId) -> Result<Option<DraftItem>>;
    /// Oldest pending drafts not held by a claim newer than `claim_cutoff`
    async fn next_pending_batch(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<Vec<DraftItem>>;
    async fn claim(
        &self,
        id: DraftItemId,
        token: Uuid,
        at: DateTime<Utc>,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<bool>;
    async fn mark_sent(
        &self,
        id: DraftItemId,
        provider_message_id: &str,
        permalink: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn mark_failed(&self, id: DraftItemId, error: &str, at: DateTime<Utc>) -> Result<bool>;
    async fn exclude(&self, id: DraftItemId, kind: ExclusionKind, at: DateTime<Utc>)
        -> Result<bool>;
    async fn count_pending(&self, campaign_id: CampaignId) -> Result<i64>;
    async fn counts(&self, campaign_id: CampaignId) -> Result<DraftCounts>;
    async fn find_active_by_address(
        &self,
        campaign_id: CampaignId,
        address: &str,
    ) -> Result<Option<DraftItem>>;
    async fn list(
        &self,
        campaign_id: CampaignId,
        state: Option<DraftState>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DraftItem>>;
    /// Clear claims on pending drafts so a new run can pick them up
    async fn release_claims(&self, campaign_id: CampaignId) -> Result<u64>;
    async fn delete_by_campaign(&self, campaign_id: CampaignId) -> Result<u64>;
}

#[derive(FromRow)]
struct DraftRow {
    id: Uuid,
    campaign_id: Uuid,
    contact_id: Option<ContactId>,
    recipient_address: String,
    subject: String,
    html_body: Option<String>,
    text_body: Option<String>,
    state: String,
    error: Option<String>,
    manual_include: bool,
    manual_exclude: bool,
    provider_message_id: Option<String>,
    permalink: Option<String>,
    claim_token: Option<Uuid>,
    claimed_at: Option<DateTime<Utc>>,
    position: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DraftRow> for DraftItem {
    type Error = Error;

    fn try_from(row: DraftRow) -> Result<Self> {
        Ok(DraftItem {
            id: row.id,
            campaign_id: row.campaign_id,
            contact_id: row.contact_id,
            recipient_address: row.recipient_address,
            subject: row.subject,
            html_body: row.html_body,
            text_body: row.text_body,
            state: row.state.parse()?,
            error: row.error,
            manual_include: row.manual_include,
            manual_exclude: row.manual_exclude,
            provider_message_id: row.provider_message_id,
            permalink: row.permalink,
            claim_token: row.claim_token,
            claimed_at: row.claimed_at,
            position: row.position,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_items(rows: Vec<DraftRow>) -> Result<Vec<DraftItem>> {
    rows.into_iter().map(DraftItem::try_from).collect()
}

/// Database draft repository
pub struct DbDraftRepository {
    pool: DatabasePool,
}

impl DbDraftRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DraftRepository for DbDraftRepository {
    async fn insert_batch(&self, drafts: Vec<NewDraftItem>) -> Result<InsertReport> {
        let mut report = InsertReport::default();
        let now = Utc::now();
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        for input in drafts {
            let result = sqlx::query(
                r#"
                INSERT INTO draft_items (
                    id, campaign_id, contact_id, recipient_address, subject,
                    html_body, text_body, state, manual_include, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $9)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(input.campaign_id)
            .bind(input.contact_id)
            .bind(&input.recipient_address)
            .bind(&input.subject)
            .bind(&input.html_body)
            .bind(&input.text_body)
            .bind(input.manual_include)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

            if result.rows_affected() > 0 {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(report)
    }

    async fn get(&self, id: DraftItemId) -> Result<Option<DraftItem>> {
        sqlx::query_as::<_, DraftRow>("SELECT * FROM draft_items WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .map(DraftItem::try_from)
            .transpose()
    }

    async fn next_pending_batch(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<Vec<DraftItem>> {
        let rows = sqlx::query_as::<_, DraftRow>(
            r#"
            SELECT * FROM draft_items
            WHERE campaign_id = $1
              AND state = 'pending'
              AND (claim_token IS NULL OR claimed_at < $2)
            ORDER BY position ASC
            LIMIT $3
            "#,
        )
        .bind(campaign_id)
        .bind(claim_cutoff)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        into_items(rows)
    }

    async fn claim(
        &self,
        id: DraftItemId,
        token: Uuid,
        at: DateTime<Utc>,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE draft_items SET claim_token = $2, claimed_at = $3, updated_at = $3
            WHERE id = $1
              AND state = 'pending'
              AND (claim_token IS NULL OR claimed_at < $4)
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(at)
        .bind(claim_cutoff)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_sent(
        &self,
        id: DraftItemId,
        provider_message_id: &str,
        permalink: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE draft_items SET
                state = 'sent', provider_message_id = $2, permalink = $3,
                error = NULL, claim_token = NULL, updated_at = $4
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(id)
        .bind(provider_message_id)
        .bind(permalink)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: DraftItemId, error: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE draft_items SET
                state = 'failed', error = $2, claim_token = NULL, updated_at = $3
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn exclude(
        &self,
        id: DraftItemId,
        kind: ExclusionKind,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE draft_items SET
                state = 'excluded', manual_exclude = $2, claim_token = NULL, updated_at = $3
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(id)
        .bind(kind == ExclusionKind::Manual)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_pending(&self, campaign_id: CampaignId) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM draft_items WHERE campaign_id = $1 AND state = 'pending'",
        )
        .bind(campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn counts(&self, campaign_id: CampaignId) -> Result<DraftCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM draft_items WHERE campaign_id = $1 GROUP BY state",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut counts = DraftCounts::default();
        for (state, count) in rows {
            match state.parse::<DraftState>()? {
                DraftState::Pending => counts.pending = count,
                DraftState::Sent => counts.sent = count,
                DraftState::Failed => counts.failed = count,
                DraftState::Excluded => counts.excluded = count,
            }
        }
        Ok(counts)
    }

    async fn find_active_by_address(
        &self,
        campaign_id: CampaignId,
        address: &str,
    ) -> Result<Option<DraftItem>> {
        sqlx::query_as::<_, DraftRow>(
            r#"
            SELECT * FROM draft_items
            WHERE campaign_id = $1 AND recipient_address = $2 AND state <> 'excluded'
            "#,
        )
        .bind(campaign_id)
        .bind(address)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .map(DraftItem::try_from)
        .transpose()
    }

    async fn list(
        &self,
        campaign_id: CampaignId,
        state: Option<DraftState>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DraftItem>> {
        let rows = sqlx::query_as::<_, DraftRow>(
            r#"
            SELECT * FROM draft_items
            WHERE campaign_id = $1 AND ($2::text IS NULL OR state = $2)
            ORDER BY position ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(campaign_id)
        .bind(state.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        into_items(rows)
    }

    async fn release_claims(&self, campaign_id: CampaignId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE draft_items SET claim_token = NULL, claimed_at = NULL
            WHERE campaign_id = $1 AND state = 'pending' AND claim_token IS NOT NULL
            "#,
        )
        .bind(campaign_id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn delete_by_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM draft_items WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
