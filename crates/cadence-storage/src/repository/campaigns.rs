//! Campaign repository

use async_trait::async_trait;
use cadence_common::types::{CampaignId, SendRunId};
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::DatabasePool;
use crate::models::{
    Campaign, CampaignStatus, CreateCampaign, LockChange, RecipientFilter, StatusTransition,
    TickHeartbeat, TransitionOutcome,
};

/// Advisory lock key serializing exclusive slot acquisition
const SLOT_LOCK_KEY: i64 = 0x6361_6465_6e63_6501;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>>;
    /// Atomically apply `change` if its preconditions hold
    async fn transition(&self, id: CampaignId, change: StatusTransition)
        -> Result<TransitionOutcome>;
    /// Update tick bookkeeping while `run_id` is still the current run
    async fn record_tick(
        &self,
        id: CampaignId,
        run_id: SendRunId,
        heartbeat: TickHeartbeat,
    ) -> Result<bool>;
    /// Campaign currently holding a sending slot, if any
    async fn lock_holder(&self) -> Result<Option<CampaignId>>;
}

#[derive(FromRow)]
struct CampaignRow {
    id: Uuid,
    name: String,
    template_ref: Option<String>,
    subject_template: String,
    html_template: Option<String>,
    text_template: Option<String>,
    filter: Json<RecipientFilter>,
    sender_alias: Option<String>,
    sender_name: Option<String>,
    signature: Option<String>,
    status: String,
    active_lock: bool,
    current_run_id: Option<Uuid>,
    last_tick_at: Option<DateTime<Utc>>,
    next_tick_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = Error;

    fn try_from(row: CampaignRow) -> Result<Self> {
        Ok(Campaign {
            id: row.id,
            name: row.name,
            template_ref: row.template_ref,
            subject_template: row.subject_template,
            html_template: row.html_template,
            text_template: row.text_template,
            filter: row.filter.0,
            sender_alias: row.sender_alias,
            sender_name: row.sender_name,
            signature: row.signature,
            status: row.status.parse()?,
            active_lock: row.active_lock,
            current_run_id: row.current_run_id,
            last_tick_at: row.last_tick_at,
            next_tick_at: row.next_tick_at,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            INSERT INTO campaigns (
                id, name, template_ref, subject_template, html_template, text_template,
                filter, sender_alias, sender_name, signature, status, active_lock,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'draft', FALSE, $11, $11)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.template_ref)
        .bind(&input.subject_template)
        .bind(&input.html_template)
        .bind(&input.text_template)
        .bind(Json(&input.filter))
        .bind(&input.sender_alias)
        .bind(&input.sender_name)
        .bind(&input.signature)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.try_into()
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .map(Campaign::try_from)
            .transpose()
    }

    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT * FROM campaigns
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.into_iter().map(Campaign::try_from).collect()
    }

    async fn transition(
        &self,
        id: CampaignId,
        change: StatusTransition,
    ) -> Result<TransitionOutcome> {
        let (mode, run_id, exclusive) = match change.lock {
            LockChange::Keep => ("keep", None, false),
            LockChange::Acquire { run_id, exclusive } => ("acquire", Some(run_id), exclusive),
            LockChange::Release => ("release", None, false),
        };
        let from: Vec<String> = change.from.iter().map(|s| s.as_str().to_string()).collect();

        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if exclusive {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(SLOT_LOCK_KEY)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
        }

        let updated = sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE campaigns SET
                status = $2,
                active_lock = CASE $3 WHEN 'acquire' THEN TRUE WHEN 'release' THEN FALSE ELSE active_lock END,
                current_run_id = CASE $3 WHEN 'acquire' THEN $4 WHEN 'release' THEN NULL ELSE current_run_id END,
                next_tick_at = CASE $3 WHEN 'acquire' THEN $5 WHEN 'release' THEN NULL ELSE next_tick_at END,
                failure_reason = $6,
                started_at = CASE WHEN $2 = 'sending' THEN COALESCE(started_at, $5) ELSE started_at END,
                completed_at = CASE WHEN $2 = 'completed' THEN $5 ELSE completed_at END,
                updated_at = $5
            WHERE id = $1
              AND status = ANY($7)
              AND ($8::uuid IS NULL OR current_run_id = $8)
              AND (NOT $9 OR NOT EXISTS (
                    SELECT 1 FROM campaigns other WHERE other.active_lock AND other.id <> $1
              ))
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(change.to.as_str())
        .bind(mode)
        .bind(run_id)
        .bind(change.at)
        .bind(&change.failure_reason)
        .bind(&from)
        .bind(change.expected_run)
        .bind(exclusive)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let outcome = match updated {
            Some(row) => TransitionOutcome::Applied(row.try_into()?),
            None => {
                let current = sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaigns WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| Error::Database(e.to_string()))?;
                match current {
                    None => TransitionOutcome::Missing,
                    Some(row) => {
                        let campaign = Campaign::try_from(row)?;
                        let holder = if exclusive && change.admits(&campaign) {
                            sqlx::query_scalar::<_, Uuid>(
                                "SELECT id FROM campaigns WHERE active_lock AND id <> $1 LIMIT 1",
                            )
                            .bind(id)
                            .fetch_optional(&mut *tx)
                            .await
                            .map_err(|e| Error::Database(e.to_string()))?
                        } else {
                            None
                        };
                        match holder {
                            Some(holder) => TransitionOutcome::SlotBusy { holder },
                            None => TransitionOutcome::Conflict(campaign),
                        }
                    }
                }
            }
        };

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(outcome)
    }

    async fn record_tick(
        &self,
        id: CampaignId,
        run_id: SendRunId,
        heartbeat: TickHeartbeat,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                last_tick_at = COALESCE($3, last_tick_at),
                next_tick_at = COALESCE($4, next_tick_at)
            WHERE id = $1 AND current_run_id = $2 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(run_id)
        .bind(heartbeat.last_tick_at)
        .bind(heartbeat.next_tick_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn lock_holder(&self) -> Result<Option<CampaignId>> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM campaigns WHERE active_lock LIMIT 1")
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
