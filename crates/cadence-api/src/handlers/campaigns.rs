//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use cadence_core::campaign::{CampaignStats, SnapshotReport};
use cadence_storage::{Campaign, CampaignStatus, CreateCampaign, SendEvent, SendRun};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<CampaignStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub(crate) fn default_limit() -> i64 {
    50
}

/// Campaign list response
#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub data: Vec<Campaign>,
    pub limit: i64,
    pub offset: i64,
}

/// Body for operations that can be forced
#[derive(Debug, Default, Deserialize)]
pub struct ForceRequest {
    #[serde(default, alias = "forceRetry")]
    pub force: bool,
}

/// Response for operations that open a send run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub campaign_id: Uuid,
    pub send_run_id: Uuid,
}

/// Query parameters for paged listings
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn force_of(body: Option<Json<ForceRequest>>) -> bool {
    body.map(|Json(b)| b.force).unwrap_or_default()
}

/// List campaigns
///
/// GET /api/v1/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCampaignsQuery>,
) -> ApiResult<Json<CampaignListResponse>> {
    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);
    let data = state.manager.list(query.status, limit, offset).await?;

    Ok(Json(CampaignListResponse {
        data,
        limit,
        offset,
    }))
}

/// Create a new campaign in `draft`
///
/// POST /api/v1/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateCampaign>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.manager.create(input).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// GET /api/v1/campaigns/:id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.manager.get(id).await?))
}

/// GET /api/v1/campaigns/:id/stats
pub async fn get_campaign_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CampaignStats>> {
    Ok(Json(state.manager.stats(id).await?))
}

/// Generate the recipient snapshot
///
/// POST /api/v1/campaigns/:id/snapshot
pub async fn generate_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<ForceRequest>>,
) -> ApiResult<Json<SnapshotReport>> {
    let report = state.manager.generate_snapshot(id, force_of(body)).await?;
    Ok(Json(report))
}

/// POST /api/v1/campaigns/:id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunResponse>> {
    let send_run_id = state.manager.start(id).await?;
    Ok(Json(RunResponse {
        campaign_id: id,
        send_run_id,
    }))
}

/// POST /api/v1/campaigns/:id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.manager.pause(id).await?))
}

/// POST /api/v1/campaigns/:id/resume
pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunResponse>> {
    let send_run_id = state.manager.resume(id).await?;
    Ok(Json(RunResponse {
        campaign_id: id,
        send_run_id,
    }))
}

/// Restart a stuck or failed campaign under a new run
///
/// POST /api/v1/campaigns/:id/retry
pub async fn retry_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<ForceRequest>>,
) -> ApiResult<Json<RunResponse>> {
    let send_run_id = state.manager.retry_stuck(id, force_of(body)).await?;
    Ok(Json(RunResponse {
        campaign_id: id,
        send_run_id,
    }))
}

/// GET /api/v1/campaigns/:id/events
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<SendEvent>>> {
    let events = state
        .manager
        .list_events(id, query.limit.clamp(1, 500), query.offset.max(0))
        .await?;
    Ok(Json(events))
}

/// GET /api/v1/campaigns/:id/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<SendRun>>> {
    Ok(Json(state.manager.runs(id).await?))
}
