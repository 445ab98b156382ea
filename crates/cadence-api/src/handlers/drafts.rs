//! Draft handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use cadence_storage::{DraftItem, DraftState};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::campaigns::default_limit;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListDraftsQuery {
    pub state: Option<DraftState>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct IncludeContactRequest {
    pub contact_id: Uuid,
}

/// GET /api/v1/campaigns/:id/drafts
pub async fn list_drafts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListDraftsQuery>,
) -> ApiResult<Json<Vec<DraftItem>>> {
    let drafts = state
        .manager
        .list_drafts(id, query.state, query.limit.clamp(1, 500), query.offset.max(0))
        .await?;
    Ok(Json(drafts))
}

/// POST /api/v1/campaigns/:id/drafts/:draft_id/exclude
pub async fn exclude_draft(
    State(state): State<Arc<AppState>>,
    Path((id, draft_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DraftItem>> {
    Ok(Json(state.manager.exclude_draft(id, draft_id).await?))
}

/// Add a contact the snapshot left out
///
/// POST /api/v1/campaigns/:id/drafts/include
pub async fn include_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<IncludeContactRequest>,
) -> ApiResult<(StatusCode, Json<DraftItem>)> {
    let draft = state.manager.include_contact(id, req.contact_id).await?;
    Ok((StatusCode::CREATED, Json(draft)))
}
