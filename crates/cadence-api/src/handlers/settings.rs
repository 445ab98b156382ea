//! Send settings handlers

use axum::{extract::State, Json};
use cadence_common::SendSettings;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/v1/settings
pub async fn get_settings(State(state): State<Arc<AppState>>) -> ApiResult<Json<SendSettings>> {
    Ok(Json(state.manager.send_settings().await?))
}

/// PUT /api/v1/settings
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<SendSettings>,
) -> ApiResult<Json<SendSettings>> {
    Ok(Json(state.manager.update_send_settings(settings).await?))
}
