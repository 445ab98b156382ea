//! Tick delivery from external dispatchers

use axum::{extract::State, Json};
use cadence_core::{TickOutcome, TickRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiResult;
use crate::state::AppState;

/// Result of one tick
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TickResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<TickOutcome> for TickResponse {
    fn from(outcome: TickOutcome) -> Self {
        let mut response = TickResponse {
            outcome: outcome.as_str().to_string(),
            sent: None,
            failed: None,
            next_at: None,
            reason: None,
        };
        match outcome {
            TickOutcome::Stale => {}
            TickOutcome::Superseded { sent, failed } | TickOutcome::Completed { sent, failed } => {
                response.sent = Some(sent);
                response.failed = Some(failed);
            }
            TickOutcome::Rescheduled {
                next_at,
                sent,
                failed,
            } => {
                response.sent = Some(sent);
                response.failed = Some(failed);
                response.next_at = Some(next_at);
            }
            TickOutcome::Failed { reason } => response.reason = Some(reason),
            TickOutcome::RescheduleFailed { error } => response.reason = Some(error),
        }
        response
    }
}

/// Run one tick; safe to deliver more than once
///
/// POST /api/v1/ticks
pub async fn run_tick(
    State(state): State<Arc<AppState>>,
    Json(tick): Json<TickRequest>,
) -> ApiResult<Json<TickResponse>> {
    let outcome = state.dispatcher.dispatch(tick).await?;
    debug!(
        "External tick for campaign {} run {}: {}",
        tick.campaign_id,
        tick.send_run_id,
        outcome.as_str()
    );
    Ok(Json(outcome.into()))
}
