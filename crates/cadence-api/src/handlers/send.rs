//! Manual test sends

use axum::{extract::State, Json};
use cadence_core::campaign::TestSendRequest;
use cadence_storage::SendEvent;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::state::AppState;

/// Send one rendered message now, outside any run and the rate gate
///
/// POST /api/v1/test-send
///
/// A transport failure is not an HTTP error: the returned event carries
/// the `failed` outcome and the error text.
pub async fn test_send(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TestSendRequest>,
) -> ApiResult<Json<SendEvent>> {
    Ok(Json(state.manager.send_test(req).await?))
}
