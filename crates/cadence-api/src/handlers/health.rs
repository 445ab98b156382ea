//! Health check and metrics handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Basic health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Component health status
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Detailed health response with component checks
#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub database: ComponentHealth,
    /// Campaign holding the sending slot
    pub sending_campaign: Option<Uuid>,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Liveness check (is the process running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness check; the memory backend is always ready
pub async fn readiness(State(state): State<Arc<AppState>>) -> Result<StatusCode, StatusCode> {
    if let Some(pool) = &state.db_pool {
        pool.health_check()
            .await
            .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    }

    Ok(StatusCode::OK)
}

/// Detailed health check with all dependencies
pub async fn health_detailed(State(state): State<Arc<AppState>>) -> Json<DetailedHealthResponse> {
    let database = match &state.db_pool {
        None => ComponentHealth {
            status: "in_memory".to_string(),
            latency_ms: None,
            error: None,
        },
        Some(pool) => {
            let start = std::time::Instant::now();
            match pool.health_check().await {
                Ok(_) => ComponentHealth {
                    status: "healthy".to_string(),
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                    error: None,
                },
                Err(e) => ComponentHealth {
                    status: "unhealthy".to_string(),
                    latency_ms: None,
                    error: Some(e.to_string()),
                },
            }
        }
    };

    let sending_campaign = match state.manager.sending_campaign().await {
        Ok(holder) => holder,
        Err(e) => {
            warn!("Failed to look up the sending slot: {}", e);
            None
        }
    };

    let status = if database.status == "unhealthy" {
        "unhealthy"
    } else {
        "healthy"
    };

    Json(DetailedHealthResponse {
        status: status.to_string(),
        database,
        sending_campaign,
    })
}

/// Prometheus exposition
///
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let body = state
        .manager
        .metrics()
        .gather_text()
        .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {}", e)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
