//! API routes

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{campaigns, drafts, health, send, settings, ticks};
use crate::state::AppState;

/// Create the API router
///
/// An empty `cors_origins` allows any origin.
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let state = Arc::new(state);

    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/detailed", get(health::health_detailed));

    // Campaign routes
    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/stats", get(campaigns::get_campaign_stats))
        .route("/:campaign_id/snapshot", post(campaigns::generate_snapshot))
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/resume", post(campaigns::resume_campaign))
        .route("/:campaign_id/retry", post(campaigns::retry_campaign))
        .route("/:campaign_id/events", get(campaigns::list_events))
        .route("/:campaign_id/runs", get(campaigns::list_runs))
        .route("/:campaign_id/drafts", get(drafts::list_drafts))
        .route("/:campaign_id/drafts/include", post(drafts::include_contact))
        .route(
            "/:campaign_id/drafts/:draft_id/exclude",
            post(drafts::exclude_draft),
        );

    let api_v1 = Router::new()
        .nest("/campaigns", campaign_routes)
        .route("/test-send", post(send::test_send))
        .route("/ticks", post(ticks::run_tick))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_settings),
        );

    Router::new()
        .nest("/health", health_routes)
        .route("/metrics", get(health::metrics))
        .nest("/api/v1", api_v1)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
