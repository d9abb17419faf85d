use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        // Job management endpoints
        .route("/api/jobs", post(handlers::jobs::create_job))
        .route("/api/jobs/:id", get(handlers::jobs::get_job))
        .route("/api/jobs/:id", put(handlers::jobs::update_job))
        .route("/api/jobs/:id", delete(handlers::jobs::delete_job))
        .route("/api/jobs/:id/enable", put(handlers::jobs::enable_job))
        .route("/api/jobs/:id/disable", put(handlers::jobs::disable_job))
        .route("/api/jobs/:id/dependents", post(handlers::jobs::add_dependent))
        .route("/api/jobs/:id/runs", get(handlers::jobs::list_runs))
        // Trigger endpoints
        .route("/api/jobs/:id/trigger", post(handlers::triggers::trigger_job))
        .route("/api/hooks/:id", post(handlers::triggers::handle_webhook))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}
