/// API Routes definition

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::core::Orchestrator;

pub fn create_router(orchestrator: Orchestrator, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/targets", get(handlers::list_targets).post(handlers::add_target))
        .route(
            "/api/targets/:id",
            get(handlers::get_target).delete(handlers::remove_target),
        )
        .route("/api/targets/:id/backup", post(handlers::run_backup))
        .route("/api/runs", get(handlers::list_runs));

    // Endpoints of the original flat-file service
    let legacy_routes = Router::new()
        .route("/adddb", post(handlers::legacy_add_db))
        .route("/getdb", get(handlers::legacy_get_db))
        .route("/backup", post(handlers::legacy_backup));

    let mut app = Router::new()
        .merge(api_routes)
        .merge(legacy_routes)
        .with_state(orchestrator)
        // Add tracing middleware
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}
