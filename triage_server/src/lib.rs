//! # Triage Server
//!
//! REST API for the Triage incident engine.
//!
//! Provides:
//! - `POST /chunk` — ingest a transcript chunk (optional auto-clustering)
//! - `GET /incident/{id}` and `GET /incident/{id}/timeline` — snapshots
//! - `GET /incidents` — listing, most recently updated first
//! - `GET /health`, `GET /metrics` — operational surface
//! - Swagger UI at `/swagger-ui`, spec at `/openapi.json`
//!
//! Middleware: CORS, request tracing, a request counter. Remote-service
//! failures degrade inside the pipeline; the API returns errors only for
//! invalid input (400) and unknown incidents (404).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use state::AppState;

/// Middleware that increments the global request counter.
async fn request_counter_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    state.total_requests.fetch_add(1, Ordering::Relaxed);
    next.run(request).await
}

/// Build the full application router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/chunk", post(handlers::chunk_handler))
        .route("/incident/{id}", get(handlers::get_incident_handler))
        .route(
            "/incident/{id}/timeline",
            get(handlers::get_timeline_handler),
        )
        .route(
            "/incident/{id}/demo-locations",
            post(handlers::demo_locations_handler),
        )
        .route("/incidents", get(handlers::list_incidents_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", openapi::ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_counter_middleware,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}
