//! OpenAPI specification generation for the Triage REST API.
//!
//! Uses utoipa to generate the spec from annotated handlers and types.
//! Served at `/openapi.json`, with Swagger UI at `/swagger-ui`.

use utoipa::OpenApi;

use crate::error::ApiErrorResponse;
use crate::handlers;
use crate::types::*;

/// OpenAPI specification for the Triage REST API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Triage API",
        description = "Incident-evidence engine — ingest emergency-call transcript chunks and \
                       maintain uncertainty-aware incident summaries with evidence-weighted \
                       claims, Bayesian confidence accumulation, and multi-signal clustering.",
        version = "0.1.0",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:8460", description = "Local development server")
    ),
    tags(
        (name = "Health", description = "Server health and metrics"),
        (name = "Chunks", description = "Transcript chunk ingestion — extraction, clustering, and merge"),
        (name = "Incidents", description = "Incident snapshots, timelines, and listing")
    ),
    paths(
        handlers::health_handler,
        handlers::metrics_handler,
        handlers::chunk_handler,
        handlers::get_incident_handler,
        handlers::get_timeline_handler,
        handlers::list_incidents_handler,
        handlers::demo_locations_handler,
    ),
    components(schemas(
        ApiErrorResponse,
        ChunkRequest,
        ChunkResponse,
        TimelineResponse,
        IncidentListEntry,
        IncidentListResponse,
        HealthResponse,
        MetricsResponse,
    ))
)]
pub struct ApiDoc;
