//! Axum route handlers for the Triage REST API.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use tracing::warn;

use triage_analytics::ChunkRecord;
use triage_core::{Claim, ClaimType, IncidentStore};
use triage_extraction::ingestion::{ChunkInput, ChunkOutcome};

use crate::error::{ApiErrorResponse, AppError};
use crate::state::AppState;
use crate::types::*;

/// Parse an optional ISO-8601 timestamp from the request body.
fn parse_occurred_at(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| AppError::bad_request(format!("invalid occurred_at: {}", e))),
    }
}

/// Fire-and-forget analytics dispatch with a bounded timeout. A failed or
/// slow write is logged; the request has already been answered.
fn dispatch_analytics(state: &Arc<AppState>, body: &ChunkRequest, outcome: &ChunkOutcome) {
    if !state.sink.is_enabled() {
        return;
    }
    let (Some(incident_id), Some(snapshot)) = (&outcome.incident_id, &outcome.snapshot) else {
        return;
    };
    let record = ChunkRecord {
        incident_id: incident_id.clone(),
        snapshot: snapshot.clone(),
        new_events: outcome.new_events.clone(),
        chunk_preview: body.text.trim().chars().take(200).collect(),
        cluster_score: outcome.cluster_score,
        cluster_new: outcome.cluster_new,
        device_lat: body.device_lat,
        device_lng: body.device_lng,
        caller_id: body.caller_id.clone(),
        ingested_at: Utc::now(),
    };
    let sink = Arc::clone(&state.sink);
    let timeout = Duration::from_secs(state.config.analytics.timeout_secs.max(1));
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, sink.record(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "analytics write failed"),
            Err(_) => warn!("analytics write timed out"),
        }
    });
}

// ---------------------------------------------------------------------------
// Health & Metrics
// ---------------------------------------------------------------------------

/// Health check: server status and the active extractor.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse)
    )
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        extractor: state.orchestrator.extractor_name().into(),
        analytics: state.sink.is_enabled(),
    })
}

/// Server counters and uptime.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Health",
    responses(
        (status = 200, description = "Server metrics", body = MetricsResponse)
    )
)]
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        total_requests: state.total_requests.load(Ordering::Relaxed),
        total_chunks: state.total_chunks.load(Ordering::Relaxed),
        total_skipped: state.total_skipped.load(Ordering::Relaxed),
        incidents: state.orchestrator.store().len(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Ingest one transcript chunk: cluster (optional), extract, merge, snapshot.
#[utoipa::path(
    post,
    path = "/chunk",
    tag = "Chunks",
    request_body = ChunkRequest,
    responses(
        (status = 200, description = "Chunk processed", body = ChunkResponse),
        (status = 400, description = "Empty text or malformed body", body = ApiErrorResponse)
    )
)]
pub async fn chunk_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChunkRequest>,
) -> Result<Json<ChunkResponse>, AppError> {
    state.total_chunks.fetch_add(1, Ordering::Relaxed);

    let occurred_at = parse_occurred_at(body.occurred_at.as_deref())?;
    let input = ChunkInput {
        text: body.text.clone(),
        incident_id: body.incident_id.clone(),
        auto_cluster: body.auto_cluster,
        caller_id: body.caller_id.clone(),
        caller_info: body.caller_info.clone(),
        device_lat: body.device_lat,
        device_lng: body.device_lng,
        occurred_at,
    };
    let outcome = state.orchestrator.ingest(input).await?;
    tracing::debug!(
        extractor = outcome.extractor,
        claims_added = outcome.claims_added,
        skipped = outcome.skipped,
        "chunk handled"
    );

    if outcome.skipped {
        state.total_skipped.fetch_add(1, Ordering::Relaxed);
    } else {
        dispatch_analytics(&state, &body, &outcome);
    }

    Ok(Json(ChunkResponse {
        incident_id: outcome.incident_id,
        summary: outcome.snapshot,
        claims_added: outcome.claims_added,
        cluster_score: outcome.cluster_score,
        cluster_new: outcome.cluster_new,
        skipped: outcome.skipped.then_some(true),
    }))
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

/// Full incident snapshot including the timeline.
#[utoipa::path(
    get,
    path = "/incident/{id}",
    tag = "Incidents",
    params(("id" = String, Path, description = "Incident id")),
    responses(
        (status = 200, description = "Incident snapshot"),
        (status = 404, description = "Incident not found", body = ApiErrorResponse)
    )
)]
pub async fn get_incident_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<triage_core::IncidentSnapshot>, AppError> {
    let snapshot = state.orchestrator.store().snapshot(&id)?;
    Ok(Json(snapshot))
}

/// Timeline only.
#[utoipa::path(
    get,
    path = "/incident/{id}/timeline",
    tag = "Incidents",
    params(("id" = String, Path, description = "Incident id")),
    responses(
        (status = 200, description = "Incident timeline", body = TimelineResponse),
        (status = 404, description = "Incident not found", body = ApiErrorResponse)
    )
)]
pub async fn get_timeline_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TimelineResponse>, AppError> {
    let snapshot = state.orchestrator.store().snapshot(&id)?;
    Ok(Json(TimelineResponse {
        incident_id: id,
        timeline: snapshot.timeline,
    }))
}

/// Known incidents, most recently updated first.
#[utoipa::path(
    get,
    path = "/incidents",
    tag = "Incidents",
    params(("summaries" = Option<bool>, Query, description = "Include full summaries")),
    responses(
        (status = 200, description = "Incident list", body = IncidentListResponse)
    )
)]
pub async fn list_incidents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IncidentListParams>,
) -> Json<IncidentListResponse> {
    let snapshots = state.orchestrator.store().list();
    let incident_ids = snapshots.iter().map(|s| s.incident_id.clone()).collect();
    let incidents = snapshots
        .into_iter()
        .map(|snapshot| IncidentListEntry {
            incident_id: snapshot.incident_id.clone(),
            summary: params.summaries.then_some(snapshot),
        })
        .collect();
    Json(IncidentListResponse {
        incident_ids,
        incidents,
    })
}

// ---------------------------------------------------------------------------
// Demo seeding
// ---------------------------------------------------------------------------

/// Fixed location seed for map demos; creation is deterministic.
const DEMO_LOCATIONS: &[(&str, f64, f64)] = &[
    ("Second floor", 51.5074, -0.1278),
    ("First floor", 51.5080, -0.1285),
    ("Third floor", 51.5068, -0.1272),
    ("Basement", 51.5070, -0.1280),
    ("Roof", 51.5076, -0.1275),
];

/// Confidence assigned to seeded demo locations.
const DEMO_LOCATION_CONFIDENCE: f64 = 0.5;

/// Seed an incident with deterministic demo locations (creates it if
/// missing).
#[utoipa::path(
    post,
    path = "/incident/{id}/demo-locations",
    tag = "Incidents",
    params(("id" = String, Path, description = "Incident id")),
    responses(
        (status = 200, description = "Seeded incident snapshot")
    )
)]
pub async fn demo_locations_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<triage_core::IncidentSnapshot>, AppError> {
    let store: &Arc<IncidentStore> = state.orchestrator.store();
    let now = Utc::now();
    let claims: Vec<Claim> = DEMO_LOCATIONS
        .iter()
        .map(|(value, lat, lng)| {
            Claim::new(
                ClaimType::Location,
                *value,
                DEMO_LOCATION_CONFIDENCE,
                "simulated location seed",
                now,
            )
            .expect("demo confidence in range")
            .with_geo(*lat, *lng)
        })
        .collect();
    let outcome = store.apply(&id, &claims, now);
    Ok(Json(outcome.snapshot))
}
