//! JSON request/response types for the Triage REST API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use triage_core::{IncidentSnapshot, TimelineEvent};

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// POST /chunk — request body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChunkRequest {
    /// Raw transcript text of the chunk.
    pub text: String,
    /// Target incident id. Omit with `auto_cluster` to let the engine decide.
    #[serde(default)]
    pub incident_id: Option<String>,
    /// Assign the chunk to the best-matching incident, or open a new one.
    #[serde(default)]
    pub auto_cluster: bool,
    /// Stable id for the voice session; groups chunks from one caller.
    #[serde(default)]
    pub caller_id: Option<String>,
    /// Free-form caller metadata recorded on first contact.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub caller_info: Option<serde_json::Value>,
    /// Device-reported latitude (WGS84).
    #[serde(default)]
    pub device_lat: Option<f64>,
    /// Device-reported longitude (WGS84).
    #[serde(default)]
    pub device_lng: Option<f64>,
    /// ISO-8601 observation time override for backfill.
    #[serde(default)]
    pub occurred_at: Option<String>,
}

/// POST /chunk — response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChunkResponse {
    /// Resolved incident id; absent when the chunk was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    /// Incident summary after the chunk was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub summary: Option<IncidentSnapshot>,
    pub claims_added: usize,
    /// Combined clustering score, when auto-clustering ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_score: Option<f64>,
    /// Whether clustering opened a new incident, when auto-clustering ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_new: Option<bool>,
    /// Set when the chunk carried no incident content and was dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

/// GET /incident/{id}/timeline — response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimelineResponse {
    pub incident_id: String,
    #[schema(value_type = Vec<Object>)]
    pub timeline: Vec<TimelineEvent>,
}

/// One entry of GET /incidents.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IncidentListEntry {
    pub incident_id: String,
    /// Present when `summaries=true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub summary: Option<IncidentSnapshot>,
}

/// GET /incidents — response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IncidentListResponse {
    pub incident_ids: Vec<String>,
    pub incidents: Vec<IncidentListEntry>,
}

/// GET /incidents — query parameters.
#[derive(Debug, Deserialize)]
pub struct IncidentListParams {
    #[serde(default)]
    pub summaries: bool,
}

// ---------------------------------------------------------------------------
// Health & metrics
// ---------------------------------------------------------------------------

/// GET /health — response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Active extractor: "llm" or "deterministic".
    pub extractor: String,
    /// Whether the analytics sink is live.
    pub analytics: bool,
}

/// GET /metrics — response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MetricsResponse {
    pub total_requests: u64,
    pub total_chunks: u64,
    pub total_skipped: u64,
    pub incidents: usize,
    pub uptime_secs: u64,
}
