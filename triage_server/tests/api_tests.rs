//! Integration tests for the Triage REST API.
//!
//! Uses the deterministic rule extractor plus stub embedder/judge
//! implementations (no network) and drives handlers via tower::ServiceExt —
//! no TCP listener needed.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use triage_analytics::NoopSink;
use triage_config::TriageConfig;
use triage_core::IncidentStore;
use triage_extraction::clustering::{ClusterEngine, ClusterOptions};
use triage_extraction::ingestion::IngestOrchestrator;
use triage_extraction::rules::RuleExtractor;
use triage_extraction::{Embedder, SameIncidentJudge};
use triage_server::state::AppState;

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

/// Deterministic stub embedder: the vector depends only on which topic words
/// appear, so identical inputs embed identically across runs.
struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let topics = ["fire", "smoke", "flood", "gunshot", "medical", "floor", "wing"];
        let mut v: Vec<f32> = topics
            .iter()
            .map(|t| if lower.contains(t) { 1.0 } else { 0.0 })
            .collect();
        v.push(1.0);
        Ok(v)
    }
}

struct StubJudge(f64);

#[async_trait]
impl SameIncidentJudge for StubJudge {
    async fn same_incident_score(&self, _: &str, _: &str) -> anyhow::Result<f64> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn app_with(
    embedder: Option<Arc<dyn Embedder>>,
    judge: Option<Arc<dyn SameIncidentJudge>>,
) -> Router {
    let store = Arc::new(IncidentStore::default());
    let cluster = Arc::new(ClusterEngine::new(embedder, judge, ClusterOptions::default()));
    let orchestrator =
        IngestOrchestrator::new(store, Arc::new(RuleExtractor::default()), cluster);
    let state = Arc::new(AppState::new(
        orchestrator,
        Arc::new(NoopSink),
        TriageConfig::default(),
    ));
    triage_server::build_router(state)
}

fn app() -> Router {
    app_with(None, None)
}

async fn request_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json_body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn post_chunk(app: &Router, body: Value) -> (StatusCode, Value) {
    request_json(app, "POST", "/chunk", Some(body)).await
}

// ---------------------------------------------------------------------------
// Health & errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_reports_extractor() {
    let app = app();
    let (status, body) = request_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["extractor"], "deterministic");
    assert_eq!(body["analytics"], false);
}

#[tokio::test]
async fn test_empty_text_rejected() {
    let app = app();
    let (status, body) = post_chunk(&app, json!({"text": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/chunk")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_occurred_at_rejected() {
    let app = app();
    let (status, _) = post_chunk(
        &app,
        json!({"text": "fire", "occurred_at": "yesterday-ish"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_incident_404() {
    let app = app();
    let (status, body) = request_json(&app, "GET", "/incident/incident-nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    let (status, _) =
        request_json(&app, "GET", "/incident/incident-nope/timeline", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Evidence accumulation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fire_repetition_raises_confidence() {
    let app = app();
    let (status, body) = post_chunk(
        &app,
        json!({
            "text": "There's a fire on the third floor.",
            "incident_id": "incident-1",
            "occurred_at": "2025-06-01T12:00:00Z"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let t = &body["summary"]["incident_type"];
    assert_eq!(t["value"], "fire");
    assert!((t["confidence"].as_f64().unwrap() - 0.7).abs() < 1e-9);

    let (_, body) = post_chunk(
        &app,
        json!({
            "text": "Fire is spreading.",
            "incident_id": "incident-1",
            "occurred_at": "2025-06-01T12:00:30Z"
        }),
    )
    .await;
    let confidence = body["summary"]["incident_type"]["confidence"].as_f64().unwrap();
    // 1 − (1 − 0.7)² = 0.91, give or take the repeated-mention boost.
    assert!(
        (confidence - 0.91).abs() <= 0.02,
        "confidence {} outside 0.91 ± 0.02",
        confidence
    );
}

#[tokio::test]
async fn test_people_estimates_keep_distinct_canonical_values() {
    let app = app();
    post_chunk(
        &app,
        json!({
            "text": "several people trapped",
            "incident_id": "incident-1",
            "occurred_at": "2025-06-01T12:00:00Z"
        }),
    )
    .await;
    let (_, body) = post_chunk(
        &app,
        json!({
            "text": "multiple people trapped",
            "incident_id": "incident-1",
            "occurred_at": "2025-06-01T12:00:40Z"
        }),
    )
    .await;
    // "several" → 3 arrived first and keeps the display slot; "multiple" → 2
    // is a different canonical value without the margin to displace it.
    assert_eq!(body["summary"]["people_estimate"]["value"], 3.0);
    let timeline = body["summary"]["timeline"].as_array().unwrap();
    let people_events: Vec<_> = timeline
        .iter()
        .filter(|e| e["claim_type"] == "people_estimate")
        .collect();
    assert_eq!(people_events.len(), 2);
}

#[tokio::test]
async fn test_timeline_endpoint_returns_audit_trail() {
    let app = app();
    post_chunk(
        &app,
        json!({
            "text": "fire on the third floor, smoke everywhere",
            "incident_id": "incident-1",
            "caller_id": "caller-7",
            "caller_info": {"started_at": "2025-06-01T12:00:00Z"}
        }),
    )
    .await;
    let (status, body) = request_json(&app, "GET", "/incident/incident-1/timeline", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["incident_id"], "incident-1");
    let timeline = body["timeline"].as_array().unwrap();
    assert!(!timeline.is_empty());
    assert!(timeline.iter().all(|e| e["caller_id"] == "caller-7"));

    let (_, body) = request_json(&app, "GET", "/incident/incident-1", None).await;
    assert_eq!(body["callers"]["caller-7"]["started_at"], "2025-06-01T12:00:00Z");
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_auto_cluster_same_geo_groups_reports() {
    let app = app_with(Some(Arc::new(StubEmbedder)), Some(Arc::new(StubJudge(0.8))));
    let (_, first) = post_chunk(
        &app,
        json!({
            "text": "fire third floor",
            "auto_cluster": true,
            "device_lat": 51.5074,
            "device_lng": -0.1278,
            "occurred_at": "2025-06-01T12:00:00Z"
        }),
    )
    .await;
    assert_eq!(first["cluster_new"], true);
    let first_id = first["incident_id"].as_str().unwrap().to_string();

    let (_, second) = post_chunk(
        &app,
        json!({
            "text": "smoke in east wing",
            "auto_cluster": true,
            "device_lat": 51.5074,
            "device_lng": -0.1278,
            "occurred_at": "2025-06-01T12:01:00Z"
        }),
    )
    .await;
    assert_eq!(second["cluster_new"], false);
    assert_eq!(second["incident_id"], first_id.as_str());
    assert!(second["cluster_score"].as_f64().unwrap() >= 0.65);
}

#[tokio::test]
async fn test_auto_cluster_distant_geo_opens_new_incident() {
    let app = app();
    let (_, first) = post_chunk(
        &app,
        json!({
            "text": "fire third floor",
            "auto_cluster": true,
            "device_lat": 51.50,
            "device_lng": -0.12,
            "occurred_at": "2025-06-01T12:00:00Z"
        }),
    )
    .await;
    let first_id = first["incident_id"].as_str().unwrap().to_string();

    let (_, second) = post_chunk(
        &app,
        json!({
            "text": "fire third floor",
            "auto_cluster": true,
            "device_lat": 40.71,
            "device_lng": -74.00,
            "occurred_at": "2025-06-01T12:01:00Z"
        }),
    )
    .await;
    assert_eq!(second["cluster_new"], true);
    assert!(second["cluster_score"].as_f64().unwrap() < 0.65);
    assert_ne!(second["incident_id"], first_id.as_str());
}

#[tokio::test]
async fn test_empty_chatter_skipped() {
    let app = app();
    let (status, body) = post_chunk(
        &app,
        json!({"text": "Hello, can you hear me?", "auto_cluster": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], true);
    assert!(body.get("incident_id").is_none());
    // Nothing was created.
    let (_, list) = request_json(&app, "GET", "/incidents", None).await;
    assert!(list["incident_ids"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Listing, seeding, metrics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_list_incidents_most_recent_first() {
    let app = app();
    post_chunk(
        &app,
        json!({
            "text": "flood in the basement",
            "incident_id": "incident-a",
            "occurred_at": "2025-06-01T11:00:00Z"
        }),
    )
    .await;
    post_chunk(
        &app,
        json!({
            "text": "gas leak at the depot",
            "incident_id": "incident-b",
            "occurred_at": "2025-06-01T12:00:00Z"
        }),
    )
    .await;

    let (_, body) = request_json(&app, "GET", "/incidents", None).await;
    let ids = body["incident_ids"].as_array().unwrap();
    assert_eq!(ids[0], "incident-b");
    assert_eq!(ids[1], "incident-a");
    // Bare listing carries no summaries.
    assert!(body["incidents"][0].get("summary").is_none());

    let (_, body) = request_json(&app, "GET", "/incidents?summaries=true", None).await;
    assert_eq!(
        body["incidents"][0]["summary"]["incident_type"]["value"],
        "gas leak"
    );
}

#[tokio::test]
async fn test_demo_locations_seed() {
    let app = app();
    let (status, body) =
        request_json(&app, "POST", "/incident/incident-demo/demo-locations", None).await;
    assert_eq!(status, StatusCode::OK);
    let locations = body["locations"].as_array().unwrap();
    assert_eq!(locations.len(), 5);
    assert!(locations.iter().all(|l| l["lat"].is_f64() && l["lng"].is_f64()));
    // Seeding twice stays idempotent on the location set.
    let (_, body) =
        request_json(&app, "POST", "/incident/incident-demo/demo-locations", None).await;
    assert_eq!(body["locations"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_metrics_counters() {
    let app = app();
    post_chunk(&app, json!({"text": "fire", "incident_id": "incident-1"})).await;
    let (_, body) = request_json(&app, "GET", "/metrics", None).await;
    assert!(body["total_requests"].as_u64().unwrap() >= 1);
    assert_eq!(body["total_chunks"], 1);
    assert_eq!(body["incidents"], 1);
}
