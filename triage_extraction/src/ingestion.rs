//! Ingest orchestrator: one transcript chunk in, incident state out.
//!
//! The pipeline for a chunk:
//! 1. Validate the text is non-empty
//! 2. Auto-cluster (when requested and no incident id was supplied)
//! 3. Extract claims (LLM or rules, per configuration)
//! 4. Skip empty chatter that would have opened a new incident
//! 5. Synthesize a device-location claim from reported coordinates
//! 6. Apply the batch under the incident lock; snapshot
//!
//! Lock discipline: the store registry is snapshotted before any remote
//! call, no incident lock is held across an await, and the apply step
//! re-resolves the incident — a candidate deleted between decision and
//! apply is recreated rather than failing the chunk.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use triage_core::{
    Claim, ClaimType, EngineError, IncidentId, IncidentSnapshot, IncidentStore, TimelineEvent,
};

use crate::clustering::{report_summary_text, ClusterEngine};
use crate::Extractor;

/// Confidence assigned to device-reported coordinates.
const DEVICE_LOCATION_CONFIDENCE: f64 = 0.95;

/// One transcript chunk plus its routing metadata.
#[derive(Debug, Clone, Default)]
pub struct ChunkInput {
    pub text: String,
    /// Target incident; `None` with `auto_cluster` lets the engine decide.
    pub incident_id: Option<String>,
    pub auto_cluster: bool,
    pub caller_id: Option<String>,
    pub caller_info: Option<serde_json::Value>,
    pub device_lat: Option<f64>,
    pub device_lng: Option<f64>,
    /// Observation time override for backfill; defaults to now.
    pub occurred_at: Option<DateTime<Utc>>,
}

/// What happened to a chunk.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    /// Resolved incident, absent when the chunk was skipped.
    pub incident_id: Option<IncidentId>,
    pub snapshot: Option<IncidentSnapshot>,
    pub claims_added: usize,
    /// Combined match score, when clustering ran.
    pub cluster_score: Option<f64>,
    /// Whether clustering opened a new incident, when clustering ran.
    pub cluster_new: Option<bool>,
    /// Empty chatter: no incident created, no timeline update.
    pub skipped: bool,
    /// Events appended by this chunk (forwarded to the analytics sink).
    pub new_events: Vec<TimelineEvent>,
    /// Which extractor produced the claims.
    pub extractor: &'static str,
}

/// Coordinates the extractor, the clustering engine, and the store.
pub struct IngestOrchestrator {
    store: Arc<IncidentStore>,
    extractor: Arc<dyn Extractor>,
    cluster: Arc<ClusterEngine>,
}

impl IngestOrchestrator {
    pub fn new(
        store: Arc<IncidentStore>,
        extractor: Arc<dyn Extractor>,
        cluster: Arc<ClusterEngine>,
    ) -> Self {
        Self {
            store,
            extractor,
            cluster,
        }
    }

    pub fn store(&self) -> &Arc<IncidentStore> {
        &self.store
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Process one chunk end to end.
    pub async fn ingest(&self, input: ChunkInput) -> Result<ChunkOutcome, EngineError> {
        let text = input.text.trim().to_string();
        if text.is_empty() {
            return Err(EngineError::InvalidInput(
                "text is required and cannot be empty".into(),
            ));
        }
        let now = input.occurred_at.unwrap_or_else(Utc::now);
        let device_geo = match (input.device_lat, input.device_lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        };

        // Clustering decision first: it reads a registry snapshot and may
        // call remote services, so no incident lock is involved yet.
        let mut cluster_score = None;
        let mut cluster_new = None;
        let mut resolved_id = input.incident_id.clone();
        if input.auto_cluster && resolved_id.is_none() {
            let candidates = self.store.entries();
            let report = report_summary_text(&text, device_geo);
            let assignment = self.cluster.assign(&report, now, device_geo, &candidates).await;
            cluster_score = Some(assignment.score);
            cluster_new = Some(assignment.is_new());
            match &assignment.incident_id {
                Some(id) => {
                    info!(incident_id = %id, score = assignment.score, "cluster assigned");
                    resolved_id = Some(id.clone());
                }
                None => {
                    debug!(score = assignment.score, "cluster decided new incident");
                }
            }
        }

        // Extraction: context is the target incident's current summary, when
        // one already exists.
        let context = resolved_id
            .as_deref()
            .and_then(|id| self.store.snapshot(id).ok());
        let mut claims = self.extractor.extract(&text, now, context.as_ref()).await;

        // Empty-chatter guard: a chunk with no incident content must not
        // open a fresh incident.
        if cluster_new == Some(true)
            && !claims
                .iter()
                .any(|c| c.claim_type.is_incident_content())
        {
            info!("chunk skipped: no incident content");
            return Ok(ChunkOutcome {
                incident_id: None,
                snapshot: None,
                claims_added: 0,
                cluster_score,
                cluster_new,
                skipped: true,
                new_events: Vec::new(),
                extractor: self.extractor.name(),
            });
        }

        if let Some((lat, lng)) = device_geo {
            let device_claim = Claim::new(
                ClaimType::DeviceLocation,
                "Device",
                DEVICE_LOCATION_CONFIDENCE,
                "device-reported coordinates",
                now,
            )
            .expect("device confidence in range")
            .with_geo(lat, lng);
            claims.push(device_claim);
        }

        for claim in &mut claims {
            if input.caller_id.is_some() || input.caller_info.is_some() {
                claim.caller_id = input.caller_id.clone();
                claim.caller_info = input.caller_info.clone();
            }
        }

        // Resolve the incident (created here when clustering said "new" or
        // the supplied id is unknown) and apply under its lock. `apply`
        // re-resolves by id, tolerating deletion races.
        let incident_id = match resolved_id {
            Some(id) => id,
            None => self.store.create(None).0,
        };
        let outcome = self.store.apply(&incident_id, &claims, now);
        info!(
            incident_id = %incident_id,
            claims_added = outcome.claims_added,
            timeline_len = outcome.snapshot.timeline_count,
            "chunk applied"
        );

        Ok(ChunkOutcome {
            incident_id: Some(incident_id),
            snapshot: Some(outcome.snapshot),
            claims_added: outcome.claims_added,
            cluster_score,
            cluster_new,
            skipped: false,
            new_events: outcome.new_events,
            extractor: self.extractor.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::ClusterOptions;
    use crate::rules::RuleExtractor;

    fn orchestrator() -> IngestOrchestrator {
        IngestOrchestrator::new(
            Arc::new(IncidentStore::default()),
            Arc::new(RuleExtractor::default()),
            Arc::new(ClusterEngine::new(None, None, ClusterOptions::default())),
        )
    }

    fn chunk(text: &str) -> ChunkInput {
        ChunkInput {
            text: text.to_string(),
            ..ChunkInput::default()
        }
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let orch = orchestrator();
        let err = orch.ingest(chunk("   ")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_explicit_incident_id_creates_and_applies() {
        let orch = orchestrator();
        let mut input = chunk("There's a fire on the third floor.");
        input.incident_id = Some("incident-42".into());
        let outcome = orch.ingest(input).await.unwrap();
        assert_eq!(outcome.incident_id.as_deref(), Some("incident-42"));
        assert!(outcome.claims_added >= 2);
        assert!(!outcome.skipped);
        assert!(outcome.cluster_score.is_none());
        let snapshot = outcome.snapshot.unwrap();
        assert_eq!(snapshot.incident_type.unwrap().value.to_string(), "fire");
    }

    #[tokio::test]
    async fn test_missing_id_gets_fresh_incident() {
        let orch = orchestrator();
        let outcome = orch.ingest(chunk("gas leak in the basement")).await.unwrap();
        let id = outcome.incident_id.unwrap();
        assert!(id.starts_with("incident-"));
        assert!(orch.store().get(&id).is_some());
    }

    #[tokio::test]
    async fn test_auto_cluster_empty_chatter_skipped() {
        let orch = orchestrator();
        let mut input = chunk("Hello, can you hear me?");
        input.auto_cluster = true;
        let outcome = orch.ingest(input).await.unwrap();
        assert!(outcome.skipped);
        assert!(outcome.incident_id.is_none());
        assert_eq!(outcome.cluster_new, Some(true));
        assert!(orch.store().is_empty());
    }

    #[tokio::test]
    async fn test_chatter_to_existing_incident_not_skipped() {
        let orch = orchestrator();
        let mut first = chunk("fire on the second floor");
        first.incident_id = Some("incident-a".into());
        orch.ingest(first).await.unwrap();

        // Explicit id: the guard only applies to would-be-new incidents.
        let mut followup = chunk("okay, stay calm");
        followup.incident_id = Some("incident-a".into());
        let outcome = orch.ingest(followup).await.unwrap();
        assert!(!outcome.skipped);
        assert_eq!(outcome.claims_added, 0);
    }

    #[tokio::test]
    async fn test_device_coordinates_become_claim() {
        let orch = orchestrator();
        let mut input = chunk("fire on the third floor");
        input.device_lat = Some(51.5074);
        input.device_lng = Some(-0.1278);
        input.caller_id = Some("caller-1".into());
        let outcome = orch.ingest(input).await.unwrap();
        let snapshot = outcome.snapshot.unwrap();
        let device = snapshot.device_location.unwrap();
        assert!((device.confidence - 0.95).abs() < 1e-9);
        assert_eq!(device.coordinates(), Some((51.5074, -0.1278)));
        assert!(snapshot.callers.contains_key("caller-1"));
    }

    #[tokio::test]
    async fn test_auto_cluster_groups_same_place_reports() {
        let orch = orchestrator();
        let geo = (51.5074, -0.1278);
        let mut first = chunk("fire third floor");
        first.auto_cluster = true;
        first.device_lat = Some(geo.0);
        first.device_lng = Some(geo.1);
        let first_outcome = orch.ingest(first).await.unwrap();
        assert_eq!(first_outcome.cluster_new, Some(true));
        let first_id = first_outcome.incident_id.unwrap();

        // Same coordinates a minute later: time 1.0, geo 1.0, no
        // embedder/judge configured → combined 1.0 ≥ threshold.
        let mut second = chunk("smoke in east wing");
        second.auto_cluster = true;
        second.device_lat = Some(geo.0);
        second.device_lng = Some(geo.1);
        let second_outcome = orch.ingest(second).await.unwrap();
        assert_eq!(second_outcome.cluster_new, Some(false));
        assert_eq!(second_outcome.incident_id.as_deref(), Some(first_id.as_str()));
        assert!(second_outcome.cluster_score.unwrap() >= 0.65);
        assert_eq!(orch.store().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_cluster_distant_report_opens_new() {
        let orch = orchestrator();
        let mut first = chunk("fire third floor");
        first.auto_cluster = true;
        first.device_lat = Some(51.50);
        first.device_lng = Some(-0.12);
        orch.ingest(first).await.unwrap();

        let mut second = chunk("fire third floor");
        second.auto_cluster = true;
        second.device_lat = Some(40.71);
        second.device_lng = Some(-74.00);
        let outcome = orch.ingest(second).await.unwrap();
        // Geo 0.1, time 1.0 → combined (0.15·1 + 0.15·0.1)/0.3 ≈ 0.55 < 0.65.
        assert_eq!(outcome.cluster_new, Some(true));
        assert!(outcome.cluster_score.unwrap() < 0.65);
        assert_eq!(orch.store().len(), 2);
    }
}
