//! The incident aggregate.
//!
//! Holds the current evidence-weighted summary per attribute, the append-only
//! timeline, device geolocation, and caller metadata. `apply` is the single
//! mutation path: it canonicalizes each claim, runs the per-type merge rule,
//! appends one timeline event per accepted claim, and advances
//! `last_updated` monotonically. Callers are expected to hold the incident's
//! lock for the duration of an `apply` (see [`crate::store`]).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::canonical::CanonicalTable;
use crate::merge::{bayesian_combine, MergePolicy};
use crate::types::{
    Claim, ClaimType, ClaimValue, ConfidenceValue, IncidentId, IncidentSnapshot, LocationValue,
    TimelineEvent,
};

/// Accumulated evidence for one (claim_type, canonical value) pair.
#[derive(Debug, Clone)]
struct Evidence {
    confidence: f64,
    last_seen: DateTime<Utc>,
}

/// Result of applying a claim batch.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Claims that survived canonicalization and reached the timeline.
    pub claims_added: usize,
    /// The events appended by this batch, in receive order.
    pub new_events: Vec<TimelineEvent>,
    /// Snapshot taken after the batch.
    pub snapshot: IncidentSnapshot,
}

/// Live state for one incident.
#[derive(Debug)]
pub struct Incident {
    incident_id: IncidentId,
    created_at: DateTime<Utc>,
    device_location: Option<LocationValue>,
    locations: Vec<LocationValue>,
    location_index: HashMap<String, usize>,
    /// Displayed incident type: (canonical key, value).
    incident_type: Option<(String, ConfidenceValue)>,
    people_estimate: Option<(String, ConfidenceValue)>,
    hazards: Vec<ConfidenceValue>,
    hazard_index: HashMap<String, usize>,
    /// Per canonical key confidence accumulation, across all claim types.
    /// Stored confidence here never decreases.
    evidence: HashMap<(ClaimType, String), Evidence>,
    timeline: Vec<TimelineEvent>,
    last_updated: Option<DateTime<Utc>>,
    callers: BTreeMap<String, serde_json::Value>,
}

impl Incident {
    pub fn new(incident_id: impl Into<IncidentId>, created_at: DateTime<Utc>) -> Self {
        Self {
            incident_id: incident_id.into(),
            created_at,
            device_location: None,
            locations: Vec::new(),
            location_index: HashMap::new(),
            incident_type: None,
            people_estimate: None,
            hazards: Vec::new(),
            hazard_index: HashMap::new(),
            evidence: HashMap::new(),
            timeline: Vec::new(),
            last_updated: None,
            callers: BTreeMap::new(),
        }
    }

    pub fn incident_id(&self) -> &str {
        &self.incident_id
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Apply a batch of claims atomically (caller holds the incident lock).
    ///
    /// Claims whose canonical form is unusable are dropped individually and
    /// logged; they do not fail the batch and do not reach the timeline.
    pub fn apply(
        &mut self,
        claims: &[Claim],
        now: DateTime<Utc>,
        table: &CanonicalTable,
        policy: &MergePolicy,
    ) -> ApplyOutcome {
        let mut new_events = Vec::new();

        for claim in claims {
            let key = match table.canonical_key(claim.claim_type, &claim.value) {
                Ok(key) => key,
                Err(err) => {
                    debug!(incident_id = %self.incident_id, %err, "dropping claim");
                    continue;
                }
            };

            let entry = self.evidence.get(&(claim.claim_type, key.clone()));
            let prior = entry.map(|e| e.confidence);
            let last_seen = entry.map(|e| e.last_seen);
            let observation =
                policy.boosted_observation(claim.confidence, last_seen, claim.timestamp);
            let posterior = bayesian_combine(prior, observation);
            self.evidence.insert(
                (claim.claim_type, key.clone()),
                Evidence {
                    confidence: posterior,
                    last_seen: claim.timestamp,
                },
            );

            match claim.claim_type {
                ClaimType::Location => self.merge_location(claim, &key, posterior),
                ClaimType::Hazard => self.merge_hazard(claim, &key, posterior),
                ClaimType::IncidentType => {
                    let display = ClaimValue::Text(key.clone());
                    Self::merge_single(
                        &mut self.incident_type,
                        claim,
                        &key,
                        display,
                        posterior,
                        now,
                        policy,
                    );
                }
                ClaimType::PeopleEstimate => {
                    // Display the canonical (rounded) estimate, not the raw value.
                    let display = ClaimValue::Number(key.parse::<f64>().unwrap_or(0.0));
                    Self::merge_single(
                        &mut self.people_estimate,
                        claim,
                        &key,
                        display,
                        posterior,
                        now,
                        policy,
                    );
                }
                ClaimType::DeviceLocation => self.merge_device_location(claim, posterior),
            }

            if let Some(id) = &claim.caller_id {
                if !self.callers.contains_key(id) {
                    self.callers.insert(
                        id.clone(),
                        claim
                            .caller_info
                            .clone()
                            .unwrap_or(serde_json::Value::Null),
                    );
                }
            }

            new_events.push(TimelineEvent {
                time: claim.timestamp,
                claim_type: claim.claim_type,
                value: claim.value.clone(),
                confidence: claim.confidence,
                source_text: claim.source_text.clone(),
                caller_id: claim.caller_id.clone(),
                caller_info: claim.caller_info.clone(),
            });
            self.last_updated = Some(match self.last_updated {
                Some(current) => current.max(claim.timestamp),
                None => claim.timestamp,
            });
        }

        self.timeline.extend(new_events.iter().cloned());
        if !new_events.is_empty() {
            self.last_updated = Some(self.last_updated.map_or(now, |current| current.max(now)));
        }

        ApplyOutcome {
            claims_added: new_events.len(),
            new_events,
            snapshot: self.snapshot(),
        }
    }

    fn merge_location(&mut self, claim: &Claim, key: &str, posterior: f64) {
        match self.location_index.get(key) {
            Some(&idx) => {
                let loc = &mut self.locations[idx];
                loc.confidence = posterior;
                loc.time = claim.timestamp;
                loc.source_text = claim.source_text.clone();
                if claim.lat.is_some() {
                    loc.lat = claim.lat;
                }
                if claim.lng.is_some() {
                    loc.lng = claim.lng;
                }
            }
            None => {
                self.location_index
                    .insert(key.to_string(), self.locations.len());
                self.locations.push(LocationValue {
                    value: claim.value.to_string(),
                    confidence: posterior,
                    source_text: claim.source_text.clone(),
                    time: claim.timestamp,
                    lat: claim.lat,
                    lng: claim.lng,
                    device_reported: false,
                });
            }
        }
    }

    fn merge_hazard(&mut self, claim: &Claim, key: &str, posterior: f64) {
        match self.hazard_index.get(key) {
            Some(&idx) => {
                let hazard = &mut self.hazards[idx];
                hazard.confidence = posterior;
                hazard.time = claim.timestamp;
                hazard.source_text = claim.source_text.clone();
            }
            None => {
                self.hazard_index
                    .insert(key.to_string(), self.hazards.len());
                self.hazards.push(ConfidenceValue {
                    value: ClaimValue::Text(key.to_string()),
                    confidence: posterior,
                    source_text: claim.source_text.clone(),
                    time: claim.timestamp,
                });
            }
        }
    }

    /// Single-valued attribute merge: same canonical key updates in place;
    /// a different key replaces the incumbent only per the policy.
    #[allow(clippy::too_many_arguments)]
    fn merge_single(
        slot: &mut Option<(String, ConfidenceValue)>,
        claim: &Claim,
        key: &str,
        display: ClaimValue,
        posterior: f64,
        now: DateTime<Utc>,
        policy: &MergePolicy,
    ) {
        let challenger = ConfidenceValue {
            value: display,
            confidence: posterior,
            source_text: claim.source_text.clone(),
            time: claim.timestamp,
        };
        match slot {
            None => *slot = Some((key.to_string(), challenger)),
            Some((current_key, current)) if current_key == key => {
                current.confidence = posterior;
                current.time = claim.timestamp;
                current.source_text = claim.source_text.clone();
            }
            Some((_, current)) => {
                if policy.should_replace(current.confidence, current.time, posterior, now) {
                    *slot = Some((key.to_string(), challenger));
                }
            }
        }
    }

    fn merge_device_location(&mut self, claim: &Claim, posterior: f64) {
        match &mut self.device_location {
            Some(dev) => {
                dev.confidence = posterior;
                dev.time = claim.timestamp;
                dev.source_text = claim.source_text.clone();
                if claim.lat.is_some() {
                    dev.lat = claim.lat;
                }
                if claim.lng.is_some() {
                    dev.lng = claim.lng;
                }
            }
            None => {
                self.device_location = Some(LocationValue {
                    value: claim.value.to_string(),
                    confidence: posterior,
                    source_text: claim.source_text.clone(),
                    time: claim.timestamp,
                    lat: claim.lat,
                    lng: claim.lng,
                    device_reported: true,
                });
            }
        }
    }

    /// Consistent serializable view of the current state.
    pub fn snapshot(&self) -> IncidentSnapshot {
        IncidentSnapshot {
            incident_id: self.incident_id.clone(),
            created_at: self.created_at,
            last_updated: self.last_updated,
            device_location: self.device_location.clone(),
            locations: self.locations.clone(),
            incident_type: self.incident_type.as_ref().map(|(_, v)| v.clone()),
            people_estimate: self.people_estimate.as_ref().map(|(_, v)| v.clone()),
            hazards: self.hazards.clone(),
            callers: self.callers.clone(),
            timeline_count: self.timeline.len(),
            timeline: self.timeline.clone(),
        }
    }

    /// Timeline only (audit trail).
    pub fn timeline(&self) -> &[TimelineEvent] {
        &self.timeline
    }

    /// Stored confidence for a canonical key, if any evidence exists.
    pub fn evidence_confidence(&self, claim_type: ClaimType, key: &str) -> Option<f64> {
        self.evidence
            .get(&(claim_type, key.to_string()))
            .map(|e| e.confidence)
    }
}
