//! Core data types for the incident-evidence engine.
//!
//! Defines the claim model shared across extraction, clustering, and the
//! server: confidence-carrying values, claims, timeline events, and the
//! serializable incident snapshot.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Stable opaque incident identifier (e.g. `incident-3fa94c17be02`).
pub type IncidentId = String;

/// The closed set of attributes a claim can assert about an incident.
///
/// Unknown tags are rejected at deserialization; extractors emitting shapes
/// outside this enum never reach the merge path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Location,
    IncidentType,
    PeopleEstimate,
    Hazard,
    DeviceLocation,
}

impl ClaimType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimType::Location => "location",
            ClaimType::IncidentType => "incident_type",
            ClaimType::PeopleEstimate => "people_estimate",
            ClaimType::Hazard => "hazard",
            ClaimType::DeviceLocation => "device_location",
        }
    }

    /// Whether claims of this type carry incident content.
    ///
    /// Chunks producing no content claims are eligible for the
    /// empty-chatter skip in the ingest path.
    pub fn is_incident_content(self) -> bool {
        matches!(
            self,
            ClaimType::Location | ClaimType::IncidentType | ClaimType::Hazard
        )
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A claim payload: free text or a numeric estimate.
///
/// Serialized untagged so JSON numbers and strings round-trip naturally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Number(f64),
    Text(String),
}

impl ClaimValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ClaimValue::Text(s) => Some(s),
            ClaimValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ClaimValue::Number(n) => Some(*n),
            ClaimValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimValue::Text(s) => f.write_str(s),
            ClaimValue::Number(n) if n.fract() == 0.0 && n.is_finite() => {
                write!(f, "{}", *n as i64)
            }
            ClaimValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for ClaimValue {
    fn from(s: &str) -> Self {
        ClaimValue::Text(s.to_string())
    }
}

impl From<f64> for ClaimValue {
    fn from(n: f64) -> Self {
        ClaimValue::Number(n)
    }
}

/// An evidence-weighted attribute value.
///
/// Confidence is bounded to [0, 1] and, once stored against a canonical key,
/// never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceValue {
    pub value: ClaimValue,
    pub confidence: f64,
    pub source_text: String,
    /// Wall-clock time of the most recent supporting evidence.
    pub time: DateTime<Utc>,
}

/// A location attribute with optional WGS84 coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationValue {
    pub value: String,
    pub confidence: f64,
    pub source_text: String,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    /// True for coordinates reported by the caller's device, false for
    /// places extracted from speech.
    pub device_reported: bool,
}

impl LocationValue {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}

/// One extracted assertion about an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_type: ClaimType,
    pub value: ClaimValue,
    pub confidence: f64,
    pub source_text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_info: Option<serde_json::Value>,
}

impl Claim {
    /// Build a claim, rejecting out-of-range confidence.
    pub fn new(
        claim_type: ClaimType,
        value: impl Into<ClaimValue>,
        confidence: f64,
        source_text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::InvalidClaim(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            claim_type,
            value: value.into(),
            confidence,
            source_text: source_text.into(),
            timestamp,
            lat: None,
            lng: None,
            caller_id: None,
            caller_info: None,
        })
    }

    pub fn with_geo(mut self, lat: f64, lng: f64) -> Self {
        self.lat = Some(lat);
        self.lng = Some(lng);
        self
    }

    pub fn with_caller(
        mut self,
        caller_id: Option<String>,
        caller_info: Option<serde_json::Value>,
    ) -> Self {
        self.caller_id = caller_id;
        self.caller_info = caller_info;
        self
    }
}

/// One entry in an incident's append-only audit trail.
///
/// Every claim accepted by `apply` produces exactly one event, in receive
/// order, whether or not it changed the stored confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub time: DateTime<Utc>,
    pub claim_type: ClaimType,
    pub value: ClaimValue,
    pub confidence: f64,
    pub source_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_info: Option<serde_json::Value>,
}

/// Serializable view of an incident's current summary plus timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSnapshot {
    pub incident_id: IncidentId,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_location: Option<LocationValue>,
    pub locations: Vec<LocationValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_type: Option<ConfidenceValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub people_estimate: Option<ConfidenceValue>,
    pub hazards: Vec<ConfidenceValue>,
    /// caller_id → first-seen caller metadata.
    pub callers: BTreeMap<String, serde_json::Value>,
    pub timeline_count: usize,
    pub timeline: Vec<TimelineEvent>,
}

impl IncidentSnapshot {
    /// Short summary string for embedding and same-incident judgment:
    /// `incident_type · locations · hazards · device geo`.
    pub fn summary_text(&self) -> String {
        let mut parts = Vec::new();
        if let Some(t) = &self.incident_type {
            parts.push(format!("incident_type: {}", t.value));
        }
        for loc in &self.locations {
            parts.push(format!("location: {}", loc.value));
        }
        if let Some(dev) = &self.device_location {
            parts.push(format!("device: {}", dev.value));
            if let Some((lat, lng)) = dev.coordinates() {
                parts.push(format!("device_geo: {}", geo_snippet(lat, lng)));
            }
        }
        if let Some(p) = &self.people_estimate {
            parts.push(format!("people: {}", p.value));
        }
        for h in &self.hazards {
            parts.push(format!("hazard: {}", h.value));
        }
        if parts.is_empty() {
            "(no summary)".to_string()
        } else {
            parts.join(" | ")
        }
    }

    /// Best coordinates for geo proximity: the device location if present,
    /// else the first mentioned location that carries coordinates.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        if let Some(dev) = &self.device_location {
            if let Some(c) = dev.coordinates() {
                return Some(c);
            }
        }
        self.locations.iter().find_map(|l| l.coordinates())
    }

    /// Whether the summary has any content worth clustering against.
    pub fn has_content(&self) -> bool {
        self.incident_type.is_some()
            || !self.locations.is_empty()
            || !self.hazards.is_empty()
            || self.device_location.is_some()
    }
}

/// Rounded `lat,lng` marker for summary text; ~3 decimals keeps reports from
/// the same building on the same snippet.
pub fn geo_snippet(lat: f64, lng: f64) -> String {
    format!("{:.3},{:.3}", lat, lng)
}
