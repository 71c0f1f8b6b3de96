//! Bayesian confidence merge.
//!
//! Repeated or independent evidence for the same canonical value combines as
//! `1 − (1 − p)(1 − q)`: confidence strictly increases but saturates below
//! certainty. A small boost rewards mentions repeated inside a short window,
//! and single-valued attributes replace their displayed value only when a
//! challenger clearly wins or the incumbent has gone stale.

use chrono::{DateTime, Duration, Utc};

/// Upper clamp for stored confidence; keeps the posterior off absolute
/// certainty so later evidence still moves it.
pub const CONFIDENCE_CEILING: f64 = 1.0 - 1e-6;

/// Tunables for confidence merging on one incident.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    /// Window inside which a repeated mention of the same canonical value
    /// earns the floor boost.
    pub repeat_window: Duration,
    /// Additive boost applied to the observation before the Bayesian step.
    pub repeat_boost: f64,
    /// Cap on the boosted observation.
    pub repeat_cap: f64,
    /// Margin a challenger must exceed the incumbent by to replace a
    /// single-valued attribute.
    pub replace_margin: f64,
    /// Incumbent age after which a merely-higher-confidence challenger wins.
    pub stale_after: Duration,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            repeat_window: Duration::seconds(60),
            repeat_boost: 0.05,
            repeat_cap: 0.9,
            replace_margin: 0.10,
            stale_after: Duration::minutes(10),
        }
    }
}

/// Combine a stored prior with a new observation.
///
/// No prior stores the observation as-is. Otherwise the independent-evidence
/// posterior `1 − (1 − p)(1 − q)` applies; the result is clamped to
/// `[0, CONFIDENCE_CEILING]` and never drops below the prior.
pub fn bayesian_combine(prior: Option<f64>, observation: f64) -> f64 {
    let obs = observation.clamp(0.0, 1.0);
    match prior {
        None => obs.min(CONFIDENCE_CEILING),
        Some(p) => {
            let posterior = 1.0 - (1.0 - p) * (1.0 - obs);
            posterior.clamp(p, CONFIDENCE_CEILING)
        }
    }
}

impl MergePolicy {
    /// Apply the repeated-mention boost when the same canonical value was
    /// last observed within the window.
    pub fn boosted_observation(
        &self,
        observation: f64,
        last_seen: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> f64 {
        match last_seen {
            Some(seen) if (at - seen).abs() <= self.repeat_window => {
                (observation + self.repeat_boost).min(self.repeat_cap.max(observation))
            }
            _ => observation,
        }
    }

    /// Whether a challenger displaces the incumbent of a single-valued
    /// attribute (incident type, people estimate, device location).
    pub fn should_replace(
        &self,
        incumbent_confidence: f64,
        incumbent_time: DateTime<Utc>,
        challenger_confidence: f64,
        now: DateTime<Utc>,
    ) -> bool {
        if challenger_confidence >= incumbent_confidence + self.replace_margin {
            return true;
        }
        now - incumbent_time > self.stale_after && incumbent_confidence < challenger_confidence
    }
}
