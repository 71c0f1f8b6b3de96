//! Deterministic rule extractor.
//!
//! Runs a fixed, ordered rule set over the lowercased chunk text: incident
//! type keywords (first match wins), location phrases, people estimates, and
//! hazard keywords. No external services, no regex engine — plain token
//! scanning over a configurable table, the same way the co-occurrence
//! extractor matches its predicate patterns.
//!
//! Rule confidences are fixed per rule class; hedged speech ("I think",
//! "maybe") scales them down by 25%.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use triage_core::{canonical, Claim, ClaimType, ClaimValue, IncidentSnapshot};

use crate::Extractor;

/// Base confidence per rule class.
const INCIDENT_TYPE_CONFIDENCE: f64 = 0.7;
const LOCATION_CONFIDENCE: f64 = 0.55;
const PEOPLE_CONFIDENCE: f64 = 0.6;
const HAZARD_CONFIDENCE: f64 = 0.5;

/// Multiplier applied when the speaker hedges.
const HEDGING_FACTOR: f64 = 0.75;

/// Ordered incident type keyword groups: (phrases, canonical type).
/// Checked in order; the first phrase found in the text wins.
const DEFAULT_INCIDENT_TYPES: &[(&[&str], &str)] = &[
    (&["fire"], "fire"),
    (&["gunshot", "gun shot", "shooting", "gun"], "gunshot"),
    (&["heart attack", "medical"], "medical"),
    (&["assault"], "assault"),
    (&["gas leak"], "gas leak"),
    (&["flood"], "flood"),
    (&["collapse"], "collapse"),
    (&["accident"], "accident"),
    (&["break-in", "break in"], "break-in"),
    (&["missing"], "missing"),
    (&["overdose"], "overdose"),
    (&["suicide"], "suicide"),
];

/// Hazard keywords (situational dangers).
const DEFAULT_HAZARDS: &[&str] = &[
    "smoke",
    "fire",
    "gas",
    "collapse",
    "flood",
    "explosion",
    "weapon",
    "suspect",
];

/// Hedging markers that lower rule confidence.
const HEDGING_PHRASES: &[&str] = &[
    "i think",
    "maybe",
    "perhaps",
    "might be",
    "could be",
    "not sure",
    "unsure",
];

/// Number words for people estimates.
const NUMBER_WORDS: &[(&str, u32)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("several", 3),
    ("multiple", 2),
];

/// Nouns a people-count must be attached to.
const PEOPLE_NOUNS: &[&str] = &["people", "persons", "victims", "trapped", "injured"];

/// Prepositions that open a location phrase.
const LOCATION_PREPOSITIONS: &[&str] = &["on", "at", "near", "in", "inside"];

/// Ordinals accepted before "floor".
const FLOOR_ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
    "ground", "1st", "2nd", "3rd", "4th", "5th", "6th", "7th", "8th", "9th", "10th",
];

/// Tokens that terminate a captured noun phrase.
const PHRASE_STOPWORDS: &[&str] = &[
    "and", "but", "or", "with", "there", "is", "are", "was", "were", "i", "we", "he", "she",
    "they", "it", "please", "now", "right",
];

/// Maximum tokens captured after "<preposition> the".
const MAX_PHRASE_TOKENS: usize = 6;

/// The rule tables; overridable from configuration.
#[derive(Debug, Clone)]
pub struct RuleTable {
    incident_types: Vec<(Vec<String>, String)>,
    hazards: Vec<String>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self {
            incident_types: DEFAULT_INCIDENT_TYPES
                .iter()
                .map(|(phrases, canonical)| {
                    (
                        phrases.iter().map(|p| p.to_string()).collect(),
                        canonical.to_string(),
                    )
                })
                .collect(),
            hazards: DEFAULT_HAZARDS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl RuleTable {
    /// Defaults plus extra hazard keywords from configuration.
    pub fn with_extra_hazards<I: IntoIterator<Item = String>>(extra: I) -> Self {
        let mut table = Self::default();
        for hazard in extra {
            let normalized = canonical::normalize(&hazard);
            if !normalized.is_empty() && !table.hazards.contains(&normalized) {
                table.hazards.push(normalized);
            }
        }
        table
    }
}

/// Deterministic extractor over the rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleExtractor {
    table: RuleTable,
}

impl RuleExtractor {
    pub fn new(table: RuleTable) -> Self {
        Self { table }
    }

    /// Synchronous extraction; the trait impl delegates here.
    pub fn extract_claims(&self, text: &str, now: DateTime<Utc>) -> Vec<Claim> {
        let source = text.trim();
        if source.is_empty() {
            return Vec::new();
        }
        let lower = canonical::normalize(source);
        let hedged = HEDGING_PHRASES
            .iter()
            .any(|p| contains_phrase(&lower, p));
        let scale = if hedged { HEDGING_FACTOR } else { 1.0 };

        let mut claims = Vec::new();

        if let Some(kind) = self.match_incident_type(&lower) {
            claims.push(claim(
                ClaimType::IncidentType,
                ClaimValue::Text(kind),
                INCIDENT_TYPE_CONFIDENCE * scale,
                source,
                now,
            ));
        }

        for location in extract_locations(source, &lower) {
            claims.push(claim(
                ClaimType::Location,
                ClaimValue::Text(location),
                LOCATION_CONFIDENCE * scale,
                source,
                now,
            ));
        }

        if let Some(count) = extract_people_estimate(&lower) {
            claims.push(claim(
                ClaimType::PeopleEstimate,
                ClaimValue::Number(count as f64),
                PEOPLE_CONFIDENCE * scale,
                source,
                now,
            ));
        }

        for hazard in &self.table.hazards {
            if contains_phrase(&lower, hazard) {
                claims.push(claim(
                    ClaimType::Hazard,
                    ClaimValue::Text(hazard.clone()),
                    HAZARD_CONFIDENCE * scale,
                    source,
                    now,
                ));
            }
        }

        debug!(
            text_len = source.len(),
            claims = claims.len(),
            "rule extraction done"
        );
        claims
    }

    fn match_incident_type(&self, lower: &str) -> Option<String> {
        for (phrases, canonical_type) in &self.table.incident_types {
            if phrases.iter().any(|p| contains_phrase(lower, p)) {
                return Some(canonical_type.clone());
            }
        }
        None
    }
}

#[async_trait]
impl Extractor for RuleExtractor {
    async fn extract(
        &self,
        text: &str,
        now: DateTime<Utc>,
        _context: Option<&IncidentSnapshot>,
    ) -> Vec<Claim> {
        self.extract_claims(text, now)
    }

    fn name(&self) -> &'static str {
        "deterministic"
    }
}

fn claim(
    claim_type: ClaimType,
    value: ClaimValue,
    confidence: f64,
    source: &str,
    now: DateTime<Utc>,
) -> Claim {
    // Rule confidences are constants in [0, 1]; construction cannot fail.
    Claim::new(claim_type, value, confidence.min(1.0), source, now)
        .expect("rule confidence in range")
}

/// Word-boundary phrase containment on normalized text.
fn contains_phrase(lower: &str, phrase: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = lower[from..].find(phrase) {
        let start = from + pos;
        let end = start + phrase.len();
        let before_ok = start == 0
            || !lower[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == lower.len()
            || !lower[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// Strip punctuation from token edges.
fn strip_punct(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Location phrases: preposition phrases, ordinal floors, and capitalized
/// multi-word names. Deduplicated on the lowercased value.
fn extract_locations(source: &str, lower: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut push = |value: String| {
        let key = value.to_lowercase();
        if !key.is_empty() && !seen.iter().any(|s| s.to_lowercase() == key) {
            seen.push(value);
        }
    };

    let tokens: Vec<&str> = lower.split_whitespace().collect();

    // (a) "<preposition> the <noun phrase up to 6 tokens>"
    for i in 0..tokens.len() {
        if !LOCATION_PREPOSITIONS.contains(&strip_punct(tokens[i])) {
            continue;
        }
        if i + 2 > tokens.len() || strip_punct(tokens[i + 1]) != "the" {
            continue;
        }
        let mut phrase = Vec::new();
        for raw in tokens.iter().skip(i + 2).take(MAX_PHRASE_TOKENS) {
            let word = strip_punct(raw);
            if word.is_empty() || PHRASE_STOPWORDS.contains(&word) {
                break;
            }
            phrase.push(word);
            // Punctuation inside the raw token ends the phrase.
            if raw.ends_with(|c: char| !c.is_alphanumeric()) {
                break;
            }
        }
        if !phrase.is_empty() {
            push(phrase.join(" "));
        }
    }

    // (b) "<ordinal> floor"
    for window in tokens.windows(2) {
        let first = strip_punct(window[0]);
        if FLOOR_ORDINALS.contains(&first) && strip_punct(window[1]) == "floor" {
            push(format!("{} floor", first));
        }
    }

    // (c) Capitalized multi-word names (e.g. "Windsor Building"), scanned on
    // the original casing so sentence case alone does not trigger.
    let original: Vec<&str> = source.split_whitespace().collect();
    let mut run: Vec<&str> = Vec::new();
    for (idx, raw) in original.iter().enumerate() {
        let word = strip_punct(raw);
        let capitalized = word.len() > 1
            && word.chars().next().is_some_and(|c| c.is_uppercase())
            && word.chars().skip(1).all(|c| c.is_lowercase());
        let sentence_start = idx == 0
            || original[idx - 1].ends_with(|c: char| matches!(c, '.' | '!' | '?'));
        if capitalized && !(sentence_start && run.is_empty()) {
            run.push(word);
        } else {
            if run.len() >= 2 {
                push(run.join(" "));
            }
            run.clear();
        }
        if raw.ends_with(|c: char| !c.is_alphanumeric()) {
            if run.len() >= 2 {
                push(run.join(" "));
            }
            run.clear();
        }
    }
    if run.len() >= 2 {
        push(run.join(" "));
    }

    seen
}

/// "<number word or digits> <people noun>" → integer estimate.
fn extract_people_estimate(lower: &str) -> Option<u32> {
    let tokens: Vec<&str> = lower.split_whitespace().map(strip_punct).collect();
    for window in tokens.windows(2) {
        let noun_ok = PEOPLE_NOUNS.contains(&window[1]);
        if !noun_ok {
            continue;
        }
        if let Some(&(_, n)) = NUMBER_WORDS.iter().find(|(w, _)| *w == window[0]) {
            return Some(n);
        }
        if let Ok(n) = window[0].parse::<u32>() {
            return Some(n);
        }
    }
    None
}
