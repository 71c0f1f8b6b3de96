//! Hallucination grounding for LLM-extracted values.
//!
//! An extracted string must be substantively present in the source
//! transcript before it earns high confidence. Grounding scores a value
//! against the chunk text; the caller caps confidence at
//! [`GROUNDED_CAP`] when grounding passes and [`UNGROUNDED_CAP`] when it
//! fails. Ungrounded values are kept — the timeline is an audit trail — but
//! they cannot dominate the summary.

use std::collections::HashSet;

use triage_core::{canonical, ClaimType};

/// Confidence ceiling for grounded LLM values.
pub const GROUNDED_CAP: f64 = 0.9;
/// Confidence ceiling for values grounding could not verify.
pub const UNGROUNDED_CAP: f64 = 0.35;
/// Minimum grounding score considered a pass.
pub const GROUNDING_THRESHOLD: f64 = 0.5;

/// Score how well `value` is grounded in `source`, in [0, 1].
///
/// Exact substring → 1.0; otherwise token overlap between the value and the
/// source, with lenient handling for numeric people estimates and one-word
/// hazards.
pub fn grounding_score(source: &str, value: &str, claim_type: ClaimType) -> f64 {
    if value.trim().is_empty() || source.trim().is_empty() {
        return 0.0;
    }
    let source_norm = canonical::normalize(source);
    let value_norm = canonical::normalize(value);
    if source_norm.contains(&value_norm) {
        return 1.0;
    }

    let value_words: HashSet<&str> = words(&value_norm).collect();
    let source_words: HashSet<&str> = words(&source_norm).collect();
    let overlap =
        value_words.intersection(&source_words).count() as f64 / value_words.len().max(1) as f64;
    if overlap >= 0.8 {
        return 0.95;
    }
    if overlap >= 0.5 {
        return 0.7;
    }

    if claim_type == ClaimType::PeopleEstimate {
        // "3" may correspond to "three" in speech.
        const NUMBER_WORDS: &[(&str, &str)] = &[
            ("1", "one"),
            ("2", "two"),
            ("3", "three"),
            ("4", "four"),
            ("5", "five"),
        ];
        for (digit, word) in NUMBER_WORDS {
            if value_norm.contains(digit) && source_words.contains(word) {
                return 0.85;
            }
        }
        if value_norm.chars().any(|c| c.is_ascii_digit())
            && source_norm.chars().any(|c| c.is_ascii_digit())
        {
            return 0.6;
        }
    }

    if claim_type == ClaimType::Hazard && value_words.len() <= 2 {
        return if overlap > 0.0 { 0.6 } else { 0.35 };
    }

    if overlap >= 0.3 {
        return 0.5;
    }
    overlap.max(0.2)
}

/// Whether the score counts as grounded.
pub fn is_grounded(score: f64) -> bool {
    score >= GROUNDING_THRESHOLD
}

/// Cap an LLM-reported confidence by the grounding result.
pub fn cap_confidence(confidence: f64, source: &str, value: &str, claim_type: ClaimType) -> f64 {
    let cap = if is_grounded(grounding_score(source, value, claim_type)) {
        GROUNDED_CAP
    } else {
        UNGROUNDED_CAP
    };
    confidence.clamp(0.0, cap)
}

fn words(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_substring_grounds() {
        let score = grounding_score(
            "there is a fire on the third floor",
            "third floor",
            ClaimType::Location,
        );
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ungrounded_value_capped() {
        // The model invents "assault" from "someone was hurt".
        let conf = cap_confidence(0.8, "someone was hurt", "assault", ClaimType::IncidentType);
        assert!(conf <= UNGROUNDED_CAP);
    }

    #[test]
    fn test_grounded_value_capped_at_ceiling() {
        let conf = cap_confidence(
            0.99,
            "there is a fire on the third floor",
            "fire",
            ClaimType::IncidentType,
        );
        assert!((conf - GROUNDED_CAP).abs() < 1e-9);
    }

    #[test]
    fn test_partial_overlap() {
        // "3rd floor" vs "third floor": one of two words overlaps.
        let score = grounding_score(
            "smoke on the third floor",
            "3rd floor",
            ClaimType::Location,
        );
        assert!((score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_people_number_words() {
        let score = grounding_score(
            "two or three people trapped",
            "3",
            ClaimType::PeopleEstimate,
        );
        assert!(score >= 0.85);
    }

    #[test]
    fn test_hazard_single_word_leniency() {
        let score = grounding_score("heavy smoke everywhere", "smoke", ClaimType::Hazard);
        assert!((score - 1.0).abs() < 1e-9);
        let score = grounding_score("heavy smoke everywhere", "fumes", ClaimType::Hazard);
        assert!(score < GROUNDING_THRESHOLD);
    }

    #[test]
    fn test_empty_value_scores_zero() {
        assert_eq!(grounding_score("text", "  ", ClaimType::Location), 0.0);
    }
}
