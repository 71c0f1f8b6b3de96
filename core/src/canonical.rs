//! Canonical forms for claim values.
//!
//! Every claim value has a canonical form used as the merge key: strings are
//! NFC-normalized, trimmed, lowercased, whitespace-collapsed, and passed
//! through a synonym table; people estimates are rounded to the nearest
//! non-negative integer. Canonicalization is idempotent — synonym outputs
//! are fixed points of the table.

use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;

use crate::error::EngineError;
use crate::types::{ClaimType, ClaimValue};

/// Default synonym entries applied to incident types and hazards.
///
/// Outputs must never appear as keys, keeping the table idempotent.
const DEFAULT_SYNONYMS: &[(&str, &str)] = &[
    ("gun shot", "gunshot"),
    ("shooting", "gunshot"),
    ("shots fired", "gunshot"),
    ("heart attack", "medical"),
    ("cardiac arrest", "medical"),
    ("chest pain", "medical"),
    ("burning", "fire"),
    ("flames", "fire"),
    ("flame", "fire"),
    ("flooding", "flood"),
    ("collapsed", "collapse"),
    ("gas leaking", "gas leak"),
    ("burglary", "break-in"),
    ("break in", "break-in"),
    ("crash", "accident"),
    ("collision", "accident"),
    ("car accident", "accident"),
];

/// Synonym table mapping normalized values onto their canonical spelling.
///
/// The defaults cover the common emergency vocabulary; deployments can
/// extend or replace entries through configuration.
#[derive(Debug, Clone)]
pub struct CanonicalTable {
    synonyms: HashMap<String, String>,
}

impl Default for CanonicalTable {
    fn default() -> Self {
        Self {
            synonyms: DEFAULT_SYNONYMS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl CanonicalTable {
    /// Build a table from explicit entries (normalizing the keys).
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self {
            synonyms: entries
                .into_iter()
                .map(|(k, v)| (normalize(k.as_ref()), normalize(v.as_ref())))
                .collect(),
        }
    }

    /// Merge extra entries over the defaults.
    pub fn with_overrides<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut table = Self::default();
        for (k, v) in entries {
            table
                .synonyms
                .insert(normalize(k.as_ref()), normalize(v.as_ref()));
        }
        table
    }

    /// Canonical text form: normalize, then apply the synonym table.
    pub fn canonical_text(&self, raw: &str) -> String {
        let normalized = normalize(raw);
        match self.synonyms.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => normalized,
        }
    }

    /// Canonical merge key for a claim value, or `InvalidClaim` when no
    /// usable form exists.
    pub fn canonical_key(
        &self,
        claim_type: ClaimType,
        value: &ClaimValue,
    ) -> Result<String, EngineError> {
        match claim_type {
            ClaimType::PeopleEstimate => {
                let n = value.as_number().ok_or_else(|| {
                    EngineError::InvalidClaim(format!("people estimate '{}' is not numeric", value))
                })?;
                if !n.is_finite() {
                    return Err(EngineError::InvalidClaim(
                        "people estimate is not finite".into(),
                    ));
                }
                Ok(people_estimate_key(n).to_string())
            }
            ClaimType::DeviceLocation => Ok("device".to_string()),
            ClaimType::Location | ClaimType::IncidentType | ClaimType::Hazard => {
                let text = match value {
                    ClaimValue::Text(s) => self.canonical_text(s),
                    ClaimValue::Number(n) => ClaimValue::Number(*n).to_string(),
                };
                if text.is_empty() {
                    return Err(EngineError::InvalidClaim(format!(
                        "{} value empty after canonicalization",
                        claim_type
                    )));
                }
                Ok(text)
            }
        }
    }
}

/// NFC-normalize, trim, lowercase, and collapse internal whitespace.
pub fn normalize(raw: &str) -> String {
    let folded: String = raw.nfc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// People estimates merge on the nearest non-negative integer.
pub fn people_estimate_key(n: f64) -> u64 {
    n.round().max(0.0) as u64
}
