//! Engine error kinds.
//!
//! User-facing operations fail only on [`EngineError::InvalidInput`] and
//! [`EngineError::UnknownIncident`]; everything else in the pipeline degrades
//! gracefully (extractor fallback, clustering with fewer signals, dropped
//! analytics writes) and is reported through logs, not errors.

/// Errors surfaced by the incident-evidence engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed caller input: empty text, unparseable timestamp, etc.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lookup of an incident id that was never created.
    #[error("unknown incident: {0}")]
    UnknownIncident(String),

    /// A claim whose canonical form is unusable (empty value, confidence out
    /// of range, non-numeric people estimate). Dropped per claim; never fails
    /// the batch.
    #[error("invalid claim: {0}")]
    InvalidClaim(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
