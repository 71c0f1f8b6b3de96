//! # Triage Core
//!
//! The incident-evidence engine: uncertainty-aware incident state built from
//! a stream of transcript-chunk claims.
//!
//! This crate provides:
//! - **Claim model** — [`types`]: confidence-carrying values, claims, timeline events
//! - **Canonicalization** — [`canonical`]: normalized merge keys + synonym table
//! - **Bayesian merge** — [`merge`]: independent-evidence combination and the
//!   repeated-mention boost
//! - **Incident aggregate** — [`incident`]: per-attribute state, append-only
//!   timeline, atomic claim application
//! - **Incident store** — [`store`]: process-wide serialized registry
//!
//! The engine never asserts ground truth: every attribute is an
//! evidence-weighted claim whose confidence is monotonically non-decreasing
//! per canonical value. External capabilities (extraction, embeddings, the
//! same-incident judge, analytics) live in sibling crates behind traits so
//! the whole engine runs without network access.

pub mod canonical;
pub mod error;
pub mod incident;
pub mod merge;
pub mod store;
pub mod types;

pub use canonical::CanonicalTable;
pub use error::EngineError;
pub use incident::{ApplyOutcome, Incident};
pub use merge::{bayesian_combine, MergePolicy, CONFIDENCE_CEILING};
pub use store::IncidentStore;
pub use types::{
    Claim, ClaimType, ClaimValue, ConfidenceValue, IncidentId, IncidentSnapshot, LocationValue,
    TimelineEvent,
};
