//! # Triage Extraction
//!
//! Extraction and clustering pipelines for the Triage incident engine.
//!
//! This crate provides:
//! - **Capability traits** — [`Extractor`], [`Embedder`], [`SameIncidentJudge`]:
//!   the seams where external services plug in. Every trait has a
//!   deterministic or disabled default, so the whole engine runs without
//!   network access.
//! - **Rule extractor** — [`rules::RuleExtractor`]: ordered keyword rules
//!   over a configurable table, no external services.
//! - **LLM extractor** — [`openai::LlmExtractor`]: OpenAI chat completion
//!   with hallucination grounding and deterministic fallback.
//! - **Embedding cache** — [`cache::EmbeddingCache`]: fixed-budget LRU keyed
//!   by text hash.
//! - **Clustering engine** — [`clustering::ClusterEngine`]: blends embedding
//!   similarity, the same-incident judge, time proximity, and geo proximity
//!   to assign a report to an incident.
//! - **Ingest orchestrator** — [`ingestion::IngestOrchestrator`]: the entry
//!   operation turning one transcript chunk into incident state.
//!
//! # Failure model
//!
//! External calls are never fatal: the LLM extractor falls back to the rule
//! extractor, clustering renormalizes weights over the signals it still has,
//! and every remote call carries a bounded timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use triage_core::{Claim, IncidentSnapshot};

pub mod cache;
pub mod clustering;
pub mod grounding;
pub mod ingestion;
pub mod openai;
pub mod rules;

/// Turns one transcript chunk into claims.
///
/// `context` carries the incident's current summary when the chunk is being
/// applied to a known incident, letting context-aware implementations report
/// only what the new chunk adds.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        now: DateTime<Utc>,
        context: Option<&IncidentSnapshot>,
    ) -> Vec<Claim>;

    /// Short name for the health surface ("llm" or "deterministic").
    fn name(&self) -> &'static str;
}

/// Produces embedding vectors for clustering similarity.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Scores how likely a new report describes the same incident as an
/// existing summary, in [0, 1].
#[async_trait]
pub trait SameIncidentJudge: Send + Sync {
    async fn same_incident_score(
        &self,
        incident_summary: &str,
        report_summary: &str,
    ) -> anyhow::Result<f64>;
}
