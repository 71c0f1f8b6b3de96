//! Application state shared across all request handlers.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use triage_analytics::AnalyticsSink;
use triage_config::TriageConfig;
use triage_extraction::ingestion::IngestOrchestrator;

/// Shared application state threaded through Axum handlers.
///
/// Wrapped in `Arc` and shared via Axum's `State` extractor. The incident
/// store lives inside the orchestrator; there is exactly one per process.
pub struct AppState {
    /// The ingest pipeline (store + extractor + clustering).
    pub orchestrator: IngestOrchestrator,
    /// Analytics sink (no-op unless the warehouse is configured).
    pub sink: Arc<dyn AnalyticsSink>,
    /// Full configuration.
    pub config: TriageConfig,
    /// Server start time (for the uptime metric).
    pub start_time: Instant,
    /// Request counters for metrics.
    pub total_requests: AtomicU64,
    pub total_chunks: AtomicU64,
    pub total_skipped: AtomicU64,
}

impl AppState {
    pub fn new(
        orchestrator: IngestOrchestrator,
        sink: Arc<dyn AnalyticsSink>,
        config: TriageConfig,
    ) -> Self {
        Self {
            orchestrator,
            sink,
            config,
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_chunks: AtomicU64::new(0),
            total_skipped: AtomicU64::new(0),
        }
    }
}
