//! # Triage Analytics
//!
//! Best-effort analytics sink: every ingested chunk produces one incident
//! snapshot row, one row per new timeline event, and one chunk row in an
//! external warehouse. Append-only; the operational store stays in-process.
//!
//! The sink is a capability behind [`AnalyticsSink`] with a no-op default.
//! The warehouse implementation speaks the Postgres wire protocol through
//! `sqlx`; credentials come from `[analytics]` configuration and their
//! absence disables the sink entirely. Writes are dispatched fire-and-forget
//! by the server with a bounded timeout — a failed or slow write is logged
//! and never fails the request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use triage_config::AnalyticsConfig;
use triage_core::{IncidentSnapshot, TimelineEvent};

/// One chunk's worth of analytics rows.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub incident_id: String,
    pub snapshot: IncidentSnapshot,
    pub new_events: Vec<TimelineEvent>,
    /// First 200 characters of the chunk text.
    pub chunk_preview: String,
    pub cluster_score: Option<f64>,
    pub cluster_new: Option<bool>,
    pub device_lat: Option<f64>,
    pub device_lng: Option<f64>,
    pub caller_id: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

/// Capability interface for the analytics warehouse.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Record one chunk's snapshot, events, and metadata.
    async fn record(&self, record: ChunkRecord) -> anyhow::Result<()>;

    /// Whether writes actually go anywhere (health surface).
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Default sink: drops everything.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl AnalyticsSink for NoopSink {
    async fn record(&self, record: ChunkRecord) -> anyhow::Result<()> {
        debug!(incident_id = %record.incident_id, "analytics disabled; record dropped");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Warehouse sink over a Postgres-compatible endpoint.
pub struct WarehouseSink {
    pool: PgPool,
    snapshots_table: String,
    timeline_table: String,
    chunks_table: String,
}

impl WarehouseSink {
    /// Open a lazy connection pool from configuration.
    ///
    /// Returns `None` when credentials are incomplete (sink disabled).
    pub fn from_config(config: &AnalyticsConfig) -> anyhow::Result<Option<Self>> {
        if !config.is_configured() {
            return Ok(None);
        }
        let account = config.account.as_deref().unwrap_or_default();
        let user = config.user.as_deref().unwrap_or_default();
        let password = config.password.as_deref().unwrap_or_default();
        let database = config.database.as_deref().unwrap_or_default();
        let mut url = format!(
            "postgres://{}:{}@{}/{}",
            user, password, account, database
        );
        if let Some(schema) = config.schema.as_deref().filter(|s| !s.is_empty()) {
            url.push_str(&format!("?options=-csearch_path%3D{}", schema));
        }
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .connect_lazy(&url)?;
        info!(account, database, "analytics warehouse sink enabled");
        Ok(Some(Self {
            pool,
            snapshots_table: config.snapshots_table.clone(),
            timeline_table: config.timeline_table.clone(),
            chunks_table: config.chunks_table.clone(),
        }))
    }

    /// Idempotent table setup, run before each write batch.
    pub async fn ensure_tables(&self) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                incident_id VARCHAR(128),
                last_updated VARCHAR(64),
                snapshot_json TEXT,
                created_at TIMESTAMPTZ DEFAULT now()
            )",
            self.snapshots_table
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                incident_id VARCHAR(128),
                event_time VARCHAR(64),
                claim_type VARCHAR(64),
                value VARCHAR(512),
                confidence DOUBLE PRECISION,
                source_text VARCHAR(1024),
                caller_id VARCHAR(128),
                created_at TIMESTAMPTZ DEFAULT now()
            )",
            self.timeline_table
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                incident_id VARCHAR(128),
                chunk_preview VARCHAR(1024),
                cluster_score DOUBLE PRECISION,
                cluster_new BOOLEAN,
                device_lat DOUBLE PRECISION,
                device_lng DOUBLE PRECISION,
                caller_id VARCHAR(128),
                ingested_at TIMESTAMPTZ
            )",
            self.chunks_table
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AnalyticsSink for WarehouseSink {
    async fn record(&self, record: ChunkRecord) -> anyhow::Result<()> {
        self.ensure_tables().await?;

        let snapshot_json = serde_json::to_string(&record.snapshot)?;
        let last_updated = record
            .snapshot
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        sqlx::query(&format!(
            "INSERT INTO {} (incident_id, last_updated, snapshot_json) VALUES ($1, $2, $3)",
            self.snapshots_table
        ))
        .bind(&record.incident_id)
        .bind(&last_updated)
        .bind(&snapshot_json)
        .execute(&self.pool)
        .await?;

        for event in &record.new_events {
            sqlx::query(&format!(
                "INSERT INTO {} (incident_id, event_time, claim_type, value, confidence, \
                 source_text, caller_id) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                self.timeline_table
            ))
            .bind(&record.incident_id)
            .bind(event.time.to_rfc3339())
            .bind(event.claim_type.as_str())
            .bind(truncate(&event.value.to_string(), 512))
            .bind(event.confidence)
            .bind(truncate(&event.source_text, 1024))
            .bind(event.caller_id.as_deref())
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(&format!(
            "INSERT INTO {} (incident_id, chunk_preview, cluster_score, cluster_new, \
             device_lat, device_lng, caller_id, ingested_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.chunks_table
        ))
        .bind(&record.incident_id)
        .bind(truncate(&record.chunk_preview, 1024))
        .bind(record.cluster_score)
        .bind(record.cluster_new)
        .bind(record.device_lat)
        .bind(record.device_lng)
        .bind(record.caller_id.as_deref())
        .bind(record.ingested_at)
        .execute(&self.pool)
        .await?;

        debug!(
            incident_id = %record.incident_id,
            events = record.new_events.len(),
            "analytics record written"
        );
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
