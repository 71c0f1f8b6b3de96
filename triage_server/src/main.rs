//! Triage server entrypoint.
//!
//! # Configuration
//!
//! Set `TRIAGE_CONFIG` (or `--config`) to a TOML file path, or run on
//! defaults. `OPENAI_API_KEY` enables the LLM extractor, embeddings, and the
//! same-incident judge; without it the engine runs fully deterministic.
//!
//! # CLI Usage
//!
//! ```bash
//! # Start with defaults
//! triage_server
//!
//! # Start with a config file
//! triage_server --config triage.toml
//!
//! # Generate a commented example config and exit
//! triage_server --init-config
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use triage_analytics::{AnalyticsSink, NoopSink, WarehouseSink};
use triage_config::TriageConfig;
use triage_core::{CanonicalTable, IncidentStore, MergePolicy};
use triage_extraction::clustering::{ClusterEngine, ClusterOptions, ClusterWeights};
use triage_extraction::ingestion::IngestOrchestrator;
use triage_extraction::openai::{LlmExtractor, OpenAiClient, OpenAiEmbedder, OpenAiJudge};
use triage_extraction::rules::{RuleExtractor, RuleTable};
use triage_extraction::{Embedder, Extractor, SameIncidentJudge};
use triage_server::state::AppState;

/// Triage incident engine server.
#[derive(Parser, Debug)]
#[command(name = "triage_server")]
#[command(about = "Triage incident engine — evidence-weighted incident summaries over a REST API")]
#[command(version)]
struct Cli {
    /// Path to a triage.toml config file.
    /// Can also be set via the TRIAGE_CONFIG env var.
    #[arg(short, long, env = "TRIAGE_CONFIG")]
    config: Option<String>,

    /// Print a commented example triage.toml and exit.
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.init_config {
        print!("{}", TriageConfig::example_toml_commented());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => TriageConfig::from_file(path)?,
        None => TriageConfig::from_env()?,
    };

    init_tracing(&config);

    tracing::info!(
        "Triage server starting on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = Arc::new(build_state(config.clone()));
    tracing::info!(
        extractor = state.orchestrator.extractor_name(),
        analytics = state.sink.is_enabled(),
        threshold = config.cluster.threshold,
        "engine ready"
    );

    let app = triage_server::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(config: &TriageConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone()));
    if config.server.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Wire the engine from configuration: store, extractor, clustering, sink.
fn build_state(config: TriageConfig) -> AppState {
    let table = CanonicalTable::with_overrides(config.extraction.synonyms.clone());
    let store = Arc::new(IncidentStore::new(table, MergePolicy::default()));
    let rules = RuleExtractor::new(RuleTable::with_extra_hazards(
        config.extraction.extra_hazards.iter().cloned(),
    ));

    let openai_client = config.openai.api_key.as_ref().map(|key| {
        OpenAiClient::new(
            key.clone(),
            config.openai.api_base.clone(),
            config.openai.chat_model.clone(),
            config.openai.embedding_model.clone(),
            Duration::from_secs(config.openai.chat_timeout_secs),
            Duration::from_secs(config.openai.embedding_timeout_secs),
        )
    });

    let extractor: Arc<dyn Extractor> = match &openai_client {
        Some(client) if config.extraction.prefer_llm => {
            Arc::new(LlmExtractor::new(client.clone(), rules.clone()))
        }
        _ => Arc::new(rules.clone()),
    };
    let embedder: Option<Arc<dyn Embedder>> = openai_client
        .as_ref()
        .map(|c| Arc::new(OpenAiEmbedder::new(c.clone())) as Arc<dyn Embedder>);
    let judge: Option<Arc<dyn SameIncidentJudge>> = openai_client
        .as_ref()
        .map(|c| Arc::new(OpenAiJudge::new(c.clone())) as Arc<dyn SameIncidentJudge>);

    let (we, wl, wt, wg) = config
        .cluster
        .parsed_weights()
        .unwrap_or((0.35, 0.35, 0.15, 0.15));
    let options = ClusterOptions {
        threshold: config.cluster.threshold,
        weights: ClusterWeights {
            embedding: we,
            llm: wl,
            time: wt,
            geo: wg,
        },
        min_embedding: config.cluster.min_embedding,
        min_llm: config.cluster.min_llm,
    };
    let cluster = Arc::new(ClusterEngine::new(embedder, judge, options));

    let sink: Arc<dyn AnalyticsSink> = match WarehouseSink::from_config(&config.analytics) {
        Ok(Some(sink)) => Arc::new(sink),
        Ok(None) => Arc::new(NoopSink),
        Err(err) => {
            tracing::warn!(%err, "analytics sink setup failed; continuing without it");
            Arc::new(NoopSink)
        }
    };

    let orchestrator = IngestOrchestrator::new(store, extractor, cluster);
    AppState::new(orchestrator, sink, config)
}
