//! # Triage Config
//!
//! Configuration for the Triage incident engine.
//!
//! Provides TOML-based configuration parsing and validation for the server,
//! extraction tables, OpenAI access, clustering thresholds, and the
//! analytics sink.
//!
//! # Configuration Schema
//!
//! The configuration file (`triage.toml`) supports the following sections:
//! - `[server]` — HTTP server settings (host, port, log_level, log_format)
//! - `[extraction]` — extractor selection and canonicalization overrides
//! - `[openai]` — chat/embedding models, API base, per-call timeouts
//! - `[cluster]` — clustering threshold, signal weights, optional gates
//! - `[analytics]` — warehouse credentials and table names
//!
//! # Environment Variable Overrides
//!
//! Server fields use the `TRIAGE_` prefix (`TRIAGE_SERVER_HOST`,
//! `TRIAGE_SERVER_PORT`, `TRIAGE_SERVER_LOG_LEVEL`, `TRIAGE_SERVER_LOG_FORMAT`).
//! The operational knobs keep their conventional names:
//! - `OPENAI_API_KEY` → `openai.api_key` (absent → deterministic extractor,
//!   embedding and judge signals disabled)
//! - `CLUSTER_THRESHOLD`, `CLUSTER_WEIGHTS`, `CLUSTER_MIN_EMBEDDING`,
//!   `CLUSTER_MIN_LLM` → `[cluster]`
//! - `ANALYTICS_ACCOUNT`, `ANALYTICS_USER`, `ANALYTICS_PASSWORD`,
//!   `ANALYTICS_WAREHOUSE`, `ANALYTICS_DATABASE`, `ANALYTICS_SCHEMA` →
//!   `[analytics]` (absent → sink disabled)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level Triage configuration.
///
/// Parsed from `triage.toml` or constructed programmatically. Environment
/// variables override TOML values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Extraction pipeline settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// OpenAI access settings.
    #[serde(default)]
    pub openai: OpenAiConfig,
    /// Clustering settings.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Analytics warehouse settings.
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP port (default: 8460).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level (default: "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format: "text" (default) or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8460
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

/// Extraction pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Prefer the LLM extractor when an API key is configured (default: true).
    /// The deterministic extractor is always available as the fallback.
    #[serde(default = "default_true")]
    pub prefer_llm: bool,
    /// Extra synonym entries merged over the built-in canonicalization table
    /// (e.g. `blaze = "fire"`).
    #[serde(default)]
    pub synonyms: HashMap<String, String>,
    /// Extra hazard keywords merged over the built-in set.
    #[serde(default)]
    pub extra_hazards: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            prefer_llm: true,
            synonyms: HashMap::new(),
            extra_hazards: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// OpenAI access configuration.
///
/// The API key is only ever read from the environment; it is never written
/// back out by `example_toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key. Absent → LLM extractor, embeddings, and judge are disabled.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL (default: the public OpenAI endpoint).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Chat model for extraction and the same-incident judge.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Embedding model for clustering similarity.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Chat completion timeout in seconds (default: 8).
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_secs: u64,
    /// Embedding timeout in seconds (default: 4).
    #[serde(default = "default_embedding_timeout")]
    pub embedding_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            chat_timeout_secs: default_chat_timeout(),
            embedding_timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_chat_timeout() -> u64 {
    8
}
fn default_embedding_timeout() -> u64 {
    4
}

/// Clustering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Minimum combined score to assign a report to an existing incident
    /// (default: 0.65; higher = fewer merges).
    #[serde(default = "default_cluster_threshold")]
    pub threshold: f64,
    /// Comma-separated `embedding,llm,time,geo` weights summing to 1
    /// (default: "0.35,0.35,0.15,0.15").
    #[serde(default = "default_cluster_weights")]
    pub weights: String,
    /// Optional minimum embedding similarity gate on the best candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_embedding: Option<f64>,
    /// Optional minimum same-incident judge score gate on the best candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_llm: Option<f64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: default_cluster_threshold(),
            weights: default_cluster_weights(),
            min_embedding: None,
            min_llm: None,
        }
    }
}

fn default_cluster_threshold() -> f64 {
    0.65
}
fn default_cluster_weights() -> String {
    "0.35,0.35,0.15,0.15".to_string()
}

impl ClusterConfig {
    /// Parsed `(embedding, llm, time, geo)` weights; `None` when the string
    /// is malformed or does not sum to 1 (±0.01).
    pub fn parsed_weights(&self) -> Option<(f64, f64, f64, f64)> {
        parse_weights(&self.weights)
    }
}

/// Parse a comma-separated four-weight string.
pub fn parse_weights(s: &str) -> Option<(f64, f64, f64, f64)> {
    let parts: Vec<f64> = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() != 4 {
        return None;
    }
    let sum: f64 = parts.iter().sum();
    if (sum - 1.0).abs() > 0.01 {
        return None;
    }
    Some((parts[0], parts[1], parts[2], parts[3]))
}

/// Analytics warehouse configuration.
///
/// All credential fields absent → sink disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Warehouse account/host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Per-write timeout in seconds (default: 2).
    #[serde(default = "default_analytics_timeout")]
    pub timeout_secs: u64,
    /// Snapshot table name.
    #[serde(default = "default_snapshots_table")]
    pub snapshots_table: String,
    /// Timeline table name.
    #[serde(default = "default_timeline_table")]
    pub timeline_table: String,
    /// Chunk table name.
    #[serde(default = "default_chunks_table")]
    pub chunks_table: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            account: None,
            user: None,
            password: None,
            warehouse: None,
            database: None,
            schema: None,
            timeout_secs: default_analytics_timeout(),
            snapshots_table: default_snapshots_table(),
            timeline_table: default_timeline_table(),
            chunks_table: default_chunks_table(),
        }
    }
}

fn default_analytics_timeout() -> u64 {
    2
}
fn default_snapshots_table() -> String {
    "incident_snapshots".to_string()
}
fn default_timeline_table() -> String {
    "timeline_events".to_string()
}
fn default_chunks_table() -> String {
    "chunk_events".to_string()
}

impl AnalyticsConfig {
    /// Whether enough credentials are present to open a warehouse connection.
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.account) && set(&self.user) && set(&self.password) && set(&self.database)
    }
}

impl TriageConfig {
    /// Load configuration from a TOML file, apply env overrides, validate.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file '{}': {}", path, e))?;
        let mut config: TriageConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse '{}': {}", path, e))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults + env overrides (the no-config-file path).
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = TriageConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides onto the parsed config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TRIAGE_SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("TRIAGE_SERVER_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("TRIAGE_SERVER_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("TRIAGE_SERVER_LOG_FORMAT") {
            self.server.log_format = v;
        }

        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if !v.trim().is_empty() {
                self.openai.api_key = Some(v);
            }
        }

        if let Ok(v) = std::env::var("CLUSTER_THRESHOLD") {
            if let Ok(t) = v.trim().parse::<f64>() {
                self.cluster.threshold = t.clamp(0.0, 1.0);
            }
        }
        if let Ok(v) = std::env::var("CLUSTER_WEIGHTS") {
            if parse_weights(&v).is_some() {
                self.cluster.weights = v;
            }
        }
        if let Ok(v) = std::env::var("CLUSTER_MIN_EMBEDDING") {
            if let Ok(m) = v.trim().parse::<f64>() {
                self.cluster.min_embedding = Some(m.clamp(0.0, 1.0));
            }
        }
        if let Ok(v) = std::env::var("CLUSTER_MIN_LLM") {
            if let Ok(m) = v.trim().parse::<f64>() {
                self.cluster.min_llm = Some(m.clamp(0.0, 1.0));
            }
        }

        fn env_opt(var: &str) -> Option<String> {
            std::env::var(var).ok().filter(|v| !v.trim().is_empty())
        }
        if let Some(v) = env_opt("ANALYTICS_ACCOUNT") {
            self.analytics.account = Some(v);
        }
        if let Some(v) = env_opt("ANALYTICS_USER") {
            self.analytics.user = Some(v);
        }
        if let Some(v) = env_opt("ANALYTICS_PASSWORD") {
            self.analytics.password = Some(v);
        }
        if let Some(v) = env_opt("ANALYTICS_WAREHOUSE") {
            self.analytics.warehouse = Some(v);
        }
        if let Some(v) = env_opt("ANALYTICS_DATABASE") {
            self.analytics.database = Some(v);
        }
        if let Some(v) = env_opt("ANALYTICS_SCHEMA") {
            self.analytics.schema = Some(v);
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.cluster.threshold) {
            anyhow::bail!(
                "cluster.threshold {} outside [0, 1]",
                self.cluster.threshold
            );
        }
        if self.cluster.parsed_weights().is_none() {
            anyhow::bail!(
                "cluster.weights '{}' must be four comma-separated numbers summing to 1",
                self.cluster.weights
            );
        }
        for (name, gate) in [
            ("cluster.min_embedding", self.cluster.min_embedding),
            ("cluster.min_llm", self.cluster.min_llm),
        ] {
            if let Some(g) = gate {
                if !(0.0..=1.0).contains(&g) {
                    anyhow::bail!("{} {} outside [0, 1]", name, g);
                }
            }
        }
        if self.openai.chat_timeout_secs == 0 || self.openai.embedding_timeout_secs == 0 {
            anyhow::bail!("openai timeouts must be positive");
        }
        Ok(())
    }

    /// Commented example config, suitable for `--init-config`.
    pub fn example_toml_commented() -> String {
        r#"# Triage configuration file.
# Every value shown is the default; uncomment and edit what you need.
# Environment variables override file values (see crate docs).

[server]
# host = "0.0.0.0"
# port = 8460
# log_level = "info"       # trace | debug | info | warn | error
# log_format = "text"      # text | json

[extraction]
# Prefer the LLM extractor when OPENAI_API_KEY is set. The deterministic
# rule extractor is always the fallback.
# prefer_llm = true
# Extra canonicalization synonyms merged over the built-in table.
# [extraction.synonyms]
# blaze = "fire"

[openai]
# api_base = "https://api.openai.com/v1"
# chat_model = "gpt-4o-mini"
# embedding_model = "text-embedding-3-small"
# chat_timeout_secs = 8
# embedding_timeout_secs = 4

[cluster]
# threshold = 0.65
# weights = "0.35,0.35,0.15,0.15"   # embedding,llm,time,geo
# min_embedding = 0.4
# min_llm = 0.45

[analytics]
# Warehouse sink is disabled unless account/user/password/database are set.
# account = "analytics.example.com"
# user = "triage"
# password = ""            # prefer ANALYTICS_PASSWORD
# warehouse = ""
# database = "triage"
# schema = "public"
# timeout_secs = 2
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TriageConfig::default();
        assert_eq!(config.server.port, 8460);
        assert!((config.cluster.threshold - 0.65).abs() < 1e-12);
        assert_eq!(
            config.cluster.parsed_weights(),
            Some((0.35, 0.35, 0.15, 0.15))
        );
        assert!(config.extraction.prefer_llm);
        assert!(!config.analytics.is_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_weights() {
        assert_eq!(parse_weights("0.4,0.4,0.1,0.1"), Some((0.4, 0.4, 0.1, 0.1)));
        assert_eq!(parse_weights(" 0.25, 0.25 ,0.25,0.25 "), Some((0.25, 0.25, 0.25, 0.25)));
        assert!(parse_weights("0.5,0.5").is_none());
        assert!(parse_weights("0.5,0.5,0.5,0.5").is_none());
        assert!(parse_weights("a,b,c,d").is_none());
    }

    #[test]
    fn test_toml_roundtrip() {
        let toml_src = r#"
            [server]
            port = 9000

            [cluster]
            threshold = 0.7
            min_embedding = 0.4

            [extraction.synonyms]
            blaze = "fire"
        "#;
        let config: TriageConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!((config.cluster.threshold - 0.7).abs() < 1e-12);
        assert_eq!(config.cluster.min_embedding, Some(0.4));
        assert_eq!(
            config.extraction.synonyms.get("blaze").map(String::as_str),
            Some("fire")
        );
        // Untouched sections keep their defaults.
        assert_eq!(config.openai.chat_model, "gpt-4o-mini");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut config = TriageConfig::default();
        config.cluster.weights = "1,2,3".into();
        assert!(config.validate().is_err());
        config.cluster.weights = default_cluster_weights();
        config.cluster.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("CLUSTER_THRESHOLD", "0.8");
        std::env::set_var("CLUSTER_WEIGHTS", "0.4,0.4,0.1,0.1");
        std::env::set_var("CLUSTER_MIN_LLM", "0.45");
        std::env::set_var("ANALYTICS_ACCOUNT", "wh.example.com");
        let mut config = TriageConfig::default();
        config.apply_env_overrides();
        assert!((config.cluster.threshold - 0.8).abs() < 1e-12);
        assert_eq!(config.cluster.parsed_weights(), Some((0.4, 0.4, 0.1, 0.1)));
        assert_eq!(config.cluster.min_llm, Some(0.45));
        assert_eq!(config.analytics.account.as_deref(), Some("wh.example.com"));
        // Account alone is not enough to enable the sink.
        assert!(!config.analytics.is_configured());
        std::env::remove_var("CLUSTER_THRESHOLD");
        std::env::remove_var("CLUSTER_WEIGHTS");
        std::env::remove_var("CLUSTER_MIN_LLM");
        std::env::remove_var("ANALYTICS_ACCOUNT");
    }

    #[test]
    fn test_example_toml_parses() {
        let example = TriageConfig::example_toml_commented();
        let config: TriageConfig = toml::from_str(&example).unwrap();
        assert!(config.validate().is_ok());
    }
}
