//! OpenAI-backed pipelines.
//!
//! A thin chat/embeddings client over `reqwest`, plus the three capability
//! implementations built on it:
//! - [`LlmExtractor`] — structured claim extraction with hallucination
//!   grounding and a deterministic fallback
//! - [`OpenAiEmbedder`] — report/summary embeddings for clustering
//! - [`OpenAiJudge`] — the same-incident score
//!
//! All calls carry bounded timeouts. Failures degrade (fallback extractor,
//! missing clustering signal); they never surface to the caller.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use triage_core::{Claim, ClaimType, IncidentSnapshot};

use crate::grounding::{cap_confidence, UNGROUNDED_CAP};
use crate::rules::RuleExtractor;
use crate::{Embedder, Extractor, SameIncidentJudge};

/// Default confidence assumed when the model omits one.
const DEFAULT_LLM_CONFIDENCE: f64 = 0.6;
/// Incident type classification arrives without a usable model confidence;
/// grounding and the Bayesian merge decide the rest.
const INCIDENT_TYPE_LLM_CONFIDENCE: f64 = 0.7;

const EXTRACTION_PROMPT: &str = r#"You are extracting structured evidence from one emergency-call transcript chunk. Extract ONLY what is explicitly stated. Do not infer.

Return a JSON object with these optional keys (omit keys the chunk does not state):
- "locations": [ { "value": "<place/floor/room>", "confidence": 0.0-1.0 }, ... ]
- "incident_type": { "value": "fire|gunshot|medical|assault|gas leak|flood|collapse|accident|break-in|missing|overdose|suicide" }
- "people_estimate": { "value": <number>, "confidence": 0.0-1.0 }
- "hazards": [ { "value": "<keyword>", "confidence": 0.0-1.0 }, ... ]

Use confidence for how certain the speaker sounds; hedging ("I think", "maybe") lowers it. Use hazards only for situational dangers (smoke, gas, explosion, weapon), never for the main incident category. Return null if the chunk states nothing relevant. Respond with JSON only, no prose."#;

const SAME_INCIDENT_PROMPT: &str = r#"You are judging whether a NEW emergency report describes the SAME incident as an EXISTING incident summary.

Existing incident summary:
"""
{incident}
"""

New report summary:
"""
{report}
"""

Output a single number in [0, 1]:
- 1.0 = almost certainly the same incident (same place, type, time window).
- 0.7-0.9 = likely same (same building/area, same incident type).
- 0.4-0.6 = unclear.
- 0.1-0.3 = likely different.
- 0.0 = clearly different.

Respond with ONLY the number."#;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Minimal OpenAI API client for chat completions and embeddings.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    api_base: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    chat_timeout: Duration,
    embedding_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
        chat_timeout: Duration,
        embedding_timeout: Duration,
    ) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
            chat_timeout,
            embedding_timeout,
        }
    }

    /// Single-turn chat completion; returns the assistant text.
    pub async fn chat(&self, prompt: String) -> Result<String> {
        let request = ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.1,
        };
        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.chat_timeout)
            .json(&request)
            .send()
            .await
            .context("chat completion request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("chat completion status {}", response.status()));
        }
        let body: ChatResponse = response
            .json()
            .await
            .context("chat completion body decode failed")?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no content"))
    }

    /// Embed a single text (truncated to the model's comfortable input size).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input: String = text.trim().chars().take(8000).collect();
        if input.is_empty() {
            return Err(anyhow!("empty embedding input"));
        }
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input,
        };
        let response = self
            .http
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.embedding_timeout)
            .json(&request)
            .send()
            .await
            .context("embedding request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("embedding status {}", response.status()));
        }
        let body: EmbeddingResponse =
            response.json().await.context("embedding body decode failed")?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("embedding response empty"))
    }
}

// ---------------------------------------------------------------------------
// LLM extractor
// ---------------------------------------------------------------------------

/// LLM-backed extractor with grounding and deterministic fallback.
pub struct LlmExtractor {
    client: OpenAiClient,
    fallback: RuleExtractor,
}

impl LlmExtractor {
    pub fn new(client: OpenAiClient, fallback: RuleExtractor) -> Self {
        Self { client, fallback }
    }

    fn build_prompt(text: &str, context: Option<&IncidentSnapshot>) -> String {
        let mut prompt = String::from(EXTRACTION_PROMPT);
        if let Some(snapshot) = context.filter(|s| s.has_content()) {
            prompt.push_str("\n\n--- CURRENT INCIDENT STATE (for context; report only what the new chunk adds or reinforces) ---\n");
            prompt.push_str(&snapshot.summary_text());
        }
        prompt.push_str("\n\n--- NEW TRANSCRIPT CHUNK ---\n\"\"\"\n");
        prompt.push_str(text);
        prompt.push_str("\n\"\"\"");
        prompt
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        text: &str,
        now: DateTime<Utc>,
        context: Option<&IncidentSnapshot>,
    ) -> Vec<Claim> {
        let source = text.trim();
        if source.is_empty() {
            return Vec::new();
        }
        let prompt = Self::build_prompt(source, context);
        match self.client.chat(prompt).await {
            Ok(raw) => match parse_extraction(&raw, source, now) {
                Ok(claims) if !claims.is_empty() => claims,
                Ok(_) => {
                    debug!("llm extraction returned no claims; trying rule extractor");
                    self.fallback.extract_claims(source, now)
                }
                Err(err) => {
                    warn!(%err, "llm extraction parse failed; falling back to rule extractor");
                    self.fallback.extract_claims(source, now)
                }
            },
            Err(err) => {
                warn!(%err, "llm extraction call failed; falling back to rule extractor");
                self.fallback.extract_claims(source, now)
            }
        }
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Strip a markdown code fence if present.
fn strip_json_fence(raw: &str) -> &str {
    let s = raw.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

/// Parse the model's JSON into claims, applying grounding caps.
///
/// Exposed for tests; the extractor falls back to rules when this fails.
pub fn parse_extraction(raw: &str, source: &str, now: DateTime<Utc>) -> Result<Vec<Claim>> {
    let stripped = strip_json_fence(raw);
    let data: Value = match serde_json::from_str(stripped) {
        Ok(v) => v,
        Err(first_err) => {
            // Rescue parse: take the outermost brace span.
            let rescued = stripped
                .find('{')
                .and_then(|start| stripped.rfind('}').map(|end| &stripped[start..=end]))
                .and_then(|span| serde_json::from_str::<Value>(span).ok());
            rescued.ok_or_else(|| anyhow!("invalid extraction JSON: {}", first_err))?
        }
    };
    let obj = match data {
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) => map,
        other => {
            return Err(anyhow!(
                "extraction JSON is not an object (got {})",
                type_name(&other)
            ))
        }
    };

    let mut claims = Vec::new();

    if let Some(Value::Array(locations)) = obj.get("locations") {
        for entry in locations {
            if let Some((value, confidence)) = value_and_confidence(entry) {
                let confidence = cap_confidence(confidence, source, &value, ClaimType::Location);
                if let Ok(claim) =
                    Claim::new(ClaimType::Location, value.as_str(), confidence, source, now)
                {
                    claims.push(claim);
                }
            }
        }
    }

    if let Some(entry) = obj.get("incident_type").filter(|v| !v.is_null()) {
        let value = match entry {
            Value::String(s) => Some(s.trim().to_lowercase()),
            Value::Object(_) => value_and_confidence(entry).map(|(v, _)| v.to_lowercase()),
            _ => None,
        };
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            let confidence = cap_confidence(
                INCIDENT_TYPE_LLM_CONFIDENCE,
                source,
                &value,
                ClaimType::IncidentType,
            );
            if let Ok(claim) =
                Claim::new(ClaimType::IncidentType, value.as_str(), confidence, source, now)
            {
                claims.push(claim);
            }
        }
    }

    if let Some(entry) = obj.get("people_estimate").filter(|v| !v.is_null()) {
        if let Some((value, confidence)) = value_and_confidence(entry) {
            if let Some(n) = first_number(&value) {
                let confidence =
                    cap_confidence(confidence, source, &value, ClaimType::PeopleEstimate);
                if let Ok(claim) =
                    Claim::new(ClaimType::PeopleEstimate, n, confidence, source, now)
                {
                    claims.push(claim);
                }
            }
        }
    }

    if let Some(Value::Array(hazards)) = obj.get("hazards") {
        for entry in hazards {
            if let Some((value, confidence)) = value_and_confidence(entry) {
                let value = value.to_lowercase();
                let confidence = cap_confidence(confidence, source, &value, ClaimType::Hazard);
                if let Ok(claim) =
                    Claim::new(ClaimType::Hazard, value.as_str(), confidence, source, now)
                {
                    claims.push(claim);
                }
            }
        }
    }

    Ok(claims)
}

/// Pull `{value, confidence?}` out of an object, or treat a bare scalar as
/// the value with the default confidence.
fn value_and_confidence(entry: &Value) -> Option<(String, f64)> {
    match entry {
        Value::Object(map) => {
            let value = match map.get("value")? {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            if value.is_empty() {
                return None;
            }
            let confidence = map
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_LLM_CONFIDENCE)
                .clamp(0.0, 1.0);
            Some((value, confidence))
        }
        Value::String(s) if !s.trim().is_empty() => {
            Some((s.trim().to_string(), DEFAULT_LLM_CONFIDENCE))
        }
        Value::Number(n) => Some((n.to_string(), DEFAULT_LLM_CONFIDENCE)),
        _ => None,
    }
}

/// First number embedded in a string ("2-3" → 2.0).
fn first_number(s: &str) -> Option<f64> {
    let mut start = None;
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() || c == '.' {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(st) = start {
            return s[st..i].parse().ok();
        }
    }
    start.and_then(|st| s[st..].parse().ok())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Embedder & Judge
// ---------------------------------------------------------------------------

/// Embeddings for clustering similarity.
pub struct OpenAiEmbedder {
    client: OpenAiClient,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(text).await
    }
}

/// LLM same-incident judgment.
pub struct OpenAiJudge {
    client: OpenAiClient,
}

impl OpenAiJudge {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SameIncidentJudge for OpenAiJudge {
    async fn same_incident_score(
        &self,
        incident_summary: &str,
        report_summary: &str,
    ) -> Result<f64> {
        let incident: String = incident_summary.trim().chars().take(2000).collect();
        let report: String = report_summary.trim().chars().take(2000).collect();
        let prompt = SAME_INCIDENT_PROMPT
            .replace("{incident}", &incident)
            .replace("{report}", &report);
        let raw = self.client.chat(prompt).await?;
        parse_score(&raw).ok_or_else(|| anyhow!("judge returned no number: {:?}", raw))
    }
}

/// First number in the judge's reply, clamped to [0, 1].
pub fn parse_score(raw: &str) -> Option<f64> {
    first_number(raw).map(|n| n.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use triage_core::ClaimValue;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_full_extraction() {
        let raw = r#"{
            "locations": [{"value": "third floor", "confidence": 0.8}],
            "incident_type": {"value": "fire"},
            "people_estimate": {"value": "3", "confidence": 0.7},
            "hazards": [{"value": "smoke", "confidence": 0.6}]
        }"#;
        let claims = parse_extraction(
            raw,
            "fire on the third floor, smoke, three people trapped",
            t0(),
        )
        .unwrap();
        assert_eq!(claims.len(), 4);
        let t = claims
            .iter()
            .find(|c| c.claim_type == ClaimType::IncidentType)
            .unwrap();
        assert_eq!(t.value, ClaimValue::Text("fire".into()));
        assert!(t.confidence <= 0.9);
        let p = claims
            .iter()
            .find(|c| c.claim_type == ClaimType::PeopleEstimate)
            .unwrap();
        assert_eq!(p.value, ClaimValue::Number(3.0));
    }

    #[test]
    fn test_ungrounded_incident_type_capped() {
        let raw = r#"{"incident_type": {"value": "assault"}}"#;
        let claims = parse_extraction(raw, "someone was hurt", t0()).unwrap();
        assert_eq!(claims.len(), 1);
        assert!(claims[0].confidence <= UNGROUNDED_CAP);
    }

    #[test]
    fn test_grounded_confidence_capped_at_09() {
        let raw = r#"{"hazards": [{"value": "smoke", "confidence": 1.0}]}"#;
        let claims = parse_extraction(raw, "so much smoke in here", t0()).unwrap();
        assert!((claims[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_code_fence_stripped() {
        let raw = "```json\n{\"incident_type\": \"fire\"}\n```";
        let claims = parse_extraction(raw, "fire!", t0()).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].value, ClaimValue::Text("fire".into()));
    }

    #[test]
    fn test_rescue_parse_from_prose() {
        let raw = "Sure! Here is the JSON: {\"incident_type\": {\"value\": \"flood\"}} Hope that helps.";
        let claims = parse_extraction(raw, "water flooding the basement", t0()).unwrap();
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn test_null_and_garbage() {
        assert!(parse_extraction("null", "text", t0()).unwrap().is_empty());
        assert!(parse_extraction("not json at all", "text", t0()).is_err());
        assert!(parse_extraction("[1,2,3]", "text", t0()).is_err());
    }

    #[test]
    fn test_people_range_takes_first_number() {
        let raw = r#"{"people_estimate": {"value": "2-3", "confidence": 0.7}}"#;
        let claims = parse_extraction(raw, "two or three people trapped", t0()).unwrap();
        assert_eq!(claims[0].value, ClaimValue::Number(2.0));
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("0.85"), Some(0.85));
        assert_eq!(parse_score("Score: 0.3 (likely different)"), Some(0.3));
        assert_eq!(parse_score("2"), Some(1.0));
        assert_eq!(parse_score("no idea"), None);
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("2-3"), Some(2.0));
        assert_eq!(first_number("about 12 people"), Some(12.0));
        assert_eq!(first_number("none"), None);
    }
}
