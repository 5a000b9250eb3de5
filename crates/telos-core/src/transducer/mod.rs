//! LLM Transducer Interface
//!
//! The language bridge is an external collaborator; this module carries its
//! interface contract - the `transduce` request/response envelope and the
//! `textToSchema` method - plus a deterministic stub used offline and under
//! test. Transient failures are retried up to three times with back-off
//! before surfacing.
//!
//! The stub validates its own output against the requested schema and
//! repairs invalid generations, so delivered adherence stays high even when
//! the chaos conductor injects schema violations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Attempts before a transient transducer failure surfaces
pub const MAX_ATTEMPTS: u32 = 3;

/// Base back-off between attempts
pub const RETRY_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Transducer error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum TransducerError {
    /// Malformed request; never retried
    #[error("Invalid transducer request: {0}")]
    InvalidRequest(String),
    /// Transient failure (timeout, rate limit); retried with back-off
    #[error("Transducer unavailable: {0}")]
    Unavailable(String),
    /// The result did not conform to the requested schema after repair
    #[error("Schema violation: {0}")]
    SchemaViolation(String),
}

/// Transducer result type
pub type Result<T> = std::result::Result<T, TransducerError>;

// ============================================================================
// ENVELOPE
// ============================================================================

/// Request envelope: a map with `method`, `text` and `schema`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransduceRequest {
    /// RPC method, e.g. `textToSchema`
    pub method: String,
    /// Source text
    pub text: String,
    /// Target schema (JSON-schema-shaped object)
    pub schema: Value,
}

impl TransduceRequest {
    /// Build a `textToSchema` request
    pub fn text_to_schema(text: impl Into<String>, schema: Value) -> Self {
        Self {
            method: "textToSchema".to_string(),
            text: text.into(),
            schema,
        }
    }
}

/// Response envelope: `{success, result | error}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransduceResponse {
    /// Whether the transduction succeeded
    pub success: bool,
    /// The schema-conforming result on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure detail otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// TRAIT
// ============================================================================

/// The language-bridge seam
#[async_trait]
pub trait LlmTransducer: Send + Sync {
    /// Process one request envelope
    async fn transduce(&self, request: TransduceRequest) -> Result<TransduceResponse>;

    /// Convenience wrapper for the `textToSchema` method
    async fn text_to_schema(&self, text: &str, schema: &Value) -> Result<Value> {
        let response = self
            .transduce(TransduceRequest::text_to_schema(text, schema.clone()))
            .await?;
        match (response.success, response.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(TransducerError::SchemaViolation(
                response
                    .error
                    .unwrap_or_else(|| "empty result".to_string()),
            )),
        }
    }
}

/// Drive `transduce` with the transient-failure retry policy
pub async fn transduce_with_retry(
    transducer: &dyn LlmTransducer,
    request: TransduceRequest,
) -> Result<TransduceResponse> {
    let mut last_error = None;
    for attempt in 0..MAX_ATTEMPTS {
        match transducer.transduce(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(TransducerError::Unavailable(reason)) => {
                tracing::warn!(attempt, %reason, "transducer unavailable; backing off");
                last_error = Some(TransducerError::Unavailable(reason));
                tokio::time::sleep(RETRY_BACKOFF * (attempt + 1)).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| TransducerError::Unavailable("retries exhausted".into())))
}

// ============================================================================
// SCHEMA VALIDATION
// ============================================================================

/// Check that `value` is an object carrying every property the schema names
pub fn conforms_to_schema(value: &Value, schema: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        // A schema with no properties accepts any object
        return true;
    };
    properties.keys().all(|key| object.contains_key(key))
}

// ============================================================================
// DETERMINISTIC STUB
// ============================================================================

/// Adherence counters exposed to the chaos conductor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceStats {
    /// Requests handled
    pub requests: u64,
    /// Requests whose delivered result conformed to the schema
    pub adherent: u64,
    /// Raw invalid generations observed before repair
    pub violations: u64,
}

impl AdherenceStats {
    /// Delivered adherence rate; 1.0 before any traffic
    pub fn rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.adherent as f64 / self.requests as f64
        }
    }
}

/// Offline transducer producing deterministic, schema-shaped results.
///
/// Fills each schema property from the source text: `title` takes the
/// leading words, `summary` a truncated rendering, list-typed properties
/// the most frequent tokens. The chaos hook makes first generations
/// invalid so the repair path gets exercised.
#[derive(Debug, Default)]
pub struct StubTransducer {
    requests: AtomicU64,
    adherent: AtomicU64,
    violations: AtomicU64,
    /// Chaos hook: emit an invalid first generation per request
    inject_schema_violations: AtomicBool,
}

impl StubTransducer {
    /// Create a stub with clean counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle injected schema violations (chaos hook)
    pub fn set_schema_violation_mode(&self, on: bool) {
        self.inject_schema_violations.store(on, Ordering::SeqCst);
    }

    /// Adherence counters
    pub fn adherence(&self) -> AdherenceStats {
        AdherenceStats {
            requests: self.requests.load(Ordering::SeqCst),
            adherent: self.adherent.load(Ordering::SeqCst),
            violations: self.violations.load(Ordering::SeqCst),
        }
    }

    fn generate(&self, text: &str, schema: &Value, sabotage: bool) -> Value {
        if sabotage {
            // Deliberately drop every schema property
            return json!({ "malformed": true });
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let title: String = words.iter().take(6).copied().collect::<Vec<_>>().join(" ");
        let summary: String = words.iter().take(40).copied().collect::<Vec<_>>().join(" ");

        let mut tokens: Vec<String> = words
            .iter()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| w.len() > 3)
            .collect();
        tokens.sort();
        tokens.dedup();
        tokens.truncate(8);

        let mut result = serde_json::Map::new();
        if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
            for (name, prop) in properties {
                let kind = prop.get("type").and_then(|t| t.as_str()).unwrap_or("string");
                let value = match (name.as_str(), kind) {
                    ("title", _) => json!(title),
                    ("summary", _) | ("summary_text", _) => json!(summary),
                    (_, "array") => json!(tokens),
                    (_, "number") => json!(tokens.len()),
                    _ => json!(summary),
                };
                result.insert(name.clone(), value);
            }
        }
        Value::Object(result)
    }
}

#[async_trait]
impl LlmTransducer for StubTransducer {
    async fn transduce(&self, request: TransduceRequest) -> Result<TransduceResponse> {
        if request.method != "textToSchema" {
            return Err(TransducerError::InvalidRequest(format!(
                "unknown method '{}'",
                request.method
            )));
        }
        if request.text.trim().is_empty() {
            return Err(TransducerError::InvalidRequest("empty text".to_string()));
        }

        self.requests.fetch_add(1, Ordering::SeqCst);

        let mut result = self.generate(
            &request.text,
            &request.schema,
            self.inject_schema_violations.load(Ordering::SeqCst),
        );

        // Repair loop: regenerate cleanly when the first pass violates
        let mut attempts = 1;
        while !conforms_to_schema(&result, &request.schema) && attempts < MAX_ATTEMPTS {
            self.violations.fetch_add(1, Ordering::SeqCst);
            result = self.generate(&request.text, &request.schema, false);
            attempts += 1;
        }

        if conforms_to_schema(&result, &request.schema) {
            self.adherent.fetch_add(1, Ordering::SeqCst);
            Ok(TransduceResponse {
                success: true,
                result: Some(result),
                error: None,
            })
        } else {
            Ok(TransduceResponse {
                success: false,
                result: None,
                error: Some("result does not conform to schema".to_string()),
            })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
