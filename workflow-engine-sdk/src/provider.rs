//! Provider contract: a narrow streaming interface to a language model

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

/// Token accounting reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Terminal result of a provider stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub stop_reason: String,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl AgentResult {
    /// Result with `end_turn` stop reason and no text
    pub fn with_output(output: Value) -> Self {
        Self {
            stop_reason: "end_turn".to_string(),
            output,
            text: None,
            thinking: None,
            usage: None,
        }
    }
}

/// One item of a provider stream. A successful stream carries exactly one
/// `Result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ProviderEvent {
    TextDelta { delta: String },
    ThinkingDelta { delta: String },
    ToolCall { id: String, name: String, input: Value },
    ToolResult { id: String, output: Value, is_error: bool },
    Result(AgentResult),
    SessionInit { session_id: String },
    Stop { reason: String },
    Usage(TokenUsage),
}

/// Everything a provider needs for one structured call
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub prompt: String,
    pub output_schema: Value,
    pub provider_options: Value,
    /// Cancelled when the execution is aborted. Providers should stop any
    /// outstanding network call when it fires.
    pub abort_signal: CancellationToken,
}

impl ProviderRequest {
    /// Deterministic content hash of the logical request.
    ///
    /// Only `prompt`, `output_schema` and `provider_options` take part, so the
    /// same logical call hashes identically regardless of when it was made.
    /// JSON objects serialize with sorted keys, which keeps the hash stable
    /// across key insertion order.
    pub fn content_hash(&self) -> String {
        request_hash(&self.prompt, &self.output_schema, &self.provider_options)
    }
}

/// Hash of `{prompt, outputSchema, providerOptions}` as lowercase hex SHA-256
pub fn request_hash(prompt: &str, output_schema: &Value, provider_options: &Value) -> String {
    let canonical = canonicalize(&serde_json::json!({
        "prompt": prompt,
        "outputSchema": output_schema,
        "providerOptions": provider_options,
    }));
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

// Rebuild objects with keys inserted in sorted order so the encoding does not
// depend on whether serde_json preserves insertion order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Stream of provider events
pub type ProviderStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

/// A language-model backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in logs and recordings
    fn name(&self) -> &str;

    /// Start a streaming call
    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError>;
}
