//! Provider client port and the normalized request/response shapes.
//!
//! The engine never sees a provider wire format. Clients translate the
//! normalized shapes to whatever their provider speaks and classify failures
//! transient vs. fatal so the retry policy can act on them.

pub mod retry;

pub use retry::RetryPolicy;

use crate::error::ProviderError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of one request turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Developer/system instruction turn.
    #[serde(alias = "developer")]
    System,
    User,
    Assistant,
    Tool,
}

/// A single turn in a normalized request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub role: MessageRole,
    pub text: String,
}

impl RequestMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Tool declaration offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: Value,
}

/// Tool call recorded on a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Provider-agnostic request: message list, model identifier, streaming flag,
/// tool declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub model: String,
    pub messages: Vec<RequestMessage>,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Provider-agnostic response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub model: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolRecord>,
    #[serde(default)]
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

/// One chunk of a streaming response. The terminal chunk carries a finish
/// reason and the final usage counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolRecord>,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            finish_reason: None,
            usage: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn terminal(finish_reason: impl Into<String>, usage: Usage) -> Self {
        Self {
            delta: String::new(),
            finish_reason: Some(finish_reason.into()),
            usage: Some(usage),
            tool_calls: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Assemble buffered stream chunks into a response equivalent to the
/// non-streaming path for the same content.
pub fn assemble_response(model: &str, chunks: &[StreamChunk]) -> NormalizedResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut usage = Usage::default();
    let mut finish_reason = None;
    for chunk in chunks {
        text.push_str(&chunk.delta);
        tool_calls.extend(chunk.tool_calls.iter().cloned());
        if let Some(chunk_usage) = chunk.usage {
            usage = chunk_usage;
        }
        if chunk.finish_reason.is_some() {
            finish_reason = chunk.finish_reason.clone();
        }
    }
    NormalizedResponse {
        model: model.to_string(),
        text,
        tool_calls,
        usage,
        finish_reason,
    }
}

/// Finite lazy sequence of stream chunks ending in a terminal chunk.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

/// Port to the language-model provider. Implementations own connection and
/// backoff state and are shared across invocations.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn send_request(
        &self,
        request: &NormalizedRequest,
    ) -> Result<NormalizedResponse, ProviderError>;

    async fn stream_request(
        &self,
        request: &NormalizedRequest,
    ) -> Result<ChunkStream, ProviderError>;
}
