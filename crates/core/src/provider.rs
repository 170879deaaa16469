//! Provider trait — the abstraction over OpenAI-compatible LLM backends.
//!
//! A provider turns a message list plus options into an incremental event
//! stream: zero or more text deltas followed by exactly one terminal `Done`
//! event carrying any assembled tool calls and usage statistics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage statistics, reported by the backend at stream end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A resolved model identifier: which provider, which concrete model name.
///
/// Callers write either explicit `"provider/model-name"` or a bare
/// `"model-name"`; the router resolves both into this form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider_id: String,
    pub model_name: String,
}

impl ModelSpec {
    pub fn new(provider_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_name: model_name.into(),
        }
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_name)
    }
}

/// Options for one chat generation.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Concrete model name understood by the backend
    pub model: String,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,

    /// Cooperative cancellation. Firing it aborts the in-flight request,
    /// suppresses retry, and ends the stream with a terminal event.
    pub cancel: CancellationToken,
}

impl ChatOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One item in a chat event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// An incremental piece of assistant text.
    Delta { text: String },

    /// Terminal event. Exactly one per stream, even on cancellation.
    Done {
        /// Which model produced the reply
        model: String,

        /// Usage statistics when the backend reported them
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,

        /// Fully assembled tool calls, sorted by slot index
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
}

impl ChatEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, ChatEvent::Done { .. })
    }
}

/// The event stream handed back by a provider: deltas and errors arrive as
/// the reader task decodes them, ending with one `Done`.
pub type ChatStream = mpsc::Receiver<std::result::Result<ChatEvent, ProviderError>>;

/// The core Provider trait.
///
/// Every OpenAI-compatible backend endpoint implements this. The router
/// calls `chat` without knowing which backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The provider id used in model specs (e.g. "deepseek", "qwen").
    fn id(&self) -> &str;

    /// Start a generation. Setup failures (auth, quota, exhausted retry)
    /// surface as the returned error; once a stream is handed back, decode
    /// problems flow through it in-band.
    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> std::result::Result<ChatStream, ProviderError>;
}
