//! Agent-level streaming events.
//!
//! `AgentEvent` wraps provider-level chat events into the higher-level
//! sequence a caller renders: text deltas interleaved with tool-invocation
//! records, closed by exactly one terminal event.

use crabwire_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the agent runtime during one chat turn.
///
/// - `delta`     — partial assistant text
/// - `tool_call` — a requested tool ran (or was refused); carries the result
/// - `done`      — the turn is over, including after cancellation
/// - `error`     — the turn failed; terminal like `done`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Partial assistant text.
    Delta { text: String },

    /// One tool call completed, successfully or not.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
        output: String,
        success: bool,
    },

    /// The turn finished. Model and usage are reported when the backend
    /// provided them.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The turn failed with a classified, user-presentable message.
    Error { message: String },
}

impl AgentEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::ToolCall { .. } => "tool_call",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// True for the events that end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
