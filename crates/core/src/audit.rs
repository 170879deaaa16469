//! Audit events — a fire-and-forget record of what the agent did.
//!
//! Sinks must never block or propagate errors into the chat path; a broken
//! audit log is a logging problem, not a chat problem.

use serde::{Deserialize, Serialize};

/// Everything worth an audit record, tagged for the JSON-lines format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A user message entered the runtime.
    UserInput {
        session_id: String,
        sender_id: String,
        /// First part of the text, enough to identify the turn
        preview: String,
    },

    /// The model requested a tool call.
    ToolCallIssued {
        session_id: String,
        tool: String,
        arguments: String,
    },

    /// A tool call finished (success or contained failure).
    ToolResult {
        session_id: String,
        tool: String,
        success: bool,
        preview: String,
    },

    /// A confirm-required tool asked the human.
    ConfirmRequested {
        session_id: String,
        sender_id: String,
        tool: String,
    },

    /// The human (or a broken handshake) answered.
    ConfirmResolved {
        session_id: String,
        tool: String,
        allowed: bool,
    },

    /// A confirm-required tool ran in a context with no handler.
    ConfirmHandlerMissing { session_id: String, tool: String },
}

impl AuditEvent {
    /// Stable name of the event kind, matching the serialized tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::UserInput { .. } => "user_input",
            AuditEvent::ToolCallIssued { .. } => "tool_call_issued",
            AuditEvent::ToolResult { .. } => "tool_result",
            AuditEvent::ConfirmRequested { .. } => "confirm_requested",
            AuditEvent::ConfirmResolved { .. } => "confirm_resolved",
            AuditEvent::ConfirmHandlerMissing { .. } => "confirm_handler_missing",
        }
    }
}

/// An audit sink. `record` is synchronous and must swallow its own errors.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Truncate text for audit previews.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}
