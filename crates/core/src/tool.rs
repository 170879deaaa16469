//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what let the model act: read a file, check the clock, write a
//! note. Each tool declares a permission level and whether a human must
//! confirm it before it runs; the registry in `crabwire-tools` enforces
//! both and contains every failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::AuditSink;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Who may invoke a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPermission {
    /// Any sender
    #[default]
    Public,
    /// Only senders in the configured owner set
    Owner,
}

/// A confirmation request shown to a human before a flagged tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    /// Tool about to execute
    pub name: String,

    /// Parsed arguments it would receive
    pub arguments: serde_json::Value,

    /// Session the request belongs to
    pub session_id: String,

    /// Sender who triggered it
    pub sender_id: String,
}

/// Error raised by a confirmation handler (channel down, reply timeout).
/// The registry treats it exactly like an explicit "no".
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConfirmError(pub String);

/// The confirmation handshake, supplied per-call by the channel adapter.
///
/// Implementations typically push a prompt to the human and wait for a
/// reply with their own timeout. May suspend arbitrarily long.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ConfirmRequest)
    -> std::result::Result<bool, ConfirmError>;
}

/// Per-call execution context threaded through the registry into tools.
#[derive(Clone)]
pub struct ToolContext {
    /// Session the call belongs to
    pub session_id: String,

    /// Sender who triggered the call
    pub sender_id: String,

    /// Whether the sender is an owner
    pub is_owner: bool,

    /// Confirmation handshake, when the channel supports one
    pub confirm: Option<Arc<dyn Confirmer>>,

    /// Audit sink, when configured
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl ToolContext {
    /// A minimal context: anonymous owner, no confirmation, no audit.
    pub fn new(session_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            sender_id: sender_id.into(),
            is_owner: true,
            confirm: None,
            audit: None,
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("sender_id", &self.sender_id)
            .field("is_owner", &self.is_owner)
            .field("confirm", &self.confirm.is_some())
            .field("audit", &self.audit.is_some())
            .finish()
    }
}

/// What a tool body reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool considers the call successful
    pub success: bool,

    /// Output text fed back to the model
    pub content: String,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    pub fn fail(content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
        }
    }
}

/// The registry's verdict on one tool call. Never an `Err` — failures are
/// data the agent loop feeds back into the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool ran and reported success.
    Success { content: String },

    /// Unknown tool, permission miss, or the tool itself failed.
    Failure { content: String },

    /// The human declined (or the handshake broke). The agent loop stops
    /// the round early instead of asking the model to talk past a refusal.
    Declined { content: String },
}

impl ToolOutcome {
    pub fn content(&self) -> &str {
        match self {
            ToolOutcome::Success { content }
            | ToolOutcome::Failure { content }
            | ToolOutcome::Declined { content } => content,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    /// True when the agent loop should end the tool round without another
    /// model call.
    pub fn stops_round(&self) -> bool {
        matches!(self, ToolOutcome::Declined { .. })
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "current_time", "write_file").
    fn name(&self) -> &str;

    /// Description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Who may call this tool.
    fn permission(&self) -> ToolPermission {
        ToolPermission::Public
    }

    /// Whether a human must confirm each invocation.
    fn confirm_required(&self) -> bool {
        false
    }

    /// Run the tool. Soft failures go in `ToolResult::fail`; hard failures
    /// may be returned as `ToolError` — the registry contains both.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert into a definition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
