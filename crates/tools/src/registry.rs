//! Tool registry — lookup, permission gating, and contained execution.
//!
//! `execute` never returns an error. Unknown tools, permission misses,
//! declined confirmations, and tool crashes all come back as a
//! [`ToolOutcome`] the agent loop feeds to the model as data.

use std::collections::HashMap;

use crabwire_core::audit::AuditEvent;
use crabwire_core::error::ToolError;
use crabwire_core::provider::ToolDefinition;
use crabwire_core::tool::{ConfirmRequest, Tool, ToolContext, ToolOutcome, ToolPermission};
use tracing::{debug, warn};

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get the tool definitions a sender is allowed to see
/// 2. Look up and execute tools when the model requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Names are unique; a second registration under the
    /// same name is a wiring bug, not something to silently paper over.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Tool definitions visible to this sender. Owner-gated tools are
    /// omitted entirely for non-owners, so the model never asks for them.
    pub fn definitions_for(&self, is_owner: bool) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|t| t.permission() == ToolPermission::Public || is_owner)
            .map(|t| t.to_definition())
            .collect()
    }

    /// Execute one tool call through the full gate: existence, permission,
    /// confirmation, then the tool body.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::Failure {
                content: format!("Tool \"{name}\" does not exist"),
            };
        };

        if tool.permission() == ToolPermission::Owner && !ctx.is_owner {
            warn!(tool = name, sender = %ctx.sender_id, "Owner-only tool denied");
            return ToolOutcome::Failure {
                content: format!("Tool \"{name}\" is restricted to the owner. Access denied."),
            };
        }

        if tool.confirm_required() {
            let Some(confirmer) = ctx.confirm.as_ref() else {
                record(
                    ctx,
                    AuditEvent::ConfirmHandlerMissing {
                        session_id: ctx.session_id.clone(),
                        tool: name.to_string(),
                    },
                );
                return ToolOutcome::Failure {
                    content: format!(
                        "Tool \"{name}\" requires confirmation, but this channel cannot ask."
                    ),
                };
            };

            record(
                ctx,
                AuditEvent::ConfirmRequested {
                    session_id: ctx.session_id.clone(),
                    sender_id: ctx.sender_id.clone(),
                    tool: name.to_string(),
                },
            );

            let request = ConfirmRequest {
                name: name.to_string(),
                arguments: arguments.clone(),
                session_id: ctx.session_id.clone(),
                sender_id: ctx.sender_id.clone(),
            };

            let allowed = match confirmer.confirm(&request).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    warn!(tool = name, error = %e, "Confirmation handshake failed");
                    record(
                        ctx,
                        AuditEvent::ConfirmResolved {
                            session_id: ctx.session_id.clone(),
                            tool: name.to_string(),
                            allowed: false,
                        },
                    );
                    return ToolOutcome::Declined {
                        content: format!("Confirmation failed: {e}"),
                    };
                }
            };

            record(
                ctx,
                AuditEvent::ConfirmResolved {
                    session_id: ctx.session_id.clone(),
                    tool: name.to_string(),
                    allowed,
                },
            );

            if !allowed {
                return ToolOutcome::Declined {
                    content: format!("User declined to run \"{name}\""),
                };
            }
        }

        match tool.execute(arguments, ctx).await {
            Ok(result) if result.success => ToolOutcome::Success {
                content: result.content,
            },
            Ok(result) => ToolOutcome::Failure {
                content: result.content,
            },
            Err(e) => {
                warn!(tool = name, error = %e, "Tool execution failed");
                ToolOutcome::Failure {
                    content: format!("Tool execution failed: {e}"),
                }
            }
        }
    }

    /// Number of registered tools.
    pub fn size(&self) -> usize {
        self.tools.len()
    }

    /// All registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn record(ctx: &ToolContext, event: AuditEvent) {
    if let Some(audit) = &ctx.audit {
        audit.record(&event);
    }
}
