//! Write file tool — owner-gated, confirmation-required writes inside
//! the sandbox directory.

use std::path::PathBuf;

use async_trait::async_trait;
use crabwire_core::error::ToolError;
use crabwire_core::tool::{Tool, ToolContext, ToolPermission, ToolResult};
use tracing::info;

use crate::sandbox;

pub struct WriteFileTool {
    base: PathBuf,
}

impl WriteFileTool {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text content to a local file. Call this when the user asks to save, \
         create, or modify a file. Only paths under the sandbox root are writable; \
         an existing file is overwritten."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the sandbox root, e.g. workspace/notes.md"
                },
                "content": {
                    "type": "string",
                    "description": "The text content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Owner
    }

    fn confirm_required(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let Some(raw_path) = arguments["path"].as_str().filter(|p| !p.trim().is_empty()) else {
            return Ok(ToolResult::fail("A valid 'path' argument is required"));
        };
        // Models occasionally send numbers or objects here; store their
        // JSON rendering instead of refusing the call.
        let content = match &arguments["content"] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => {
                return Ok(ToolResult::fail("A 'content' argument is required"));
            }
            other => other.to_string(),
        };

        let Some(full_path) = sandbox::resolve_in_base(&self.base, raw_path) else {
            return Ok(ToolResult::fail(format!(
                "Unsafe path; only files under {} are writable",
                sandbox::display_base(&self.base)
            )));
        };

        if !sandbox::is_allowed_extension(&full_path) {
            return Ok(ToolResult::fail(format!(
                "Unsupported file type. Allowed extensions: {}",
                sandbox::ALLOWED_EXTENSIONS.join(", ")
            )));
        }

        if let Some(parent) = full_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::fail(format!(
                    "Failed to create parent directory: {e}"
                )));
            }
        }

        match tokio::fs::write(&full_path, content.as_bytes()).await {
            Ok(()) => {
                info!(path = %full_path.display(), chars = content.chars().count(), "Wrote file");
                Ok(ToolResult::ok(format!(
                    "Wrote {raw_path} ({} chars)",
                    content.chars().count()
                )))
            }
            Err(e) => Ok(ToolResult::fail(write_error_message(raw_path, &e))),
        }
    }
}

fn write_error_message(path: &str, err: &std::io::Error) -> String {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::PermissionDenied => format!("No permission to write: {path}"),
        ErrorKind::IsADirectory => format!("Path is a directory, not a file: {path}"),
        _ => format!("Failed to write file: {err}"),
    }
}
