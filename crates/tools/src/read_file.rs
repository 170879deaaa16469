//! Read file tool — owner-gated reads inside the sandbox directory.

use std::path::PathBuf;

use async_trait::async_trait;
use crabwire_core::error::ToolError;
use crabwire_core::tool::{Tool, ToolContext, ToolPermission, ToolResult};

use crate::sandbox;

/// Cap on returned content, so one big file cannot flood the context.
const DEFAULT_MAX_CHARS: usize = 8000;

pub struct ReadFileTool {
    base: PathBuf,
}

impl ReadFileTool {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a local file. Call this when the user gives a file path, asks what a file \
         contains, or wants a document summarized. Only files under the sandbox root are \
         readable; paths are relative to it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the sandbox root, e.g. workspace/notes.md"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum number of characters to return, defaults to 8000",
                    "default": DEFAULT_MAX_CHARS
                }
            },
            "required": ["path"]
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Owner
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let Some(raw_path) = arguments["path"].as_str().filter(|p| !p.trim().is_empty()) else {
            return Ok(ToolResult::fail("A valid 'path' argument is required"));
        };
        let max_chars = arguments["max_chars"]
            .as_u64()
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CHARS);

        let Some(full_path) = sandbox::resolve_in_base(&self.base, raw_path) else {
            return Ok(ToolResult::fail(format!(
                "Unsafe path; only files under {} are readable",
                sandbox::display_base(&self.base)
            )));
        };

        if !sandbox::is_allowed_extension(&full_path) {
            return Ok(ToolResult::fail(format!(
                "Unsupported file type. Allowed extensions: {}",
                sandbox::ALLOWED_EXTENSIONS.join(", ")
            )));
        }

        match tokio::fs::read_to_string(&full_path).await {
            Ok(text) => {
                if text.chars().count() > max_chars {
                    let cut: String = text.chars().take(max_chars).collect();
                    Ok(ToolResult::ok(format!(
                        "[File: {raw_path}] (truncated to {max_chars} chars)\n\n{cut}\n\n(content truncated)"
                    )))
                } else {
                    Ok(ToolResult::ok(format!("[File: {raw_path}]\n\n{text}")))
                }
            }
            Err(e) => Ok(ToolResult::fail(read_error_message(raw_path, &e))),
        }
    }
}

fn read_error_message(path: &str, err: &std::io::Error) -> String {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => format!("File does not exist: {path}"),
        ErrorKind::PermissionDenied => format!("No permission to read: {path}"),
        ErrorKind::IsADirectory => format!("Path is a directory, not a file: {path}"),
        ErrorKind::InvalidData => format!("Not a UTF-8 text file: {path}"),
        _ => format!("Failed to read file: {err}"),
    }
}
