//! List files tool — find files under the sandbox directory.
//!
//! Pairs with `read_file`: the model first lists to discover paths, then
//! reads the ones it needs. Results are capped so a big tree cannot
//! flood the context.

use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;
use crabwire_core::error::ToolError;
use crabwire_core::tool::{Tool, ToolContext, ToolPermission, ToolResult};
use tracing::debug;

use crate::sandbox;

const MAX_RESULTS: usize = 50;
const MAX_DEPTH: usize = 3;

pub struct ListFilesTool {
    base: PathBuf,
}

impl ListFilesTool {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List or find files in a directory under the sandbox root. Call this first when \
         the user asks what files exist or wants something located, then use read_file \
         on a specific path. Supports simple name patterns like *.md or notes*."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to the sandbox root; '.' is the root itself",
                    "default": "."
                },
                "pattern": {
                    "type": "string",
                    "description": "Optional file name filter, e.g. *.md or notes*"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Whether to descend into subdirectories, defaults to false",
                    "default": false
                }
            }
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
        let raw_path = arguments["path"]
            .as_str()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(".");
        let pattern = arguments["pattern"].as_str().map(str::trim).unwrap_or("");
        let recursive = arguments["recursive"].as_bool().unwrap_or(false);

        let Some(dir_path) = sandbox::resolve_in_base(&self.base, raw_path) else {
            return Ok(ToolResult::fail(format!(
                "Unsafe path; only directories under {} are listable",
                sandbox::display_base(&self.base)
            )));
        };

        let root_prefix = if raw_path == "." {
            String::new()
        } else {
            raw_path.trim_start_matches('/').trim_end_matches('/').to_string()
        };

        let mut results: Vec<String> = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((dir_path, root_prefix, 0usize));
        let mut at_root = true;

        while let Some((dir, prefix, depth)) = queue.pop_front() {
            if depth > MAX_DEPTH || results.len() >= MAX_RESULTS {
                break;
            }
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if at_root => {
                    return Ok(ToolResult::fail(list_error_message(raw_path, &e)));
                }
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            at_root = false;

            while let Ok(Some(entry)) = entries.next_entry().await {
                if results.len() >= MAX_RESULTS {
                    break;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let rel_path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_file() {
                    if matches_pattern(&name, pattern) {
                        results.push(rel_path);
                    }
                } else if file_type.is_dir() {
                    if recursive {
                        queue.push_back((entry.path(), rel_path, depth + 1));
                    } else {
                        // Trailing slash marks directories the model can
                        // list next.
                        results.push(format!("{rel_path}/"));
                    }
                }
            }
        }

        if results.is_empty() {
            let filter_note = if pattern.is_empty() {
                String::new()
            } else {
                format!(" matching \"{pattern}\"")
            };
            return Ok(ToolResult::ok(format!(
                "No files{filter_note} in {raw_path}. Use read_file if you already know a path."
            )));
        }

        let capped_note = if results.len() >= MAX_RESULTS {
            format!("\n(truncated to the first {MAX_RESULTS} entries)")
        } else {
            String::new()
        };
        let list = results.join("\n");
        Ok(ToolResult::ok(format!(
            "Found {} entries:\n\n{list}{capped_note}\n\nUse read_file to open one, e.g. \
             read_file(path: \"workspace/notes.md\")",
            results.len()
        )))
    }
}

/// Simple `*` pattern match, case-insensitive: `*.md`, `notes*`,
/// `*report*`, or an exact name.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    let name = name.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('*').collect();
    match parts.as_slice() {
        [exact] => name == *exact,
        [start, end] => {
            if !start.is_empty() && !end.is_empty() {
                name.len() >= start.len() + end.len()
                    && name.starts_with(start)
                    && name.ends_with(end)
            } else if !start.is_empty() {
                name.starts_with(start)
            } else {
                name.ends_with(end)
            }
        }
        _ => parts
            .iter()
            .filter(|p| !p.is_empty())
            .all(|p| name.contains(*p)),
    }
}

fn list_error_message(path: &str, err: &std::io::Error) -> String {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => format!("Directory does not exist: {path}"),
        ErrorKind::NotADirectory => format!("Not a directory: {path}"),
        ErrorKind::PermissionDenied => format!("No permission to list: {path}"),
        _ => format!("Failed to list directory: {err}"),
    }
}
