//! Sentinel-delimited tool records inside persisted assistant messages.
//!
//! The store keeps plain `(role, content)` rows, so an assistant message
//! that ran tools carries each call as a `⟦tool⟧{...}⟦/tool⟧` block after
//! its prose. A reload can then separate tool records from text without a
//! schema change, and anything that ignores the markers still reads the
//! full turn.

use serde::{Deserialize, Serialize};

pub const TOOL_BLOCK_OPEN: &str = "⟦tool⟧";
pub const TOOL_BLOCK_CLOSE: &str = "⟦/tool⟧";

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBlock {
    /// Provider-assigned call id
    pub id: String,

    /// Tool name
    pub name: String,

    /// Parsed arguments the tool received
    pub arguments: serde_json::Value,

    /// What the tool (or the gate refusing it) reported
    pub output: String,

    /// Whether the call succeeded
    pub success: bool,
}

/// Render prose plus tool blocks into one storable string.
pub fn render(prose: &str, blocks: &[ToolBlock]) -> String {
    if blocks.is_empty() {
        return prose.to_string();
    }

    let mut out = String::from(prose);
    for block in blocks {
        let Ok(json) = serde_json::to_string(block) else {
            continue;
        };
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(TOOL_BLOCK_OPEN);
        out.push_str(&json);
        out.push_str(TOOL_BLOCK_CLOSE);
    }
    out
}

/// Split stored content back into prose and tool blocks.
///
/// Malformed or unterminated blocks stay in the prose untouched; rendering
/// whitespace around extracted blocks is trimmed from the prose end.
pub fn parse(content: &str) -> (String, Vec<ToolBlock>) {
    let mut prose = String::new();
    let mut blocks = Vec::new();
    let mut rest = content;

    while let Some(open) = rest.find(TOOL_BLOCK_OPEN) {
        let after_open = &rest[open + TOOL_BLOCK_OPEN.len()..];
        let Some(close) = after_open.find(TOOL_BLOCK_CLOSE) else {
            break;
        };

        match serde_json::from_str::<ToolBlock>(&after_open[..close]) {
            Ok(block) => {
                prose.push_str(&rest[..open]);
                blocks.push(block);
            }
            Err(_) => {
                // Not one of ours; keep the span as plain text.
                let span_end = open + TOOL_BLOCK_OPEN.len() + close + TOOL_BLOCK_CLOSE.len();
                prose.push_str(&rest[..span_end]);
            }
        }
        rest = &after_open[close + TOOL_BLOCK_CLOSE.len()..];
    }

    prose.push_str(rest);
    (prose.trim_end().to_string(), blocks)
}
