//! Current time tool — lets the model answer "what time is it".

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use crabwire_core::error::ToolError;
use crabwire_core::tool::{Tool, ToolContext, ToolResult};

/// Offset applied when the model does not pass one. UTC+8 matches the
/// home region of the default backends.
const DEFAULT_UTC_OFFSET: i64 = 8;

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Call this when the user asks what time it is, \
         today's date, or the day of the week. Accepts an optional UTC offset in hours."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset": {
                    "type": "integer",
                    "description": "UTC offset in whole hours, e.g. 8 for UTC+8 or -5 for UTC-5",
                    "default": DEFAULT_UTC_OFFSET
                }
            }
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let offset_hours = arguments["utc_offset"]
            .as_i64()
            .unwrap_or(DEFAULT_UTC_OFFSET);

        let Some(offset) = offset_hours
            .checked_mul(3600)
            .and_then(|secs| i32::try_from(secs).ok())
            .and_then(FixedOffset::east_opt)
        else {
            return Ok(ToolResult::fail(format!(
                "Invalid UTC offset {offset_hours}; use whole hours between -12 and 14"
            )));
        };

        let now = Utc::now().with_timezone(&offset);
        let formatted = now.format("%Y-%m-%d %H:%M:%S (%A)");
        let sign = if offset_hours >= 0 { "+" } else { "" };
        Ok(ToolResult::ok(format!(
            "Current time (UTC{sign}{offset_hours}): {formatted}"
        )))
    }
}
