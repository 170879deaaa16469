//! Built-in tool implementations for crabwire.
//!
//! Four tools ship by default:
//! - `current_time` — public, harmless, no confirmation
//! - `read_file` / `list_files` — owner-gated, sandboxed to one base directory
//! - `write_file` — owner-gated and confirmed by a human per call
//!
//! The registry in [`registry`] enforces permissions and confirmations
//! and contains every failure as data for the agent loop.

pub mod current_time;
pub mod list_files;
pub mod read_file;
pub mod registry;
mod sandbox;
pub mod write_file;

pub use current_time::CurrentTimeTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use registry::ToolRegistry;
pub use write_file::WriteFileTool;

use crabwire_config::AppConfig;
use crabwire_core::error::ToolError;

/// Create the default registry with all built-in tools.
///
/// The file tools share one sandbox root, resolved from the
/// `CRABWIRE_FILE_BASE` environment variable, then `tools.file_base` in
/// the config file, then `~/.crabwire`.
pub fn default_registry(config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let base = config.tools.file_base_path();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CurrentTimeTool))?;
    registry.register(Box::new(ReadFileTool::new(base.clone())))?;
    registry.register(Box::new(ListFilesTool::new(base.clone())))?;
    registry.register(Box::new(WriteFileTool::new(base)))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_builtins() {
        let registry = default_registry(&AppConfig::default()).unwrap();
        assert_eq!(registry.size(), 4);
        for name in ["current_time", "read_file", "list_files", "write_file"] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn guests_only_see_public_tools() {
        let registry = default_registry(&AppConfig::default()).unwrap();
        let defs = registry.definitions_for(false);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "current_time");
    }
}
