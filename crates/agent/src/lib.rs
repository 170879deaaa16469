//! The agent runtime — the heart of crabwire.
//!
//! A turn flows through the runtime like this:
//!
//! 1. **Receive** the user message, land it in the session and the store
//! 2. **Assemble** the upstream request: system prompt + the sliding
//!    window of recent history
//! 3. **Stream** the generation, forwarding text deltas as they arrive
//! 4. **If tool calls**: run them through the registry, append the
//!    results, loop back to step 2 (up to the round cap)
//! 5. **Finish** with a single terminal event, even on cancellation
//!
//! The window bounds what goes over the wire each round, not what the
//! session remembers; in-memory history is compacted separately once it
//! grows past twice the window.

pub mod events;
pub mod runtime;
pub mod tool_blocks;

pub use events::AgentEvent;
pub use runtime::{AgentRuntime, ChatParams};
pub use tool_blocks::ToolBlock;
