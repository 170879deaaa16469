//! # crabwire Core
//!
//! Domain types, traits, and error definitions for the crabwire chat-agent
//! runtime. No HTTP, no storage engines, no terminal handling here — just
//! the domain model every other crate implements against.
//!
//! Each subsystem boundary is a trait in this crate ([`Provider`],
//! [`Tool`], [`ConversationStore`], [`AuditSink`]); implementations live
//! outward in their own crates. Swapping a backend is a wiring change,
//! and tests substitute mocks without touching the real crates.

pub mod audit;
pub mod error;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use audit::{AuditEvent, AuditSink};
pub use error::{Error, ProviderError, Result, RouterError, StorageError, ToolError};
pub use message::{Message, Role, Session, ToolCall};
pub use provider::{ChatEvent, ChatOptions, ChatStream, ModelSpec, Provider, ToolDefinition, Usage};
pub use store::{ConversationStore, ConversationSummary};
pub use tool::{
    ConfirmError, ConfirmRequest, Confirmer, Tool, ToolContext, ToolOutcome, ToolPermission,
    ToolResult,
};
