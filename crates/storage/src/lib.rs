//! Conversation persistence for crabwire.
//!
//! Two [`crabwire_core::store::ConversationStore`] implementations:
//! SQLite for durable single-file storage, and an in-memory table for
//! tests and storage-disabled runs.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
