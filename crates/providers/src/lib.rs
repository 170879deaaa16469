//! LLM provider adapter and model routing for crabwire.
//!
//! `OpenAiCompatProvider` implements `crabwire_core::Provider` against any
//! OpenAI-compatible chat-completions endpoint. `ModelRouter` resolves
//! model specs to a concrete provider and fails over across the configured
//! chain on transport-class failures.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::ModelRouter;
