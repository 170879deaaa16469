//! Error types for the crabwire domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `ProviderError` additionally
//! carries the client-class vs transport-class split that drives retry and
//! failover decisions.

use thiserror::Error;

/// The top-level error type for all crabwire operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Router errors ---
    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to an LLM backend.
///
/// Classification matters more than the payload here:
/// - client-class errors are caller-configuration problems (bad key, empty
///   balance, rate cap). Retrying or switching providers cannot fix them.
/// - transport-class errors are transient (5xx, connect failure, timeout)
///   and are retried once, then handed to the router for failover.
/// - `Cancelled` is cooperative shutdown, not a failure.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API key invalid or unauthorized for {provider}: {message}")]
    AuthenticationFailed { provider: String, message: String },

    #[error("Account balance or quota exhausted for {provider}: {message}")]
    QuotaExhausted { provider: String, message: String },

    #[error("Rate limited by {provider}, slow down: {message}")]
    RateLimited { provider: String, message: String },

    #[error("Bad request rejected by provider (status {status_code}): {message}")]
    BadRequest { status_code: u16, message: String },

    #[error("Provider returned server error (status {status_code}): {message}")]
    ApiStatus { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Generation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// True for errors caused by caller configuration. These must never be
    /// retried and must abort a failover chain immediately.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthenticationFailed { .. }
                | ProviderError::QuotaExhausted { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::BadRequest { .. }
        )
    }

    /// True for transient transport/server failures worth one retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::ApiStatus { .. }
                | ProviderError::Network(_)
                | ProviderError::Timeout { .. }
        )
    }
}

/// Failures resolving a model spec or exhausting a failover chain.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    #[error("Unknown provider '{provider}'. Configured providers: {configured}")]
    UnknownProvider { provider: String, configured: String },

    #[error(
        "Cannot auto-resolve model '{model}' with multiple providers configured. \
         Use explicit 'provider/model-name' syntax"
    )]
    AmbiguousModel { model: String },

    #[error("No providers configured")]
    NoProviders,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Failures raised by tool implementations.
///
/// These never escape the registry: `ToolRegistry::execute` converts them
/// into failure outcomes so one broken tool cannot crash a chat turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool already registered: {0}")]
    DuplicateName(String),
}

/// Failures in the conversation store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Conversation not found: {0}")]
    NotFound(String),
}
