//! Configuration loading, validation, and management for crabwire.
//!
//! Loads configuration from `~/.crabwire/config.toml` with environment
//! variable overrides. Validates and normalizes all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.crabwire/config.toml`. Providers are an array of
/// tables so their declaration order is preserved — the router's failover
/// chain and bare-name resolution both depend on it.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model spec ("deepseek-chat" or "qwen/qwen-max")
    #[serde(default = "default_model")]
    pub model: String,

    /// Ordered fallback model specs tried when the primary fails
    #[serde(default)]
    pub fallback_models: Vec<String>,

    /// Configured providers, in declaration order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Agent behavior
    #[serde(default)]
    pub agent: AgentSettings,

    /// Conversation storage
    #[serde(default)]
    pub storage: StorageSettings,

    /// Audit log
    #[serde(default)]
    pub audit: AuditSettings,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolSettings,
}

fn default_model() -> String {
    "deepseek-chat".into()
}

/// One configured provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider id ("deepseek", "qwen", or any custom id)
    pub id: String,

    /// API key; falls back to `CRABWIRE_<ID>_API_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override; required for ids outside the known catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Default concrete model when a spec names only this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api_key: None,
            api_url: None,
            model: None,
        }
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("model", &self.model)
            .field("fallback_models", &self.fallback_models)
            .field("providers", &self.providers)
            .field("agent", &self.agent)
            .field("storage", &self.storage)
            .field("audit", &self.audit)
            .field("gateway", &self.gateway)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Agent loop behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// How many recent messages cross the wire per round
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Hard cap on tool rounds per turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Owner sender ids. Empty = every sender is owner.
    #[serde(default)]
    pub owner_ids: Vec<String>,

    /// Base system prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per generation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_context_window() -> usize {
    40
}
fn default_max_tool_rounds() -> u32 {
    5
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer concisely and use the available tools when they help."
        .into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            max_tool_rounds: default_max_tool_rounds(),
            owner_ids: vec![],
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Conversation storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// When false the runtime keeps sessions purely in memory
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database path; defaults to `~/.crabwire/crabwire.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl StorageSettings {
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("crabwire.db"))
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON-lines file; defaults to `~/.crabwire/audit.log`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl AuditSettings {
    pub fn log_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("audit.log"))
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    18790
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Built-in tool settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Root directory file tools may touch; defaults to `~/.crabwire`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_base: Option<PathBuf>,
}

impl ToolSettings {
    pub fn file_base_path(&self) -> PathBuf {
        if let Ok(base) = std::env::var("CRABWIRE_FILE_BASE") {
            return PathBuf::from(base);
        }
        self.file_base
            .clone()
            .unwrap_or_else(AppConfig::config_dir)
    }
}

// ── Known-provider catalog ────────────────────────────────────────────────

/// A provider the router can resolve without explicit configuration of its
/// endpoint. Catalog order is the bare-name hint scan order.
#[derive(Debug, Clone, Copy)]
pub struct KnownProvider {
    pub id: &'static str,
    pub base_url: &'static str,
    /// Model-name prefixes that resolve to this provider
    pub prefixes: &'static [&'static str],
}

/// OpenAI-compatible endpoints this build knows out of the box.
pub const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        id: "deepseek",
        base_url: "https://api.deepseek.com",
        prefixes: &["deepseek"],
    },
    KnownProvider {
        id: "qwen",
        base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        prefixes: &["qwen"],
    },
    KnownProvider {
        id: "kimi",
        base_url: "https://api.moonshot.cn/v1",
        prefixes: &["moonshot", "kimi"],
    },
    KnownProvider {
        id: "glm",
        base_url: "https://open.bigmodel.cn/api/paas/v4",
        prefixes: &["glm", "chatglm"],
    },
    KnownProvider {
        id: "doubao",
        base_url: "https://ark.cn-beijing.volces.com/api/v3",
        prefixes: &["doubao", "ep-"],
    },
];

/// Look up a catalog entry by provider id.
pub fn known_provider(id: &str) -> Option<&'static KnownProvider> {
    KNOWN_PROVIDERS.iter().find(|p| p.id == id)
}

impl AppConfig {
    /// Load configuration from the default path (`~/.crabwire/config.toml`).
    ///
    /// Environment overrides applied afterwards:
    /// - `CRABWIRE_MODEL` replaces the default model spec
    /// - `CRABWIRE_<ID>_API_KEY` fills a provider's missing key
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("CRABWIRE_MODEL") {
            config.model = model;
        }

        for provider in &mut config.providers {
            if provider.api_key.is_none() {
                let var = format!("CRABWIRE_{}_API_KEY", provider.id.to_uppercase());
                provider.api_key = std::env::var(&var).ok();
            }
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        config.normalize();
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".crabwire")
    }

    /// Whether a provider id appears in the configured list.
    pub fn has_provider(&self, id: &str) -> bool {
        self.providers.iter().any(|p| p.id == id)
    }

    /// Look up a configured provider by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        for provider in &self.providers {
            if provider.api_url.is_none() && known_provider(&provider.id).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' is not a known provider and sets no api_url",
                    provider.id
                )));
            }
        }

        Ok(())
    }

    /// Clamp out-of-range numeric settings instead of rejecting them.
    fn normalize(&mut self) {
        self.agent.context_window = self.agent.context_window.clamp(2, 200);
        self.agent.max_tool_rounds = self.agent.max_tool_rounds.max(1);
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            fallback_models: vec![],
            providers: vec![],
            agent: AgentSettings::default(),
            storage: StorageSettings::default(),
            audit: AuditSettings::default(),
            gateway: GatewaySettings::default(),
            tools: ToolSettings::default(),
        }
    }
}

/// Get the user's home directory.
pub fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
