//! Model router — resolves logical model specs to a concrete provider and
//! fails over across an ordered chain.
//!
//! A spec is either explicit `"provider/model-name"` or a bare
//! `"model-name"` matched against the known-provider name-prefix hints.
//! Failover advances on transport-class failures only; client-class errors
//! (bad key, empty balance, rate cap) abort the whole chain since no
//! provider swap can fix them.

use crabwire_config::{AppConfig, KNOWN_PROVIDERS, known_provider};
use crabwire_core::error::{ProviderError, RouterError};
use crabwire_core::message::Message;
use crabwire_core::provider::{ChatOptions, ChatStream, ModelSpec, Provider};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::openai_compat::OpenAiCompatProvider;

/// Routes chat requests to the right provider with automatic failover.
pub struct ModelRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    /// Configured provider ids in declaration order
    configured: Vec<String>,
    /// Per-provider default model, used when a spec names just the provider
    default_models: HashMap<String, String>,
    /// Fallback model specs tried in order after the primary
    fallbacks: Vec<String>,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            configured: Vec::new(),
            default_models: HashMap::new(),
            fallbacks: Vec::new(),
        }
    }

    /// Build the router from configuration. Providers with no resolvable
    /// endpoint are skipped with a warning rather than failing startup.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut router = Self::new();

        for pc in &config.providers {
            let base_url = pc
                .api_url
                .clone()
                .or_else(|| known_provider(&pc.id).map(|k| k.base_url.to_string()));
            let Some(base_url) = base_url else {
                warn!(provider = %pc.id, "Skipping provider with no known endpoint");
                continue;
            };

            let api_key = pc.api_key.clone().unwrap_or_default();
            let provider = Arc::new(OpenAiCompatProvider::new(&pc.id, base_url, api_key));
            router.register(provider, pc.model.clone());
        }

        router.fallbacks = config.fallback_models.clone();
        router
    }

    /// Register a provider, optionally with a default model for specs that
    /// name just the provider id.
    pub fn register(&mut self, provider: Arc<dyn Provider>, default_model: Option<String>) {
        let id = provider.id().to_string();
        if !self.configured.contains(&id) {
            self.configured.push(id.clone());
        }
        if let Some(model) = default_model {
            self.default_models.insert(id.clone(), model);
        }
        self.providers.insert(id, provider);
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Configured provider ids in declaration order.
    pub fn provider_ids(&self) -> Vec<&str> {
        self.configured.iter().map(String::as_str).collect()
    }

    /// Resolve a model spec to a concrete {provider, model} pair.
    ///
    /// Order: explicit `provider/model` split; bare name against catalog
    /// prefix hints (configured providers only); a lone configured provider
    /// takes any bare name; otherwise refuse to guess.
    pub fn resolve(&self, spec: &str) -> std::result::Result<ModelSpec, RouterError> {
        if let Some((provider_id, model_name)) = spec.split_once('/') {
            if !self.providers.contains_key(provider_id) {
                return Err(RouterError::UnknownProvider {
                    provider: provider_id.to_string(),
                    configured: self.configured_list(),
                });
            }
            return Ok(ModelSpec::new(provider_id, model_name));
        }

        for known in KNOWN_PROVIDERS {
            if !self.providers.contains_key(known.id) {
                continue;
            }
            if known.prefixes.iter().any(|prefix| spec.starts_with(prefix)) {
                return Ok(self.spec_for(known.id, spec));
            }
        }

        if self.configured.len() == 1 {
            return Ok(self.spec_for(&self.configured[0], spec));
        }

        if self.configured.is_empty() {
            return Err(RouterError::NoProviders);
        }

        Err(RouterError::AmbiguousModel {
            model: spec.to_string(),
        })
    }

    /// Start a generation with failover. `options.model` is the primary
    /// spec; the configured fallbacks extend the chain in order.
    pub async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> std::result::Result<ChatStream, RouterError> {
        let mut chain: Vec<ModelSpec> = Vec::new();
        let mut resolve_error: Option<RouterError> = None;

        for spec in
            std::iter::once(options.model.as_str()).chain(self.fallbacks.iter().map(String::as_str))
        {
            match self.resolve(spec) {
                Ok(resolved) => chain.push(resolved),
                Err(e) => {
                    warn!(spec = %spec, error = %e, "Skipping unresolvable chain entry");
                    resolve_error = resolve_error.or(Some(e));
                }
            }
        }

        if chain.is_empty() {
            return Err(resolve_error.unwrap_or(RouterError::NoProviders));
        }

        let mut last_error: Option<ProviderError> = None;

        for (i, spec) in chain.iter().enumerate() {
            let Some(provider) = self.providers.get(&spec.provider_id) else {
                warn!(provider = %spec.provider_id, "Skipping unconfigured chain entry");
                continue;
            };

            let mut attempt_options = options.clone();
            attempt_options.model = spec.model_name.clone();

            match provider.chat(messages, &attempt_options).await {
                Ok(stream) => {
                    debug!(
                        provider = %spec.provider_id,
                        model = %spec.model_name,
                        "Provider accepted request"
                    );
                    return Ok(stream);
                }
                Err(ProviderError::Cancelled) => {
                    return Err(RouterError::Provider(ProviderError::Cancelled));
                }
                Err(e) if e.is_client_error() => {
                    warn!(
                        provider = %spec.provider_id,
                        error = %e,
                        "Client-class error, aborting failover chain"
                    );
                    return Err(RouterError::Provider(e));
                }
                Err(e) => {
                    match chain.get(i + 1) {
                        Some(next) => warn!(
                            provider = %spec.provider_id,
                            error = %e,
                            next_provider = %next.provider_id,
                            next_model = %next.model_name,
                            "Provider failed, trying next in chain"
                        ),
                        None => warn!(
                            provider = %spec.provider_id,
                            error = %e,
                            "Provider failed, chain exhausted"
                        ),
                    }
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(RouterError::Provider(e)),
            None => Err(resolve_error.unwrap_or(RouterError::NoProviders)),
        }
    }

    /// Substitute the provider's configured default model when the bare
    /// spec is just the provider id.
    fn spec_for(&self, provider_id: &str, bare: &str) -> ModelSpec {
        if bare == provider_id {
            if let Some(default) = self.default_models.get(provider_id) {
                return ModelSpec::new(provider_id, default.clone());
            }
        }
        ModelSpec::new(provider_id, bare)
    }

    fn configured_list(&self) -> String {
        if self.configured.is_empty() {
            "none".to_string()
        } else {
            self.configured.join(", ")
        }
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}
