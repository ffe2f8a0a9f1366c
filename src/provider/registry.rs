//! Provider registry
//!
//! Built once at startup and passed by reference to the pipeline. Providers
//! that could not be configured are remembered with the reason, so asking
//! for one yields an `LLMConfigError` that says what is missing.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use url::Url;

use super::{MockProvider, OpenAiProvider, TextGenerator};
use crate::config::{mask_api_key, FlowlineConfig};
use crate::error::FlowlineError;
use crate::util::closest_match;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn TextGenerator>>,
    unavailable: BTreeMap<String, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `mock` always; `openai` when a key is configured
    pub fn from_config(config: &FlowlineConfig) -> Result<Self, FlowlineError> {
        let mut registry = Self::new();
        registry.register(Arc::new(MockProvider::new()));

        match config.openai_key() {
            Some(key) => {
                let mut provider = OpenAiProvider::new(key);
                if let Some(base_url) = &config.openai.base_url {
                    Url::parse(base_url).map_err(|e| FlowlineError::LlmConfig {
                        reason: format!("invalid openai.base_url '{}': {}", base_url, e),
                    })?;
                    provider = provider.with_base_url(base_url.as_str());
                }
                debug!(
                    key = %mask_api_key(key, 7),
                    base_url = provider.base_url(),
                    "openai provider configured"
                );
                registry.register(Arc::new(provider));
            }
            None => registry.mark_unavailable(
                "openai",
                "no API key; set OPENAI_API_KEY or api_keys.openai in config.toml",
            ),
        }

        Ok(registry)
    }

    /// Register under the provider's own name, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn TextGenerator>) -> &mut Self {
        let name = provider.name().to_string();
        self.unavailable.remove(&name);
        self.providers.insert(name, provider);
        self
    }

    pub fn mark_unavailable(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.unavailable.insert(name.into(), reason.into());
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TextGenerator>, FlowlineError> {
        if let Some(provider) = self.providers.get(name) {
            return Ok(Arc::clone(provider));
        }
        if let Some(reason) = self.unavailable.get(name) {
            return Err(FlowlineError::LlmConfig {
                reason: format!("provider '{}' is not available: {}", name, reason),
            });
        }

        let known = self.providers.keys().chain(self.unavailable.keys());
        let hint = closest_match(name, known.map(String::as_str))
            .map(|s| format!(" (did you mean '{}'?)", s))
            .unwrap_or_default();
        Err(FlowlineError::LlmConfig {
            reason: format!(
                "unknown provider '{}'{}; available: {}",
                name,
                hint,
                self.names().join(", ")
            ),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("unavailable", &self.unavailable)
            .finish()
    }
}
