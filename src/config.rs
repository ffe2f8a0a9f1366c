//! User Configuration
//!
//! Persistent API keys and defaults in `~/.config/flowline/config.toml`:
//!
//! ```toml
//! [api_keys]
//! openai = "sk-..."
//!
//! [defaults]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [openai]
//! base_url = "https://api.openai.com/v1"
//! ```
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags (`--provider`, `--model`)
//! 2. Step `llm:`, then workflow `config.llm`
//! 3. Environment (`OPENAI_API_KEY`, `FLOWLINE_PROVIDER`, `FLOWLINE_MODEL`)
//! 4. Config file
//! 5. Built-in defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::LlmSettings;
use crate::error::{FlowlineError, Result};

pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowlineConfig {
    #[serde(default)]
    pub api_keys: ApiKeys,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub openai: OpenAiSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiKeys {
    pub openai: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Defaults {
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OpenAiSection {
    /// OpenAI-compatible endpoint (proxies, local gateways)
    pub base_url: Option<String>,
}

impl FlowlineConfig {
    /// `~/.config/flowline/` on Unix, `%APPDATA%/flowline/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowline")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load the user config file; a missing file is the default config
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| FlowlineError::ConfigError {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| FlowlineError::ConfigError {
            reason: format!("Failed to parse {}: {}", path.display(), e),
        })
    }

    /// Merge process environment over file values
    pub fn with_env(self) -> Self {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    /// Merge an environment lookup; empty values never override
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.api_keys.openai = Some(key);
        }
        if let Some(provider) = get("FLOWLINE_PROVIDER") {
            self.defaults.provider = Some(provider);
        }
        if let Some(model) = get("FLOWLINE_MODEL") {
            self.defaults.model = Some(model);
        }
        if let Some(base_url) = get("OPENAI_BASE_URL") {
            self.openai.base_url = Some(base_url);
        }
        self
    }

    pub fn openai_key(&self) -> Option<&str> {
        self.api_keys.openai.as_deref()
    }

    /// Lowest-priority LLM settings: environment/file, then built-ins
    pub fn llm_defaults(&self) -> LlmSettings {
        LlmSettings {
            provider: Some(
                self.defaults
                    .provider
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            ),
            model: Some(
                self.defaults
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            ),
            ..LlmSettings::default()
        }
    }
}

/// Mask an API key for display, e.g. "sk-proj***"
pub fn mask_api_key(key: &str, visible_chars: usize) -> String {
    if key.is_empty() {
        return String::new();
    }

    let visible: String = key.chars().take(visible_chars).collect();
    format!("{}***", visible)
}
