use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Connection settings for the upstream chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token. Secret storage and the prompt that captures it belong
    /// to the host; by the time config reaches the adapter the key is plain.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    concat!("chatwire/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Static capability entry for one model id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub display_name: String,
    pub context_window: u32,
    pub max_output: u32,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_vision: bool,
    /// Internal-only models are usable as reroute targets but are not
    /// offered for user selection.
    #[serde(default)]
    pub internal: bool,
}

/// Resolved model metadata returned by catalog queries.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    pub context_window: u32,
    pub max_output: u32,
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub internal: bool,
}

/// Full adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
    /// When enabled, reasoning-channel text is requested from the upstream
    /// and rendered as a formatted block ahead of the answer.
    #[serde(default)]
    pub show_reasoning: bool,
    /// Vision-capable model the whole request is rerouted to when the
    /// requested model cannot accept image input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_fallback_model: Option<String>,
    #[serde(default = "default_max_output_tokens")]
    pub default_max_output_tokens: u32,
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            models: BTreeMap::new(),
            show_reasoning: false,
            vision_fallback_model: None,
            default_max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl AdapterConfig {
    /// Parse and validate a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the YAML does not parse or validation
    /// fails.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: AdapterConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on an empty base URL, a model
    /// with a zero context window or an output budget at or above its
    /// context window, or a vision fallback id missing from the catalog.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Validation("api.base_url is empty".into()));
        }
        for (id, entry) in &self.models {
            if entry.context_window == 0 {
                return Err(ConfigError::Validation(format!(
                    "model '{id}' has a zero context window"
                )));
            }
            if entry.max_output >= entry.context_window {
                return Err(ConfigError::Validation(format!(
                    "model '{id}' max_output {} must be below context_window {}",
                    entry.max_output, entry.context_window
                )));
            }
        }
        if let Some(ref fallback) = self.vision_fallback_model {
            match self.models.get(fallback) {
                None => {
                    return Err(ConfigError::Validation(format!(
                        "vision_fallback_model '{fallback}' is not in the model catalog"
                    )));
                }
                Some(entry) if !entry.supports_vision => {
                    return Err(ConfigError::Validation(format!(
                        "vision_fallback_model '{fallback}' does not support vision"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Look up one model's capability entry.
    #[must_use]
    pub fn model_info(&self, id: &str) -> Option<ModelInfo> {
        self.models.get(id).map(|entry| ModelInfo {
            id: id.to_string(),
            display_name: entry.display_name.clone(),
            context_window: entry.context_window,
            max_output: entry.max_output,
            supports_tools: entry.supports_tools,
            supports_vision: entry.supports_vision,
            internal: entry.internal,
        })
    }

    /// Models offered for user selection (internal reroute targets hidden).
    #[must_use]
    pub fn user_selectable_models(&self) -> Vec<ModelInfo> {
        self.models
            .iter()
            .filter(|(_, entry)| !entry.internal)
            .map(|(id, entry)| ModelInfo {
                id: id.clone(),
                display_name: entry.display_name.clone(),
                context_window: entry.context_window,
                max_output: entry.max_output,
                supports_tools: entry.supports_tools,
                supports_vision: entry.supports_vision,
                internal: entry.internal,
            })
            .collect()
    }
}
