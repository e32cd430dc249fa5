//! Configuration loading for Paperscope.
//! Reads paperscope.toml from the current directory or path in PAPERSCOPE_CONFIG env var.
//! A missing file is fine: defaults plus environment overrides are used.

use paperscope_common::{ConfigError, OllamaConfig};
use paperscope_llm::Envelope;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_PATH_ENV: &str = "PAPERSCOPE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "paperscope.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_temperature")]
    pub temperature: f32,
    /// "chat" (default), "generate" or "openai" for OpenAI-compatible servers such as LM Studio.
    #[serde(default = "default_envelope")]
    pub envelope: String,
}

fn default_analysis_temperature() -> f32    { 0.8 }
fn default_envelope()             -> String { "chat".to_string() }

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { temperature: default_analysis_temperature(), envelope: default_envelope() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_temperature")]
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

fn default_chat_temperature() -> f32 { 0.7 }

impl Default for ChatConfig {
    fn default() -> Self {
        Self { temperature: default_chat_temperature(), system_prompt: None }
    }
}

impl Config {
    /// Load configuration from paperscope.toml.
    /// Checks PAPERSCOPE_CONFIG env var first, then current directory.
    pub fn load() -> paperscope_common::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path), |key| std::env::var(key).ok())
    }

    /// Load from `path`, then apply `OLLAMA_*` overrides through `lookup`.
    pub fn load_from<F>(path: &Path, lookup: F) -> paperscope_common::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Config::default()
        };

        config.ollama.apply_overrides(lookup);
        config.ollama.validate()?;
        config.envelope()?;
        Ok(config)
    }

    pub fn envelope(&self) -> paperscope_common::Result<Envelope> {
        Envelope::from_name(&self.analysis.envelope).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "analysis.envelope must be \"chat\", \"generate\" or \"openai\", got {:?}",
                self.analysis.envelope
            ))
        })
    }
}
