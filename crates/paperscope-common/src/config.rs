//! Endpoint configuration for the local Ollama-compatible chat service.
//!
//! The base URL depends on where the process runs: inside a container the
//! host's service is reached through `host.docker.internal`, otherwise via
//! the loopback address. `OLLAMA_API_BASE_URL` and `OLLAMA_MODEL` override
//! the defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, Result};

pub const BASE_URL_ENV: &str = "OLLAMA_API_BASE_URL";
pub const MODEL_ENV: &str = "OLLAMA_MODEL";

const LOCAL_BASE_URL: &str = "http://127.0.0.1:11435";
const DOCKER_BASE_URL: &str = "http://host.docker.internal:11435";
const DOCKER_MARKER: &str = "/.dockerenv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url()     -> String { resolve_base_url(|_| None, running_in_docker()) }
fn default_model()        -> String { "gemma-textonly_v3:latest".to_string() }
fn default_timeout_secs() -> u64    { 90 }

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// True when the process runs inside a Docker container.
pub fn running_in_docker() -> bool {
    Path::new(DOCKER_MARKER).exists()
}

/// Pick the base URL: explicit override first, then the container default,
/// then the loopback default.
pub fn resolve_base_url<F>(lookup: F, in_docker: bool) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
        Some(url) => url.trim().to_string(),
        None if in_docker => DOCKER_BASE_URL.to_string(),
        None => LOCAL_BASE_URL.to_string(),
    }
}

impl OllamaConfig {
    /// Defaults with `OLLAMA_API_BASE_URL` / `OLLAMA_MODEL` applied from the
    /// process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!(base_url = %config.base_url, model = %config.model, "Ollama endpoint resolved");
        Ok(config)
    }

    /// Apply environment-style overrides through `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(model) = lookup(MODEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.model = model.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Full URL for an API path such as `/api/chat`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
