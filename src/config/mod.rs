// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for medscan
//!
//! Settings come from a JSON file (defaults when it is missing), then a small
//! set of environment variables override the file. A `.env` file in the
//! working directory is honoured outside of tests.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Overrides `api.base_url`
pub const ENV_API_URL: &str = "MEDSCAN_API_URL";
/// Overrides `storage.path`
pub const ENV_DB_PATH: &str = "MEDSCAN_DB";
/// Overrides `ai.api_key`
pub const ENV_OPENAI_KEY: &str = "OPENAI_API_KEY";

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Health-records backend
    #[serde(default)]
    pub api: ApiConfig,

    /// Hosted vision model used for extraction
    #[serde(default)]
    pub ai: AiConfig,

    /// Local key-value store
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_ai_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Usually supplied through `OPENAI_API_KEY` rather than the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

// Default value functions
fn default_api_url() -> String { "http://localhost:8000".to_string() }
fn default_timeout() -> u64 { 60 }
fn default_ai_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_ai_model() -> String { "gpt-4o".to_string() }
fn default_ai_timeout() -> u64 { 120 }
fn default_db_path() -> String { "medscan.db".to_string() }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_url(),
            model: default_ai_model(),
            api_key: None,
            timeout_secs: default_ai_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::MedscanError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Load the file, then apply `.env` and environment overrides
    pub fn load_with_env(path: &Path) -> crate::Result<Self> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in practice)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = url;
        }
        if let Some(db) = lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
            self.storage.path = db;
        }
        if let Some(key) = lookup(ENV_OPENAI_KEY).filter(|v| !v.trim().is_empty()) {
            self.ai.api_key = Some(key);
        }
    }

    /// Reject settings that cannot produce a working client
    pub fn validate(&self) -> crate::Result<()> {
        for (name, url) in [("api.base_url", &self.api.base_url), ("ai.base_url", &self.ai.base_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(crate::MedscanError::Config(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }
        if self.storage.path.trim().is_empty() {
            return Err(crate::MedscanError::Config("storage.path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
