//! Application configuration and helpers for loading it

use crate::logging::LogFormat;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Process-wide settings shared by every binary in the workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "finflash".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with `FINFLASH_ENV`, `LOG_LEVEL` and `LOG_FORMAT`
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of an existing config
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(env) = env_override::<String>("FINFLASH_ENV") {
            self.environment = env;
        }
        if let Some(level) = env_override::<String>("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(format) = env_override::<LogFormat>("LOG_FORMAT") {
            self.log_format = format;
        }
        self
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Read and deserialize a JSON file
pub fn load_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;

    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

/// Parse an environment variable, ignoring it when unset or malformed
///
/// Malformed values are logged at warn level and treated as unset.
pub fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = trimmed.parse::<T>() {
        Some(value)
    } else {
        tracing::warn!(variable = name, value = %raw, "Ignoring invalid environment override");
        None
    }
}
