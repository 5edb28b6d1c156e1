//! Configuration loading for watchpost.
//!
//! The config file is JSON with a `slack` section and a `monitors` list.
//! Loading is all-or-nothing: any missing, mis-typed, or out-of-range
//! field fails the whole load and the caller keeps its previous
//! configuration.

use crate::model::TargetConfig;

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid monitor '{id}': {reason}")]
    InvalidMonitor { id: String, reason: String },
    #[error("duplicate monitor id '{0}'")]
    DuplicateId(String),
}

/// Slack webhook settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: String,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub slack: SlackConfig,
    pub monitors: Vec<TargetConfig>,
}

impl Config {
    /// Load and validate configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: Config = serde_json::from_str(&content)?;
        validate_targets(&config.monitors)?;

        Ok(config)
    }
}

/// Validate a set of target descriptors.
///
/// Also used by the engine on reconfiguration, so a bad descriptor set
/// can never be partially applied.
pub fn validate_targets(targets: &[TargetConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for target in targets {
        if target.id.is_empty() {
            return Err(ConfigError::InvalidMonitor {
                id: "<empty>".to_string(),
                reason: "'id' must not be empty".to_string(),
            });
        }
        if !seen.insert(target.id.as_str()) {
            return Err(ConfigError::DuplicateId(target.id.clone()));
        }
        if target.url.is_empty() {
            return Err(invalid(target, "'url' must not be empty"));
        }
        if target.interval_ms < 100 {
            return Err(invalid(target, "'interval_ms' should be at least 100ms"));
        }
        if target.timeout_ms < 100 {
            return Err(invalid(target, "'timeout_ms' should be at least 100ms"));
        }
        if target.alert_threshold < 1 {
            return Err(invalid(target, "'alert_threshold' should be at least 1"));
        }
    }

    Ok(())
}

fn invalid(target: &TargetConfig, reason: &str) -> ConfigError {
    ConfigError::InvalidMonitor {
        id: target.id.clone(),
        reason: reason.to_string(),
    }
}

/// HTTP port for the API server, from `WATCHPOST_HTTP_PORT` (default: 8080).
pub fn http_port() -> u16 {
    env::var("WATCHPOST_HTTP_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8080)
}

/// Resolve the config file path.
///
/// Priority: `--config <path>` argument, then `WATCHPOST_CONFIG`
/// environment variable, then `config.json` in the working directory.
pub fn config_path() -> PathBuf {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }

    if let Ok(path) = env::var("WATCHPOST_CONFIG") {
        return PathBuf::from(path);
    }

    PathBuf::from("config.json")
}
