//! Config loading: YAML file, environment overrides, secret resolution.

use std::path::Path;

use crate::error::ConfigError;

use super::schema::Config;

/// Loads configuration. A missing file yields defaults; an unreadable or
/// malformed file is an error. Environment overrides are applied last.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
            serde_yaml::from_str(&raw)?
        }
        Some(path) => {
            log::info!("Config file {} not found, using defaults", path.display());
            Config::default()
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(value) = std::env::var("STORYMILL_BIND_ADDRESS") {
        config.bind_address = value;
    }
    if let Ok(value) = std::env::var("STORYMILL_PUBLIC_BASE_URL") {
        config.public_base_url = value;
    }
    if let Ok(value) = std::env::var("STORYMILL_DATABASE_PATH") {
        config.database_path = Some(value.into());
    }
    if let Ok(value) = std::env::var("STORYMILL_STORAGE_ROOT") {
        config.storage_root = value.into();
    }
    if let Ok(value) = std::env::var("STORYMILL_EXTRACTION_URL") {
        config.extraction.base_url = value;
    }
    if let Ok(value) = std::env::var("STORYMILL_INDEX_URL") {
        config.index.base_url = Some(value);
    }
    if let Ok(value) = std::env::var("STORYMILL_WATCHDOG_SECONDS") {
        match value.parse() {
            Ok(seconds) => config.watchdog_seconds = seconds,
            Err(_) => log::warn!("Ignoring invalid STORYMILL_WATCHDOG_SECONDS '{}'", value),
        }
    }
    if let Ok(value) = std::env::var("STORYMILL_WORKER_COUNT") {
        match value.parse() {
            Ok(count) => config.worker_count = count,
            Err(_) => log::warn!("Ignoring invalid STORYMILL_WORKER_COUNT '{}'", value),
        }
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "workerCount must be at least 1".to_string(),
        });
    }
    if config.watchdog_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "watchdogSeconds must be at least 1".to_string(),
        });
    }
    if config.public_base_url.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "publicBaseUrl must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Resolves a secret from multiple sources in priority order: direct
/// value, file contents, environment variable. Supports the usual
/// deployment shapes (inline for local testing, file for Docker secrets,
/// env var for Kubernetes).
pub fn resolve_secret(
    name: &str,
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<String>, ConfigError> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(Some(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SecretFile {
                path: path.to_string(),
                source: e,
            })?;
            return Ok(Some(content.trim().to_string()));
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(ConfigError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    log::debug!("No secret source configured for '{}'", name);
    Ok(None)
}
