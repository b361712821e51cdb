use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Extraction worker endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionConfig {
    /// Base URL of the extraction worker service.
    pub base_url: String,
    /// Bearer credential, directly in the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Path to a file containing the bearer credential (Docker secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<String>,
    /// Environment variable holding the bearer credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_env: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            bearer_token: None,
            bearer_token_file: None,
            bearer_token_env: None,
        }
    }
}

/// Index/ingestion service configuration. Without a base URL the
/// in-memory backend is used (development mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_env: Option<String>,
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("library")
}

fn default_watchdog_seconds() -> u64 {
    600
}

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 8)
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Base URL the extraction worker uses to reach this service's
    /// callback route.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// SQLite database path; defaults to `~/.storymill/data/storymill.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Root of the document library on disk.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_watchdog_seconds")]
    pub watchdog_seconds: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_base_url: default_public_base_url(),
            database_path: None,
            storage_root: default_storage_root(),
            watchdog_seconds: default_watchdog_seconds(),
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            extraction: ExtractionConfig::default(),
            index: IndexConfig::default(),
        }
    }
}
