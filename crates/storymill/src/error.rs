use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorymillError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    #[error("Index error: {0}")]
    Index(#[from] crate::index::IndexError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("No secret source provided for '{name}' (need one of: direct value, file path, or env var name)")]
    NoSecretSource { name: String },

    #[error("Failed to read secret from file '{path}': {source}")]
    SecretFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },
}

/// Errors from the outbound extraction-worker dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Extraction worker request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Extraction worker rejected dispatch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Source binary unavailable for item '{item_id}': {reason}")]
    SourceUnavailable { item_id: String, reason: String },
}

/// Errors from inbound callback correlation.
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("Callback payload is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Unknown job")]
    UnknownJob,

    #[error("Callback token rejected")]
    TokenMismatch,

    #[error("Job is not awaiting a callback")]
    NotAwaiting,

    #[error("Secret generation failed: {0}")]
    SecretGeneration(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, StorymillError>;
