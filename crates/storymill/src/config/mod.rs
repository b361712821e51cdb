//! Service configuration: YAML file plus environment overrides.

pub mod loader;
pub mod schema;

pub use loader::{load_config, resolve_secret};
pub use schema::{Config, ExtractionConfig, IndexConfig};
