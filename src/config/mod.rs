// Configuration management module
// Handles TOML configuration loading, validation, and defaults

pub mod settings;

pub use settings::{Config, ConfigError, LlmConfig, RagConfig, VectorDbConfig};
