#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::vectordb::{DistanceMethod, VectorBackend};

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub vector_db: VectorDbConfig,
}

/// Settings for the OpenAI-compatible embedding and generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub embedding_size: usize,
    pub max_input_characters: usize,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            generation_model: "llama3.1:latest".to_string(),
            embedding_model: "nomic-embed-text:latest".to_string(),
            embedding_size: DEFAULT_EMBEDDING_DIMENSION,
            max_input_characters: 4096,
            max_output_tokens: 200,
            temperature: 0.1,
            timeout_secs: 120,
        }
    }
}

/// Prompt assembly limits for answer generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub max_prompt_length: usize,
    pub max_documents: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_prompt_length: 3000,
            max_documents: 5,
        }
    }
}

/// Vector store selection and backend tuning.
///
/// `url` is the Qdrant endpoint for the `qdrant` backend and a Postgres
/// connection string for the `pgvector` backend. `index_threshold` only
/// applies to `pgvector`, which builds its ANN index manually once a
/// collection reaches that many records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorDbConfig {
    pub backend: String,
    pub url: String,
    pub distance_method: String,
    pub index_threshold: u64,
    pub insert_batch_size: usize,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: "qdrant".to_string(),
            url: "http://localhost:6334".to_string(),
            distance_method: "cosine".to_string(),
            index_threshold: 100,
            insert_batch_size: 50,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid max input characters: {0} (must be at least 1)")]
    InvalidMaxInputCharacters(usize),
    #[error("Invalid max output tokens: {0} (must be at least 1)")]
    InvalidMaxOutputTokens(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max prompt length: {0} (must be at least 1)")]
    InvalidMaxPromptLength(usize),
    #[error("Invalid max documents: {0} (must be at least 1)")]
    InvalidMaxDocuments(usize),
    #[error("Invalid vector store backend: {0} (must be 'qdrant' or 'pgvector')")]
    InvalidBackend(String),
    #[error("Invalid distance method: {0} (must be 'cosine' or 'dot')")]
    InvalidDistanceMethod(String),
    #[error("Invalid index threshold: {0} (must be at least 1)")]
    InvalidIndexThreshold(u64),
    #[error("Invalid insert batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save<P: AsRef<Path>>(&self, config_path: P) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm.validate()?;
        self.rag.validate()?;
        self.vector_db.validate()?;
        Ok(())
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_url()?;

        if self.generation_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.generation_model.clone()));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if !(64..=4096).contains(&self.embedding_size) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.embedding_size));
        }

        if self.max_input_characters == 0 {
            return Err(ConfigError::InvalidMaxInputCharacters(
                self.max_input_characters,
            ));
        }

        if self.max_output_tokens == 0 {
            return Err(ConfigError::InvalidMaxOutputTokens(self.max_output_tokens));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        Ok(())
    }

    pub fn api_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.api_url).map_err(|_| ConfigError::InvalidUrl(self.api_url.clone()))
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_prompt_length == 0 {
            return Err(ConfigError::InvalidMaxPromptLength(self.max_prompt_length));
        }

        if self.max_documents == 0 {
            return Err(ConfigError::InvalidMaxDocuments(self.max_documents));
        }

        Ok(())
    }
}

impl VectorDbConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        VectorBackend::from_str(&self.backend)
            .map_err(|_| ConfigError::InvalidBackend(self.backend.clone()))?;

        DistanceMethod::from_str(&self.distance_method)
            .map_err(|_| ConfigError::InvalidDistanceMethod(self.distance_method.clone()))?;

        if self.url.trim().is_empty() {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }

        if self.index_threshold == 0 {
            return Err(ConfigError::InvalidIndexThreshold(self.index_threshold));
        }

        if self.insert_batch_size == 0 || self.insert_batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.insert_batch_size));
        }

        Ok(())
    }
}
