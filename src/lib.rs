use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Collection '{collection}' exists with dimension {existing}, but the current embedding model uses {expected}. Reset the collection to re-index with the new dimension."
    )]
    DimensionMismatch {
        collection: String,
        existing: usize,
        expected: usize,
    },

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod llm;
pub mod rag;
pub mod vectordb;
