// Vector store module
// One capability contract with two backends: a native ANN service (Qdrant)
// and a relational extension (pgvector) with manual index lifecycle

#[cfg(test)]
mod tests;

pub mod pgvector;
pub mod qdrant;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::{RagError, Result};

pub use pgvector::PgVectorStore;
pub use qdrant::QdrantStore;

/// Prefix shared by all per-project collection names.
pub const COLLECTION_PREFIX: &str = "collection_";

/// Derive the collection name for a project id.
///
/// Pure function: one project maps to exactly one collection.
#[inline]
pub fn collection_name_for(project_id: &str) -> String {
    format!("{}{}", COLLECTION_PREFIX, project_id.trim())
}

/// Supported vector store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Qdrant,
    PgVector,
}

impl FromStr for VectorBackend {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "pgvector" => Ok(Self::PgVector),
            other => Err(RagError::Config(format!(
                "Unsupported vector store backend: {}",
                other
            ))),
        }
    }
}

/// Distance method used for similarity scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMethod {
    #[default]
    Cosine,
    Dot,
}

impl FromStr for DistanceMethod {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            other => Err(RagError::Config(format!(
                "Unsupported distance method: {}",
                other
            ))),
        }
    }
}

/// Index algorithm for the relational backend's manual ANN index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexAlgorithm {
    #[default]
    Hnsw,
    IvfFlat,
}

impl IndexAlgorithm {
    /// SQL keyword used in `CREATE INDEX ... USING <keyword>`.
    #[inline]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Hnsw => "hnsw",
            Self::IvfFlat => "ivfflat",
        }
    }
}

/// A single ranked search hit.
///
/// Both backends populate this identically; callers never need to know
/// which backend produced a result. For cosine similarity a score of 1.0
/// means identical vectors and 0.0 means orthogonal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    pub text: String,
    pub score: f32,
}

/// Backend-reported summary of a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionInfo {
    /// Backend-native metadata: the catalog row for the relational
    /// backend, the service collection config for the ANN backend.
    pub details: Value,
    /// Declared vector dimension, when the backend reports one.
    pub vector_size: Option<usize>,
    pub record_count: u64,
}

/// Capability contract over vector collections.
///
/// Operations on a missing collection return `false`/empty/`None`
/// sentinels rather than errors; adapters translate backend-native
/// failures into those sentinels and log them, so callers can tell
/// "no data" apart from an infrastructure failure without handling
/// backend-specific error types.
#[async_trait]
pub trait VectorStore: std::fmt::Debug + Send + Sync {
    /// Idempotent setup. The relational backend ensures the `vector`
    /// extension exists; the ANN backend probes service liveness.
    async fn connect(&self) -> Result<()>;

    /// Idempotent teardown. Safe to call when already disconnected.
    async fn disconnect(&self) -> Result<()>;

    async fn collection_exists(&self, collection_name: &str) -> bool;

    async fn list_collections(&self) -> Vec<String>;

    /// Structured summary plus record count, or `None` if absent.
    async fn collection_info(&self, collection_name: &str) -> Option<CollectionInfo>;

    /// Idempotent delete: returns `true` even when the collection was
    /// already absent.
    async fn delete_collection(&self, collection_name: &str) -> bool;

    /// Create a collection sized to `embedding_size`. With `do_reset`
    /// the collection is deleted first. Returns `false` without touching
    /// anything when the collection already exists after the reset check.
    async fn create_collection(
        &self,
        collection_name: &str,
        embedding_size: usize,
        do_reset: bool,
    ) -> bool;

    /// Insert a single record. The record id is required; `None` is
    /// refused. An id of zero is valid.
    async fn insert_one(
        &self,
        collection_name: &str,
        text: &str,
        vector: &[f32],
        metadata: Option<Value>,
        record_id: Option<i64>,
    ) -> bool;

    /// Bulk insert in batches of `batch_size`. Counts of texts, vectors,
    /// ids (and metadata when supplied) must match or the call is refused
    /// with no writes. A failure in a later batch may leave earlier
    /// batches committed: callers must treat a `false` return as
    /// at-least-the-first-N-batches applied, not all-or-nothing.
    async fn insert_many(
        &self,
        collection_name: &str,
        texts: &[String],
        vectors: &[Vec<f32>],
        metadata: Option<Vec<Value>>,
        record_ids: &[i64],
        batch_size: usize,
    ) -> bool;

    /// Ranked nearest-neighbor search, descending by score. A missing
    /// collection yields an empty vec, not an error.
    async fn search_by_vector(
        &self,
        collection_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Vec<RetrievedDocument>;

    /// Build the ANN index if the backend manages one manually and the
    /// collection has reached the configured record threshold. Backends
    /// with native incremental indexing treat this as a successful no-op.
    async fn create_index(&self, _collection_name: &str) -> bool {
        true
    }

    /// Drop and rebuild the ANN index unconditionally. No-op for
    /// backends with native indexing.
    async fn reset_index(&self, _collection_name: &str) -> bool {
        true
    }
}

/// Construct the configured vector store backend.
///
/// An unsupported backend selector fails here, at construction time.
/// Neither backend opens a network connection yet; `connect` does.
#[inline]
pub fn open_vector_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let db = &config.vector_db;
    match VectorBackend::from_str(&db.backend)? {
        VectorBackend::Qdrant => Ok(Arc::new(QdrantStore::new(db)?)),
        VectorBackend::PgVector => Ok(Arc::new(PgVectorStore::new(db)?)),
    }
}
