// pgvector relational backend
// Collections are plain Postgres tables created with dynamic DDL; the
// ANN index is built manually once a collection crosses the record
// threshold

#[cfg(test)]
mod tests;

use std::str::FromStr;

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use super::{CollectionInfo, DistanceMethod, IndexAlgorithm, RetrievedDocument, VectorStore};
use crate::config::VectorDbConfig;
use crate::{RagError, Result};

/// Vector store backed by Postgres with the pgvector extension.
///
/// Every collection is a dedicated table named `collection_<project>`,
/// so collection names are interpolated into SQL; [`valid_collection_name`]
/// gates every statement that does so.
#[derive(Debug)]
pub struct PgVectorStore {
    pool: PgPool,
    distance_method: DistanceMethod,
    index_algorithm: IndexAlgorithm,
    index_threshold: u64,
}

/// Collection names become SQL identifiers, so anything outside the
/// expected `collection_<id>` shape is refused.
fn valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

fn index_name(collection_name: &str) -> String {
    format!("{}_vector_idx", collection_name)
}

impl PgVectorStore {
    /// Create a store over a lazily connected pool. No connection is
    /// attempted until the first operation.
    #[inline]
    pub fn new(config: &VectorDbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&config.url)
            .map_err(|e| {
                RagError::VectorStore(format!("Invalid Postgres connection string: {}", e))
            })?;

        Ok(Self {
            pool,
            distance_method: DistanceMethod::from_str(&config.distance_method)?,
            index_algorithm: IndexAlgorithm::default(),
            index_threshold: config.index_threshold,
        })
    }

    /// pgvector operator class for the configured distance method.
    ///
    /// The `dot` method maps to the L2 operator class; search scoring
    /// always uses the cosine distance operator.
    fn operator_class(&self) -> &'static str {
        match self.distance_method {
            DistanceMethod::Cosine => "vector_cosine_ops",
            DistanceMethod::Dot => "vector_l2_ops",
        }
    }

    async fn index_exists(&self, collection_name: &str) -> bool {
        let check = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM pg_indexes WHERE tablename = $1 AND indexname = $2",
        )
        .bind(collection_name)
        .bind(index_name(collection_name))
        .fetch_optional(&self.pool)
        .await;

        match check {
            Ok(row) => row.is_some(),
            Err(e) => {
                error!("Error checking index existence: {}", e);
                false
            }
        }
    }

    async fn record_count(&self, collection_name: &str) -> Option<i64> {
        let count_sql = format!("SELECT COUNT(*) FROM {}", collection_name);
        match sqlx::query_scalar::<_, i64>(&count_sql)
            .fetch_one(&self.pool)
            .await
        {
            Ok(count) => Some(count),
            Err(e) => {
                error!("Error counting records in {}: {}", collection_name, e);
                None
            }
        }
    }

    /// Declared dimension of the collection's vector column, read from
    /// the catalog. pgvector stores the dimension as the column typmod.
    async fn declared_vector_size(&self, collection_name: &str) -> Option<usize> {
        let typmod = sqlx::query_scalar::<_, i32>(
            "SELECT atttypmod FROM pg_attribute \
             WHERE attrelid = $1::regclass AND attname = 'vector'",
        )
        .bind(collection_name)
        .fetch_optional(&self.pool)
        .await;

        match typmod {
            Ok(Some(dim)) if dim > 0 => usize::try_from(dim).ok(),
            Ok(_) => None,
            Err(e) => {
                debug!(
                    "Could not read vector dimension for {}: {}",
                    collection_name, e
                );
                None
            }
        }
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    /// Ensure the pgvector extension is installed. Losing the race to
    /// another connection creating it is tolerated.
    async fn connect(&self) -> Result<()> {
        let existing =
            sqlx::query_scalar::<_, i32>("SELECT 1 FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RagError::VectorStore(format!("Failed to reach Postgres: {}", e)))?;

        if existing.is_none() {
            if let Err(e) = sqlx::query("CREATE EXTENSION vector").execute(&self.pool).await {
                debug!("Vector extension setup: {}", e);
            }
        }

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        debug!("Closed Postgres connection pool");
        Ok(())
    }

    async fn collection_exists(&self, collection_name: &str) -> bool {
        let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM pg_tables WHERE tablename = $1")
            .bind(collection_name)
            .fetch_optional(&self.pool)
            .await;

        match exists {
            Ok(row) => row.is_some(),
            Err(e) => {
                error!("Error checking collection existence: {}", e);
                false
            }
        }
    }

    async fn list_collections(&self) -> Vec<String> {
        let listed =
            sqlx::query_scalar::<_, String>("SELECT tablename FROM pg_tables WHERE tablename LIKE $1")
                .bind(format!("{}%", super::COLLECTION_PREFIX))
                .fetch_all(&self.pool)
                .await;

        match listed {
            Ok(names) => names,
            Err(e) => {
                error!("Error listing collections: {}", e);
                Vec::new()
            }
        }
    }

    async fn collection_info(&self, collection_name: &str) -> Option<CollectionInfo> {
        if !valid_collection_name(collection_name) {
            error!("Invalid collection name: {}", collection_name);
            return None;
        }

        let table_row = sqlx::query(
            "SELECT schemaname, tablename, tableowner, tablespace, hasindexes \
             FROM pg_tables WHERE tablename = $1",
        )
        .bind(collection_name)
        .fetch_optional(&self.pool)
        .await;

        let row = match table_row {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                error!("Error getting collection info: {}", e);
                return None;
            }
        };

        let record_count = self.record_count(collection_name).await?;

        let details = json!({
            "table_info": {
                "schemaname": row.try_get::<String, _>("schemaname").ok(),
                "tablename": row.try_get::<String, _>("tablename").ok(),
                "tableowner": row.try_get::<String, _>("tableowner").ok(),
                "tablespace": row.try_get::<Option<String>, _>("tablespace").ok().flatten(),
                "hasindexes": row.try_get::<bool, _>("hasindexes").ok(),
            },
        });

        Some(CollectionInfo {
            details,
            vector_size: self.declared_vector_size(collection_name).await,
            record_count: u64::try_from(record_count).unwrap_or(0),
        })
    }

    async fn delete_collection(&self, collection_name: &str) -> bool {
        if !valid_collection_name(collection_name) {
            error!("Invalid collection name: {}", collection_name);
            return false;
        }

        let drop_sql = format!("DROP TABLE IF EXISTS {} CASCADE", collection_name);
        match sqlx::query(&drop_sql).execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                error!("Error deleting collection {}: {}", collection_name, e);
                false
            }
        }
    }

    async fn create_collection(
        &self,
        collection_name: &str,
        embedding_size: usize,
        do_reset: bool,
    ) -> bool {
        if !valid_collection_name(collection_name) {
            error!("Invalid collection name: {}", collection_name);
            return false;
        }

        if do_reset {
            let _ = self.delete_collection(collection_name).await;
        }

        if self.collection_exists(collection_name).await {
            return false;
        }

        // The chunk-id foreign key can only be attached when the external
        // chunk store lives in the same database.
        let has_chunk_store =
            sqlx::query_scalar::<_, i32>("SELECT 1 FROM pg_tables WHERE tablename = 'chunks'")
                .fetch_optional(&self.pool)
                .await
                .ok()
                .flatten()
                .is_some();

        let fk_clause = if has_chunk_store {
            ", FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id) ON DELETE CASCADE"
        } else {
            debug!(
                "No chunks table found; creating {} without the chunk_id foreign key",
                collection_name
            );
            ""
        };

        let create_sql = format!(
            "CREATE TABLE {} (\
             id bigserial PRIMARY KEY, \
             text text, \
             vector vector({}), \
             metadata jsonb DEFAULT '{{}}', \
             chunk_id bigint{})",
            collection_name, embedding_size, fk_clause
        );

        match sqlx::query(&create_sql).execute(&self.pool).await {
            Ok(_) => {
                debug!("Successfully created collection: {}", collection_name);
                true
            }
            Err(e) => {
                error!("Error creating collection {}: {}", collection_name, e);
                false
            }
        }
    }

    async fn insert_one(
        &self,
        collection_name: &str,
        text: &str,
        vector: &[f32],
        metadata: Option<Value>,
        record_id: Option<i64>,
    ) -> bool {
        if !valid_collection_name(collection_name) {
            error!("Invalid collection name: {}", collection_name);
            return false;
        }

        if !self.collection_exists(collection_name).await {
            error!(
                "Cannot insert into non-existent collection: {}",
                collection_name
            );
            return false;
        }

        let Some(record_id) = record_id else {
            error!("Cannot insert record without a record id");
            return false;
        };

        let insert_sql = format!(
            "INSERT INTO {} (text, vector, metadata, chunk_id) VALUES ($1, $2, $3, $4)",
            collection_name
        );
        let embedding = Vector::from(vector.to_vec());
        let metadata = metadata.unwrap_or_else(|| json!({}));

        let inserted = sqlx::query(&insert_sql)
            .bind(text)
            .bind(&embedding)
            .bind(&metadata)
            .bind(record_id)
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => {
                let _ = self.create_index(collection_name).await;
                true
            }
            Err(e) => {
                error!("Error inserting record: {}", e);
                false
            }
        }
    }

    async fn insert_many(
        &self,
        collection_name: &str,
        texts: &[String],
        vectors: &[Vec<f32>],
        metadata: Option<Vec<Value>>,
        record_ids: &[i64],
        batch_size: usize,
    ) -> bool {
        if !valid_collection_name(collection_name) {
            error!("Invalid collection name: {}", collection_name);
            return false;
        }

        if !self.collection_exists(collection_name).await {
            error!(
                "Cannot insert into non-existent collection: {}",
                collection_name
            );
            return false;
        }

        if vectors.len() != record_ids.len() || texts.len() != vectors.len() {
            error!(
                "Mismatched insert counts: {} texts, {} vectors, {} record ids",
                texts.len(),
                vectors.len(),
                record_ids.len()
            );
            return false;
        }

        let metadata = match metadata {
            Some(values) if !values.is_empty() => {
                if values.len() != texts.len() {
                    error!(
                        "Mismatched insert counts: {} texts, {} metadata entries",
                        texts.len(),
                        values.len()
                    );
                    return false;
                }
                values
            }
            _ => vec![json!({}); texts.len()],
        };

        let batch_size = batch_size.max(1);
        let insert_sql = format!(
            "INSERT INTO {} (text, vector, metadata, chunk_id) VALUES ($1, $2, $3, $4)",
            collection_name
        );

        for (batch_index, start) in (0..texts.len()).step_by(batch_size).enumerate() {
            let end = (start + batch_size).min(texts.len());

            let mut tx = match self.pool.begin().await {
                Ok(tx) => tx,
                Err(e) => {
                    error!("Error starting insert transaction: {}", e);
                    return false;
                }
            };

            for i in start..end {
                let embedding = Vector::from(vectors[i].clone());
                let inserted = sqlx::query(&insert_sql)
                    .bind(&texts[i])
                    .bind(&embedding)
                    .bind(&metadata[i])
                    .bind(record_ids[i])
                    .execute(&mut *tx)
                    .await;

                if let Err(e) = inserted {
                    error!("Error inserting batch: {}", e);
                    return false;
                }
            }

            if let Err(e) = tx.commit().await {
                error!("Error committing batch: {}", e);
                return false;
            }

            debug!(
                "Inserted batch {} ({} records)",
                batch_index + 1,
                end - start
            );
        }

        let _ = self.create_index(collection_name).await;
        true
    }

    async fn search_by_vector(
        &self,
        collection_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Vec<RetrievedDocument> {
        if !valid_collection_name(collection_name) {
            error!("Invalid collection name: {}", collection_name);
            return Vec::new();
        }

        if !self.collection_exists(collection_name).await {
            error!(
                "Cannot search in non-existent collection: {}",
                collection_name
            );
            return Vec::new();
        }

        // <=> is the pgvector cosine distance operator; identical vectors
        // score 1.0.
        let search_sql = format!(
            "SELECT text, 1 - (vector <=> $1) AS score FROM {} ORDER BY score DESC LIMIT $2",
            collection_name
        );
        let embedding = Vector::from(vector.to_vec());

        let rows = sqlx::query(&search_sql)
            .bind(&embedding)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await;

        match rows {
            Ok(rows) => {
                let mut results = Vec::with_capacity(rows.len());
                for row in rows {
                    let text = row.try_get::<Option<String>, _>("text");
                    let score = row.try_get::<f64, _>("score");
                    match (text, score) {
                        (Ok(text), Ok(score)) => results.push(RetrievedDocument {
                            text: text.unwrap_or_default(),
                            score: score as f32,
                        }),
                        (Err(e), _) | (_, Err(e)) => {
                            error!("Error decoding search result: {}", e);
                            return Vec::new();
                        }
                    }
                }
                debug!(
                    "Search in {} returned {} records",
                    collection_name,
                    results.len()
                );
                results
            }
            Err(e) => {
                error!("Error searching collection {}: {}", collection_name, e);
                Vec::new()
            }
        }
    }

    /// Build the ANN index once the record threshold is reached. Returns
    /// `false` when skipped (index already present, below threshold) or
    /// failed; a failure never propagates to the enclosing insert.
    async fn create_index(&self, collection_name: &str) -> bool {
        if !valid_collection_name(collection_name) {
            error!("Invalid collection name: {}", collection_name);
            return false;
        }

        if self.index_exists(collection_name).await {
            debug!("Index already exists for {}", collection_name);
            return false;
        }

        let Some(records_count) = self.record_count(collection_name).await else {
            return false;
        };

        if u64::try_from(records_count).unwrap_or(0) < self.index_threshold {
            debug!(
                "Record count ({}) below threshold ({})",
                records_count, self.index_threshold
            );
            return false;
        }

        debug!(
            "Creating vector index for collection: {} ({} records)",
            collection_name, records_count
        );

        let create_idx_sql = format!(
            "CREATE INDEX {} ON {} USING {} (vector {})",
            index_name(collection_name),
            collection_name,
            self.index_algorithm.as_sql(),
            self.operator_class()
        );

        match sqlx::query(&create_idx_sql).execute(&self.pool).await {
            Ok(_) => {
                debug!(
                    "Successfully created vector index for collection: {}",
                    collection_name
                );
                true
            }
            Err(e) => {
                error!("Error creating vector index: {}", e);
                false
            }
        }
    }

    async fn reset_index(&self, collection_name: &str) -> bool {
        if !valid_collection_name(collection_name) {
            error!("Invalid collection name: {}", collection_name);
            return false;
        }

        let drop_sql = format!("DROP INDEX IF EXISTS {}", index_name(collection_name));
        match sqlx::query(&drop_sql).execute(&self.pool).await {
            Ok(_) => debug!("Dropped index: {}", index_name(collection_name)),
            Err(e) => error!("Error dropping index: {}", e),
        }

        self.create_index(collection_name).await
    }
}
