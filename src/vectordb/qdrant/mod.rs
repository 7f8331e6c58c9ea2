// Qdrant ANN-service backend
// Thin adapter over the native vector engine; Qdrant manages its own
// index incrementally, so there is no manual index lifecycle here


use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CollectionInfo as QdrantCollectionInfo, CreateCollectionBuilder, Distance, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::{Value, json};
use tracing::{debug, error};

use super::{CollectionInfo, DistanceMethod, RetrievedDocument, VectorStore};
use crate::config::VectorDbConfig;
use crate::{RagError, Result};

/// Vector store backed by a Qdrant service.
pub struct QdrantStore {
    client: Qdrant,
    distance_method: DistanceMethod,
}

impl std::fmt::Debug for QdrantStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("distance_method", &self.distance_method)
            .finish_non_exhaustive()
    }
}

impl QdrantStore {
    /// Create a store over a lazily connected client. No request is sent
    /// until the first operation.
    #[inline]
    pub fn new(config: &VectorDbConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .build()
            .map_err(|e| RagError::VectorStore(format!("Failed to build Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            distance_method: DistanceMethod::from_str(&config.distance_method)?,
        })
    }

    fn distance(&self) -> Distance {
        match self.distance_method {
            DistanceMethod::Cosine => Distance::Cosine,
            DistanceMethod::Dot => Distance::Dot,
        }
    }

    fn build_payload(text: &str, metadata: &Value) -> Payload {
        let mut payload = HashMap::new();
        payload.insert("text".to_string(), QdrantValue::from(text));
        payload.insert("metadata".to_string(), QdrantValue::from(metadata.clone()));
        Payload::from(payload)
    }

    fn extract_vector_size(info: &QdrantCollectionInfo) -> Option<usize> {
        let vectors = info
            .config
            .as_ref()?
            .params
            .as_ref()?
            .vectors_config
            .as_ref()?
            .config
            .as_ref()?;

        match vectors {
            VectorsConfigKind::Params(params) => usize::try_from(params.size).ok(),
            VectorsConfigKind::ParamsMap(_) => None,
        }
    }

    fn payload_text(point_payload: &HashMap<String, QdrantValue>) -> String {
        point_payload
            .get("text")
            .and_then(|value| match &value.kind {
                Some(Kind::StringValue(text)) => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    /// Liveness probe against the service.
    async fn connect(&self) -> Result<()> {
        self.client
            .health_check()
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to reach Qdrant: {}", e)))?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("Qdrant client released");
        Ok(())
    }

    async fn collection_exists(&self, collection_name: &str) -> bool {
        match self.client.collection_exists(collection_name).await {
            Ok(exists) => exists,
            Err(e) => {
                error!("Error checking collection existence: {}", e);
                false
            }
        }
    }

    async fn list_collections(&self) -> Vec<String> {
        match self.client.list_collections().await {
            Ok(response) => response
                .collections
                .into_iter()
                .map(|collection| collection.name)
                .collect(),
            Err(e) => {
                error!("Error listing collections: {}", e);
                Vec::new()
            }
        }
    }

    async fn collection_info(&self, collection_name: &str) -> Option<CollectionInfo> {
        let response = match self.client.collection_info(collection_name).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error getting collection info: {}", e);
                return None;
            }
        };

        let info = response.result?;
        let vector_size = Self::extract_vector_size(&info);
        let record_count = info.points_count.unwrap_or(0);

        let details = json!({
            "status": info.status,
            "points_count": record_count,
            "segments_count": info.segments_count,
            "config": {
                "params": {
                    "vectors": {
                        "size": vector_size,
                    },
                },
            },
        });

        Some(CollectionInfo {
            details,
            vector_size,
            record_count,
        })
    }

    /// Fire-and-forget delete; the service applies it eventually.
    async fn delete_collection(&self, collection_name: &str) -> bool {
        match self.client.delete_collection(collection_name).await {
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
        if do_reset {
            let _ = self.delete_collection(collection_name).await;
        }

        if self.collection_exists(collection_name).await {
            return false;
        }

        let request = CreateCollectionBuilder::new(collection_name).vectors_config(
            VectorParamsBuilder::new(embedding_size as u64, self.distance()),
        );

        match self.client.create_collection(request).await {
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

        let Ok(point_id) = u64::try_from(record_id) else {
            error!("Record id {} cannot be used as a point id", record_id);
            return false;
        };

        let metadata = metadata.unwrap_or_else(|| json!({}));
        let point = PointStruct::new(
            point_id,
            vector.to_vec(),
            Self::build_payload(text, &metadata),
        );

        let request = UpsertPointsBuilder::new(collection_name, vec![point]).wait(true);
        match self.client.upsert_points(request).await {
            Ok(_) => true,
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

        for (batch_index, start) in (0..texts.len()).step_by(batch_size).enumerate() {
            let end = (start + batch_size).min(texts.len());
            let mut points = Vec::with_capacity(end - start);

            for i in start..end {
                let Ok(point_id) = u64::try_from(record_ids[i]) else {
                    error!("Record id {} cannot be used as a point id", record_ids[i]);
                    return false;
                };

                points.push(PointStruct::new(
                    point_id,
                    vectors[i].clone(),
                    Self::build_payload(&texts[i], &metadata[i]),
                ));
            }

            let request = UpsertPointsBuilder::new(collection_name, points).wait(true);
            if let Err(e) = self.client.upsert_points(request).await {
                error!("Error inserting batch: {}", e);
                return false;
            }

            debug!(
                "Inserted batch {} ({} records)",
                batch_index + 1,
                end - start
            );
        }

        true
    }

    async fn search_by_vector(
        &self,
        collection_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Vec<RetrievedDocument> {
        let request = SearchPointsBuilder::new(collection_name, vector.to_vec(), limit as u64)
            .with_payload(true);

        match self.client.search_points(request).await {
            Ok(response) => {
                let results: Vec<RetrievedDocument> = response
                    .result
                    .into_iter()
                    .map(|point| RetrievedDocument {
                        text: Self::payload_text(&point.payload),
                        score: point.score,
                    })
                    .collect();
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

    /// Qdrant indexes incrementally on its own; nothing to build.
    async fn create_index(&self, collection_name: &str) -> bool {
        debug!(
            "Collection {} uses native index management; nothing to build",
            collection_name
        );
        true
    }

    async fn reset_index(&self, collection_name: &str) -> bool {
        debug!(
            "Collection {} uses native index management; nothing to rebuild",
            collection_name
        );
        true
    }
}
