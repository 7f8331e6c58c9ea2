// Retrieval-augmentation orchestrator
// Composes the embedding provider, vector store, template catalog, and
// generation provider into indexing, search, and answer generation

#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::llm::{
    ChatMessage, ChatRole, EmbeddingMode, EmbeddingProvider, GenerationProvider, TemplateCatalog,
};
use crate::vectordb::{CollectionInfo, RetrievedDocument, VectorStore, collection_name_for};
use crate::{RagError, Result};

/// One text chunk handed in for indexing. The external chunk store owns
/// parsing and pagination; the pipeline indexes exactly what it is given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataChunk {
    pub chunk_text: String,
    #[serde(default)]
    pub chunk_order: i64,
    #[serde(default)]
    pub chunk_metadata: Value,
}

/// Observability triple returned by [`RagPipeline::answer_question`]:
/// the generated answer plus the exact prompt and chat history sent to
/// the generation provider.
///
/// `answer` is `None` when retrieval produced nothing to answer from,
/// which is distinct from a provider returning an empty string.
#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    pub answer: Option<String>,
    pub full_prompt: String,
    pub chat_history: Vec<ChatMessage>,
}

impl RagAnswer {
    /// Marker for "nothing to answer from": retrieval returned zero
    /// documents, so no prompt was assembled and no generation ran.
    #[inline]
    pub fn no_context() -> Self {
        Self {
            answer: None,
            full_prompt: String::new(),
            chat_history: Vec::new(),
        }
    }

    #[inline]
    pub fn is_no_context(&self) -> bool {
        self.answer.is_none()
    }
}

/// Retrieval-augmented generation pipeline over one vector store and one
/// pair of embedding/generation providers.
///
/// Stateless per call aside from the held provider handles, so concurrent
/// use across different projects is safe. Concurrent mutation of the same
/// project's collection is not synchronized here; callers serialize that.
pub struct RagPipeline {
    vector_store: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    generation: Arc<dyn GenerationProvider>,
    templates: TemplateCatalog,
    max_prompt_length: usize,
    max_documents: usize,
    insert_batch_size: usize,
}

/// Truncate to at most `max` characters. Prompt budgets count characters,
/// not bytes, so multi-byte text never splits mid-character.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl RagPipeline {
    #[inline]
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        generation: Arc<dyn GenerationProvider>,
        templates: TemplateCatalog,
        config: &Config,
    ) -> Self {
        Self {
            vector_store,
            embedding,
            generation,
            templates,
            max_prompt_length: config.rag.max_prompt_length,
            max_documents: config.rag.max_documents,
            insert_batch_size: config.vector_db.insert_batch_size,
        }
    }

    /// Collection name for a project. Pure mapping, no side effect.
    #[inline]
    pub fn collection_name_for(&self, project_id: &str) -> String {
        collection_name_for(project_id)
    }

    /// Delete and recreate the project's collection, sized to the active
    /// embedding dimension. Returns whether the new collection was created.
    #[inline]
    pub async fn reset_collection(&self, project_id: &str) -> bool {
        let collection_name = collection_name_for(project_id);
        let _ = self.vector_store.delete_collection(&collection_name).await;
        self.vector_store
            .create_collection(&collection_name, self.embedding.embedding_size(), false)
            .await
    }

    #[inline]
    pub async fn collection_info(&self, project_id: &str) -> Option<CollectionInfo> {
        self.vector_store
            .collection_info(&collection_name_for(project_id))
            .await
    }

    /// Embed and index a batch of chunks under the supplied chunk ids.
    ///
    /// Indexes exactly the batch it is handed; paging through a larger
    /// chunk source is the caller's loop. Returns the number of chunks
    /// indexed; zero across a whole run is a failure signal for callers.
    #[inline]
    pub async fn index_chunks(
        &self,
        project_id: &str,
        chunks: &[DataChunk],
        chunk_ids: &[i64],
        do_reset: bool,
    ) -> Result<usize> {
        if chunks.len() != chunk_ids.len() {
            return Err(RagError::Config(format!(
                "Mismatched index request: {} chunks, {} chunk ids",
                chunks.len(),
                chunk_ids.len()
            )));
        }

        let collection_name = collection_name_for(project_id);
        let embedding_size = self.embedding.embedding_size();

        if do_reset {
            let _ = self.reset_collection(project_id).await;
        }

        // An existing collection must match the active embedding dimension;
        // mismatch aborts before any mutation. An unreadable dimension is
        // only a warning.
        if self.vector_store.collection_exists(&collection_name).await {
            match self.vector_store.collection_info(&collection_name).await {
                Some(info) => {
                    if let Some(existing) = info.vector_size {
                        if existing != embedding_size {
                            return Err(RagError::DimensionMismatch {
                                collection: collection_name,
                                existing,
                                expected: embedding_size,
                            });
                        }
                    } else {
                        warn!(
                            "Could not validate embedding dimensions for collection '{}'",
                            collection_name
                        );
                    }
                }
                None => warn!(
                    "Could not validate embedding dimensions for collection '{}'",
                    collection_name
                ),
            }
        }

        // Skips if already present.
        let _ = self
            .vector_store
            .create_collection(&collection_name, embedding_size, false)
            .await;

        let mut texts = Vec::with_capacity(chunks.len());
        let mut vectors = Vec::with_capacity(chunks.len());
        let mut metadata = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let vector = self
                .embedding
                .embed_text(&chunk.chunk_text, EmbeddingMode::Document)
                .await?;

            texts.push(chunk.chunk_text.clone());
            vectors.push(vector);
            metadata.push(json!({
                "chunk_project_id": project_id,
                "chunk_text": chunk.chunk_text,
                "chunk_order": chunk.chunk_order,
                "chunk_metadata": chunk.chunk_metadata,
            }));
        }

        let inserted = self
            .vector_store
            .insert_many(
                &collection_name,
                &texts,
                &vectors,
                Some(metadata),
                chunk_ids,
                self.insert_batch_size,
            )
            .await;

        if !inserted {
            warn!("Vector store refused the insert into {}", collection_name);
            return Ok(0);
        }

        info!("Indexed {} chunks into {}", chunks.len(), collection_name);
        Ok(chunks.len())
    }

    /// Retrieve the chunks most similar to `text`, ranked descending by
    /// score. A missing collection yields an empty vec, not an error.
    #[inline]
    pub async fn search_similar(
        &self,
        project_id: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let collection_name = collection_name_for(project_id);
        let query_embedding = self.embedding.embed_text(text, EmbeddingMode::Query).await?;

        Ok(self
            .vector_store
            .search_by_vector(&collection_name, &query_embedding, limit)
            .await)
    }

    /// Answer `query` from the project's indexed chunks.
    ///
    /// Retrieval is bounded by `min(limit, max_documents)`. Zero results
    /// short-circuit to [`RagAnswer::no_context`] without touching the
    /// generation provider; generation failures propagate unmodified.
    #[inline]
    pub async fn answer_question(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<RagAnswer> {
        let effective_limit = limit.min(self.max_documents);
        let search_results = self
            .search_similar(project_id, query, effective_limit)
            .await?;

        if search_results.is_empty() {
            debug!("No documents retrieved for project {}", project_id);
            return Ok(RagAnswer::no_context());
        }

        let full_prompt = self.assemble_prompt(&search_results, query)?;

        let system_prompt = self
            .templates
            .get("rag", "system_prompt", &[])
            .ok_or_else(|| RagError::Config("Missing template rag/system_prompt".to_string()))?;

        let mut chat_history = vec![
            self.generation
                .construct_prompt(&system_prompt, ChatRole::System),
        ];

        let answer = self
            .generation
            .generate_text(&full_prompt, &chat_history)
            .await?;

        // The history sent to the provider ended with the prompt as the
        // user turn; the returned triple reflects that.
        chat_history.push(self.generation.construct_prompt(&full_prompt, ChatRole::User));

        Ok(RagAnswer {
            answer: Some(answer),
            full_prompt,
            chat_history,
        })
    }

    /// Assemble numbered document blocks plus the query footer, enforcing
    /// the character budget. The footer survives truncation intact unless
    /// it alone exceeds the budget.
    fn assemble_prompt(&self, search_results: &[RetrievedDocument], query: &str) -> Result<String> {
        let mut document_blocks = Vec::with_capacity(search_results.len());
        for (idx, document) in search_results.iter().enumerate() {
            let block = self
                .templates
                .get(
                    "rag",
                    "document_prompt",
                    &[
                        ("doc_num", &(idx + 1).to_string()),
                        ("chunk_text", &document.text),
                    ],
                )
                .ok_or_else(|| {
                    RagError::Config("Missing template rag/document_prompt".to_string())
                })?;
            document_blocks.push(block);
        }

        let documents_prompt = document_blocks.join("\n");
        let footer_prompt = self
            .templates
            .get("rag", "footer_prompt", &[("query", query)])
            .ok_or_else(|| RagError::Config("Missing template rag/footer_prompt".to_string()))?;

        let mut full_prompt = format!("{}\n{}", documents_prompt, footer_prompt);

        let prompt_length = full_prompt.chars().count();
        if prompt_length > self.max_prompt_length {
            warn!(
                "Prompt truncated: {} -> {} chars",
                prompt_length, self.max_prompt_length
            );

            let footer_length = footer_prompt.chars().count();
            // Truncate the document section first, keeping the footer and
            // its separating newline intact.
            if self.max_prompt_length > footer_length + 2 {
                let available_space = self.max_prompt_length - footer_length - 2;
                full_prompt = format!(
                    "{}\n{}",
                    truncate_chars(&documents_prompt, available_space),
                    footer_prompt
                );
            } else {
                // The footer alone exceeds the budget; cap the whole prompt.
                full_prompt = truncate_chars(&full_prompt, self.max_prompt_length).to_string();
            }
        }

        Ok(full_prompt)
    }
}
