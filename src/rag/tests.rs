use super::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MockRecord {
    id: i64,
    text: String,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct MockCollection {
    vector_size: Option<usize>,
    records: Vec<MockRecord>,
}

/// In-memory store exercising the trait contract's sentinel semantics.
#[derive(Debug, Default)]
struct MockStore {
    collections: Mutex<HashMap<String, MockCollection>>,
}

impl MockStore {
    fn with_collection(name: &str, vector_size: Option<usize>) -> Self {
        let store = Self::default();
        store.collections.lock().expect("lock").insert(
            name.to_string(),
            MockCollection {
                vector_size,
                records: Vec::new(),
            },
        );
        store
    }

    fn record_count(&self, name: &str) -> usize {
        self.collections
            .lock()
            .expect("lock")
            .get(name)
            .map_or(0, |collection| collection.records.len())
    }

    fn record_ids(&self, name: &str) -> Vec<i64> {
        self.collections
            .lock()
            .expect("lock")
            .get(name)
            .map_or_else(Vec::new, |collection| {
                collection.records.iter().map(|record| record.id).collect()
            })
    }
}

#[async_trait]
impl VectorStore for MockStore {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn collection_exists(&self, collection_name: &str) -> bool {
        self.collections
            .lock()
            .expect("lock")
            .contains_key(collection_name)
    }

    async fn list_collections(&self) -> Vec<String> {
        self.collections
            .lock()
            .expect("lock")
            .keys()
            .cloned()
            .collect()
    }

    async fn collection_info(&self, collection_name: &str) -> Option<CollectionInfo> {
        let collections = self.collections.lock().expect("lock");
        let collection = collections.get(collection_name)?;
        Some(CollectionInfo {
            details: json!({ "mock": true }),
            vector_size: collection.vector_size,
            record_count: collection.records.len() as u64,
        })
    }

    async fn delete_collection(&self, collection_name: &str) -> bool {
        self.collections
            .lock()
            .expect("lock")
            .remove(collection_name);
        true
    }

    async fn create_collection(
        &self,
        collection_name: &str,
        embedding_size: usize,
        do_reset: bool,
    ) -> bool {
        let mut collections = self.collections.lock().expect("lock");
        if do_reset {
            collections.remove(collection_name);
        }
        if collections.contains_key(collection_name) {
            return false;
        }
        collections.insert(
            collection_name.to_string(),
            MockCollection {
                vector_size: Some(embedding_size),
                records: Vec::new(),
            },
        );
        true
    }

    async fn insert_one(
        &self,
        collection_name: &str,
        text: &str,
        vector: &[f32],
        _metadata: Option<Value>,
        record_id: Option<i64>,
    ) -> bool {
        let Some(record_id) = record_id else {
            return false;
        };
        let mut collections = self.collections.lock().expect("lock");
        let Some(collection) = collections.get_mut(collection_name) else {
            return false;
        };
        collection.records.push(MockRecord {
            id: record_id,
            text: text.to_string(),
            vector: vector.to_vec(),
        });
        true
    }

    async fn insert_many(
        &self,
        collection_name: &str,
        texts: &[String],
        vectors: &[Vec<f32>],
        _metadata: Option<Vec<Value>>,
        record_ids: &[i64],
        _batch_size: usize,
    ) -> bool {
        if texts.len() != vectors.len() || vectors.len() != record_ids.len() {
            return false;
        }
        let mut collections = self.collections.lock().expect("lock");
        let Some(collection) = collections.get_mut(collection_name) else {
            return false;
        };
        for i in 0..texts.len() {
            collection.records.push(MockRecord {
                id: record_ids[i],
                text: texts[i].clone(),
                vector: vectors[i].clone(),
            });
        }
        true
    }

    async fn search_by_vector(
        &self,
        collection_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Vec<RetrievedDocument> {
        let collections = self.collections.lock().expect("lock");
        let Some(collection) = collections.get(collection_name) else {
            return Vec::new();
        };

        let mut results: Vec<RetrievedDocument> = collection
            .records
            .iter()
            .map(|record| RetrievedDocument {
                text: record.text.clone(),
                score: cosine_similarity(&record.vector, vector),
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        results
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Embedder returning a constant vector of a fixed dimension.
struct MockEmbedder {
    size: usize,
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed_text(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>> {
        // First component varies with text length so distinct chunks get
        // distinct vectors.
        let mut vector = vec![1.0; self.size];
        vector[0] = text.len() as f32;
        Ok(vector)
    }

    fn embedding_size(&self) -> usize {
        self.size
    }
}

/// Generator that records every prompt it receives.
#[derive(Default)]
struct MockGenerator {
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl GenerationProvider for MockGenerator {
    fn construct_prompt(&self, text: &str, role: ChatRole) -> ChatMessage {
        ChatMessage {
            role,
            content: text.to_string(),
        }
    }

    async fn generate_text(&self, prompt: &str, _chat_history: &[ChatMessage]) -> Result<String> {
        if self.fail {
            return Err(RagError::Generation("model unavailable".to_string()));
        }
        self.prompts
            .lock()
            .expect("lock")
            .push(prompt.to_string());
        Ok("generated answer".to_string())
    }
}

fn create_test_pipeline(
    store: MockStore,
    embedding_size: usize,
    generator: MockGenerator,
) -> (RagPipeline, Arc<MockStore>, Arc<MockGenerator>) {
    let store = Arc::new(store);
    let generator = Arc::new(generator);
    let pipeline = RagPipeline::new(
        Arc::clone(&store) as Arc<dyn VectorStore>,
        Arc::new(MockEmbedder {
            size: embedding_size,
        }),
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
        TemplateCatalog::new(),
        &Config::default(),
    );
    (pipeline, store, generator)
}

fn create_test_chunks(count: usize) -> (Vec<DataChunk>, Vec<i64>) {
    let chunks = (0..count)
        .map(|i| DataChunk {
            chunk_text: format!("chunk number {}", i),
            chunk_order: i as i64,
            chunk_metadata: json!({ "source": "test" }),
        })
        .collect();
    let ids = (1..=count as i64).collect();
    (chunks, ids)
}

#[tokio::test]
async fn collection_name_mapping_is_pure() {
    let (pipeline, _, _) = create_test_pipeline(MockStore::default(), 8, MockGenerator::default());
    assert_eq!(pipeline.collection_name_for("42"), "collection_42");
    assert_eq!(
        pipeline.collection_name_for("42"),
        pipeline.collection_name_for("42")
    );
}

#[tokio::test]
async fn indexing_creates_the_collection_lazily() {
    let (pipeline, store, _) =
        create_test_pipeline(MockStore::default(), 8, MockGenerator::default());
    let (chunks, ids) = create_test_chunks(3);

    let indexed = pipeline
        .index_chunks("p1", &chunks, &ids, false)
        .await
        .expect("should index");

    assert_eq!(indexed, 3);
    assert_eq!(store.record_count("collection_p1"), 3);
    assert_eq!(store.record_ids("collection_p1"), vec![1, 2, 3]);
}

#[tokio::test]
async fn dimension_mismatch_aborts_with_zero_inserts() {
    let store = MockStore::with_collection("collection_p1", Some(1536));
    let (pipeline, store, _) = create_test_pipeline(store, 768, MockGenerator::default());
    let (chunks, ids) = create_test_chunks(2);

    let err = pipeline
        .index_chunks("p1", &chunks, &ids, false)
        .await
        .expect_err("mismatched dimension should fail");

    match err {
        RagError::DimensionMismatch {
            collection,
            existing,
            expected,
        } => {
            assert_eq!(collection, "collection_p1");
            assert_eq!(existing, 1536);
            assert_eq!(expected, 768);
        }
        other => panic!("expected DimensionMismatch, got {:?}", other),
    }

    assert_eq!(store.record_count("collection_p1"), 0);
}

#[tokio::test]
async fn reset_clears_the_dimension_mismatch() {
    let store = MockStore::with_collection("collection_p1", Some(1536));
    let (pipeline, store, _) = create_test_pipeline(store, 768, MockGenerator::default());
    let (chunks, ids) = create_test_chunks(2);

    let indexed = pipeline
        .index_chunks("p1", &chunks, &ids, true)
        .await
        .expect("reset should clear the old dimension");

    assert_eq!(indexed, 2);
    assert_eq!(store.record_count("collection_p1"), 2);
}

#[tokio::test]
async fn unreadable_dimension_proceeds_with_a_warning() {
    let store = MockStore::with_collection("collection_p1", None);
    let (pipeline, store, _) = create_test_pipeline(store, 8, MockGenerator::default());
    let (chunks, ids) = create_test_chunks(1);

    let indexed = pipeline
        .index_chunks("p1", &chunks, &ids, false)
        .await
        .expect("unreadable dimension should not abort");

    assert_eq!(indexed, 1);
    assert_eq!(store.record_count("collection_p1"), 1);
}

#[tokio::test]
async fn mismatched_chunk_id_counts_are_refused() {
    let (pipeline, store, _) =
        create_test_pipeline(MockStore::default(), 8, MockGenerator::default());
    let (chunks, _) = create_test_chunks(3);

    let err = pipeline
        .index_chunks("p1", &chunks, &[1, 2], false)
        .await
        .expect_err("count mismatch should fail");

    assert!(matches!(err, RagError::Config(_)));
    assert_eq!(store.record_count("collection_p1"), 0);
}

#[tokio::test]
async fn search_on_missing_collection_is_empty() {
    let (pipeline, _, _) = create_test_pipeline(MockStore::default(), 8, MockGenerator::default());

    let results = pipeline
        .search_similar("ghost", "anything", 5)
        .await
        .expect("missing collection is not an error");

    assert!(results.is_empty());
}

#[tokio::test]
async fn search_returns_the_exact_match_first() {
    let (pipeline, _, _) = create_test_pipeline(MockStore::default(), 8, MockGenerator::default());
    // Texts of different lengths get distinct vectors from the mock
    // embedder, so querying with one exact text makes it the best match.
    let chunks: Vec<DataChunk> = ["ada", "grace hopper", "alan turing and colleagues", "k"]
        .iter()
        .map(|text| DataChunk {
            chunk_text: (*text).to_string(),
            chunk_order: 0,
            chunk_metadata: json!({}),
        })
        .collect();
    pipeline
        .index_chunks("p1", &chunks, &[1, 2, 3, 4], false)
        .await
        .expect("should index");

    let results = pipeline
        .search_similar("p1", "grace hopper", 4)
        .await
        .expect("should search");

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].text, "grace hopper");
    assert!((results[0].score - 1.0).abs() < 1e-5);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn answering_without_context_returns_the_marker() {
    let (pipeline, _, generator) =
        create_test_pipeline(MockStore::default(), 8, MockGenerator::default());

    let answer = pipeline
        .answer_question("ghost", "anything?", 5)
        .await
        .expect("no context is not an error");

    assert!(answer.is_no_context());
    assert_eq!(answer.answer, None);
    assert!(answer.full_prompt.is_empty());
    assert!(answer.chat_history.is_empty());
    // Generation was never invoked.
    assert!(generator.prompts.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn no_context_is_distinct_from_an_empty_answer() {
    let empty = RagAnswer {
        answer: Some(String::new()),
        full_prompt: "prompt".to_string(),
        chat_history: Vec::new(),
    };
    assert!(!empty.is_no_context());
    assert!(RagAnswer::no_context().is_no_context());
}

#[tokio::test]
async fn answer_includes_prompt_and_history() {
    let (pipeline, _, generator) =
        create_test_pipeline(MockStore::default(), 8, MockGenerator::default());
    let (chunks, ids) = create_test_chunks(2);
    pipeline
        .index_chunks("p1", &chunks, &ids, false)
        .await
        .expect("should index");

    let answer = pipeline
        .answer_question("p1", "what is in the chunks?", 5)
        .await
        .expect("should answer");

    assert_eq!(answer.answer.as_deref(), Some("generated answer"));
    assert!(answer.full_prompt.contains("## Document No: 1"));
    assert!(answer.full_prompt.contains("## Document No: 2"));
    assert!(answer.full_prompt.contains("what is in the chunks?"));

    assert_eq!(answer.chat_history.len(), 2);
    assert_eq!(answer.chat_history[0].role, ChatRole::System);
    assert_eq!(answer.chat_history[1].role, ChatRole::User);
    assert_eq!(answer.chat_history[1].content, answer.full_prompt);

    let prompts = generator.prompts.lock().expect("lock");
    assert_eq!(prompts.as_slice(), &[answer.full_prompt.clone()]);
}

#[tokio::test]
async fn effective_limit_caps_the_documents() {
    let (pipeline, _, generator) =
        create_test_pipeline(MockStore::default(), 8, MockGenerator::default());
    let (chunks, ids) = create_test_chunks(10);
    pipeline
        .index_chunks("p1", &chunks, &ids, false)
        .await
        .expect("should index");

    // Default max_documents is 5; requesting 20 must not exceed it.
    let answer = pipeline
        .answer_question("p1", "query", 20)
        .await
        .expect("should answer");

    let document_count = answer.full_prompt.matches("## Document No:").count();
    assert_eq!(document_count, 5);
    assert_eq!(generator.prompts.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn generation_errors_propagate_unmodified() {
    let generator = MockGenerator {
        prompts: Mutex::new(Vec::new()),
        fail: true,
    };
    let (pipeline, _, _) = create_test_pipeline(MockStore::default(), 8, generator);
    let (chunks, ids) = create_test_chunks(1);
    pipeline
        .index_chunks("p1", &chunks, &ids, false)
        .await
        .expect("should index");

    let err = pipeline
        .answer_question("p1", "query", 5)
        .await
        .expect_err("generation failure should propagate");

    assert!(matches!(err, RagError::Generation(_)));
}

#[tokio::test]
async fn reset_recreates_with_the_active_dimension() {
    let store = MockStore::with_collection("collection_p1", Some(1536));
    let (pipeline, store, _) = create_test_pipeline(store, 768, MockGenerator::default());

    assert!(pipeline.reset_collection("p1").await);

    let info = store
        .collection_info("collection_p1")
        .await
        .expect("collection should exist after reset");
    assert_eq!(info.vector_size, Some(768));
    assert_eq!(info.record_count, 0);
}

mod prompt_budget {
    use super::*;

    fn create_budgeted_pipeline(max_prompt_length: usize) -> RagPipeline {
        let mut config = Config::default();
        config.rag.max_prompt_length = max_prompt_length;
        RagPipeline::new(
            Arc::new(MockStore::default()),
            Arc::new(MockEmbedder { size: 8 }),
            Arc::new(MockGenerator::default()),
            TemplateCatalog::new(),
            &config,
        )
    }

    fn documents(texts: &[&str]) -> Vec<RetrievedDocument> {
        texts
            .iter()
            .map(|text| RetrievedDocument {
                text: (*text).to_string(),
                score: 1.0,
            })
            .collect()
    }

    #[test]
    fn prompt_within_budget_is_untouched() {
        let pipeline = create_budgeted_pipeline(10_000);
        let prompt = pipeline
            .assemble_prompt(&documents(&["alpha", "beta"]), "the query")
            .expect("should assemble");

        assert!(prompt.contains("## Document No: 1\n### Content: alpha"));
        assert!(prompt.contains("## Document No: 2\n### Content: beta"));
        assert!(prompt.contains("## Question:\nthe query"));
    }

    #[test]
    fn truncation_preserves_the_footer() {
        let pipeline = create_budgeted_pipeline(200);
        let long_text = "z".repeat(500);
        let prompt = pipeline
            .assemble_prompt(&documents(&[&long_text]), "short query")
            .expect("should assemble");

        let footer = TemplateCatalog::new()
            .get("rag", "footer_prompt", &[("query", "short query")])
            .expect("should render footer");

        assert!(prompt.chars().count() <= 200);
        assert!(prompt.ends_with(&footer));

        // The document section got exactly the leftover budget.
        let expected_documents = 200 - footer.chars().count() - 2;
        let document_section = prompt
            .strip_suffix(&footer)
            .and_then(|p| p.strip_suffix('\n'))
            .expect("footer separated by newline");
        assert_eq!(document_section.chars().count(), expected_documents);
    }

    #[test]
    fn oversized_footer_caps_the_whole_prompt() {
        // Budget far below the footer length forces the tail-truncation
        // fallback.
        let pipeline = create_budgeted_pipeline(30);
        let prompt = pipeline
            .assemble_prompt(&documents(&["document body"]), "query")
            .expect("should assemble");

        assert_eq!(prompt.chars().count(), 30);
        assert!(prompt.starts_with("## Document No: 1"));
    }

    #[test]
    fn multibyte_text_truncates_on_char_boundaries() {
        let pipeline = create_budgeted_pipeline(150);
        let accented = "é".repeat(400);
        let prompt = pipeline
            .assemble_prompt(&documents(&[&accented]), "q")
            .expect("should assemble");

        assert!(prompt.chars().count() <= 150);
    }

    #[test]
    fn truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("ééééé", 3), "ééé");
        assert_eq!(truncate_chars("", 3), "");
    }
}
