use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::llm::{OpenAiCompatClient, TemplateCatalog};
use crate::rag::{DataChunk, RagPipeline};
use crate::vectordb::open_vector_store;

/// A chunk record as read from a JSONL file. The id is optional in the
/// file; records without one get sequential ids assigned by the reader.
#[derive(Debug, Deserialize)]
struct ChunkRecord {
    chunk_id: Option<i64>,
    #[serde(flatten)]
    chunk: DataChunk,
}

/// Write a default configuration file. Refuses to overwrite.
#[inline]
pub fn init_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        bail!("Config file already exists: {}", config_path.display());
    }

    Config::default()
        .save(config_path)
        .context("Failed to write default config")?;

    println!("Wrote default config to {}", config_path.display());
    Ok(())
}

/// Construct the pipeline from config: vector store, providers, templates.
async fn build_pipeline(config: &Config) -> Result<RagPipeline> {
    let vector_store = open_vector_store(config).context("Failed to open vector store")?;
    vector_store
        .connect()
        .await
        .context("Failed to connect to vector store")?;

    // One HTTP client serves both the embedding and generation capability.
    let client =
        Arc::new(OpenAiCompatClient::new(&config.llm).context("Failed to build LLM client")?);

    Ok(RagPipeline::new(
        vector_store,
        Arc::clone(&client) as _,
        client,
        TemplateCatalog::new(),
        config,
    ))
}

fn read_chunk_records(chunks_path: &Path) -> Result<Vec<(i64, DataChunk)>> {
    let content = fs::read_to_string(chunks_path)
        .with_context(|| format!("Failed to read chunk file: {}", chunks_path.display()))?;

    let mut records = Vec::new();
    let mut next_id = 1;

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let record: ChunkRecord = serde_json::from_str(line)
            .with_context(|| format!("Invalid chunk record on line {}", line_no + 1))?;

        let id = record.chunk_id.unwrap_or(next_id);
        next_id = id + 1;
        records.push((id, record.chunk));
    }

    Ok(records)
}

/// Index a JSONL chunk file into the project's collection, paging through
/// the records in `page_size` batches.
#[inline]
pub async fn index_chunks(
    config: &Config,
    project_id: &str,
    chunks_path: &Path,
    do_reset: bool,
    page_size: usize,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let records = read_chunk_records(chunks_path)?;

    if records.is_empty() {
        bail!("No chunks found in {}", chunks_path.display());
    }

    if do_reset {
        pipeline.reset_collection(project_id).await;
        info!("Reset collection for project {}", project_id);
    }

    let page_size = page_size.clamp(1, 1000);
    let mut total_indexed = 0;

    // The pipeline indexes exactly the batch it is handed; the paging
    // loop lives here.
    for page in records.chunks(page_size) {
        let chunk_ids: Vec<i64> = page.iter().map(|(id, _)| *id).collect();
        let chunks: Vec<DataChunk> = page.iter().map(|(_, chunk)| chunk.clone()).collect();

        let indexed = pipeline
            .index_chunks(project_id, &chunks, &chunk_ids, false)
            .await?;

        if indexed == 0 {
            bail!("Indexing failed for project {}", project_id);
        }

        total_indexed += indexed;
    }

    println!(
        "Indexed {} chunks into {}",
        total_indexed,
        pipeline.collection_name_for(project_id)
    );
    Ok(())
}

/// Print ranked similarity search results for a query.
#[inline]
pub async fn search(config: &Config, project_id: &str, query: &str, limit: usize) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let results = pipeline.search_similar(project_id, query, limit).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, document) in results.iter().enumerate() {
        println!("{}. [{:.4}] {}", rank + 1, document.score, document.text);
    }
    Ok(())
}

/// Answer a question from the project's indexed chunks.
#[inline]
pub async fn ask(
    config: &Config,
    project_id: &str,
    query: &str,
    limit: usize,
    show_prompt: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let result = pipeline.answer_question(project_id, query, limit).await?;

    if show_prompt && !result.full_prompt.is_empty() {
        println!("--- prompt ---");
        println!("{}", result.full_prompt);
        println!("--- answer ---");
    }

    match result.answer {
        Some(answer) => println!("{}", answer),
        None => println!("No indexed documents matched the question."),
    }
    Ok(())
}

/// Print the collection summary for a project.
#[inline]
pub async fn show_info(config: &Config, project_id: &str) -> Result<()> {
    let pipeline = build_pipeline(config).await?;

    match pipeline.collection_info(project_id).await {
        Some(info) => {
            println!("Collection: {}", pipeline.collection_name_for(project_id));
            println!("Records: {}", info.record_count);
            if let Some(size) = info.vector_size {
                println!("Vector size: {}", size);
            }
            println!("{}", serde_json::to_string_pretty(&info.details)?);
        }
        None => println!(
            "Collection {} not found.",
            pipeline.collection_name_for(project_id)
        ),
    }
    Ok(())
}

/// Delete and recreate a project's collection.
#[inline]
pub async fn reset_collection(config: &Config, project_id: &str) -> Result<()> {
    let pipeline = build_pipeline(config).await?;

    if pipeline.reset_collection(project_id).await {
        println!("Reset {}", pipeline.collection_name_for(project_id));
    } else {
        bail!(
            "Failed to reset {}",
            pipeline.collection_name_for(project_id)
        );
    }
    Ok(())
}

/// List every collection in the configured vector store.
#[inline]
pub async fn list_collections(config: &Config) -> Result<()> {
    let vector_store = open_vector_store(config).context("Failed to open vector store")?;
    vector_store
        .connect()
        .await
        .context("Failed to connect to vector store")?;

    let collections = vector_store.list_collections().await;
    if collections.is_empty() {
        println!("No collections.");
    } else {
        for name in collections {
            println!("{}", name);
        }
    }
    Ok(())
}
