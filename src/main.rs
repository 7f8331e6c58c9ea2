use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rag_pipeline::Result;
use rag_pipeline::commands::{
    ask, index_chunks, init_config, list_collections, reset_collection, search, show_info,
};
use rag_pipeline::config::Config;

#[derive(Parser)]
#[command(name = "rag-pipeline")]
#[command(about = "Index text chunks as vectors and answer questions from them")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "rag.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,
    /// Embed and index a JSONL chunk file into a project's collection
    Index {
        /// Project id owning the collection
        #[arg(long)]
        project: String,
        /// JSONL file of chunk records
        #[arg(long)]
        chunks: PathBuf,
        /// Delete and recreate the collection before indexing
        #[arg(long)]
        reset: bool,
        /// Chunks indexed per batch
        #[arg(long, default_value_t = 100)]
        page_size: usize,
    },
    /// Search a project's collection for similar chunks
    Search {
        #[arg(long)]
        project: String,
        /// Query text
        #[arg(long)]
        query: String,
        /// Maximum results
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Answer a question from a project's indexed chunks
    Ask {
        #[arg(long)]
        project: String,
        /// Question text
        #[arg(long)]
        query: String,
        /// Maximum documents to retrieve
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Print the assembled prompt before the answer
        #[arg(long)]
        show_prompt: bool,
    },
    /// Show collection info for a project
    Info {
        #[arg(long)]
        project: String,
    },
    /// Delete and recreate a project's collection
    Reset {
        #[arg(long)]
        project: String,
    },
    /// List all collections in the vector store
    Collections,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if matches!(cli.command, Commands::Init) {
        init_config(&cli.config)?;
        return Ok(());
    }

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Index {
            project,
            chunks,
            reset,
            page_size,
        } => {
            index_chunks(&config, &project, &chunks, reset, page_size).await?;
        }
        Commands::Search {
            project,
            query,
            limit,
        } => {
            search(&config, &project, &query, limit).await?;
        }
        Commands::Ask {
            project,
            query,
            limit,
            show_prompt,
        } => {
            ask(&config, &project, &query, limit, show_prompt).await?;
        }
        Commands::Info { project } => {
            show_info(&config, &project).await?;
        }
        Commands::Reset { project } => {
            reset_collection(&config, &project).await?;
        }
        Commands::Collections => {
            list_collections(&config).await?;
        }
    }

    Ok(())
}
