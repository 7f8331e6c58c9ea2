// LLM provider module
// Capability traits for embedding and text generation, one HTTP client
// implementing both against an OpenAI-compatible endpoint, and the prompt
// template catalog


pub mod openai;
pub mod templates;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use openai::OpenAiCompatClient;
pub use templates::TemplateCatalog;

/// Embedding mode. Asymmetric models compute different vectors for the
/// same text depending on whether it is indexed content or a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingMode {
    Document,
    Query,
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single role-tagged turn of chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Converts text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` in the given mode. The returned vector always has
    /// exactly `embedding_size()` elements.
    async fn embed_text(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>>;

    /// Output dimension of this provider's embedding model.
    fn embedding_size(&self) -> usize;
}

/// Synthesizes text from a prompt plus role-tagged chat history.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Wrap raw text into a message with the given role.
    fn construct_prompt(&self, text: &str, role: ChatRole) -> ChatMessage;

    /// Generate a completion for `prompt` appended as the user turn after
    /// `chat_history`. Failures propagate unmodified to the caller; there
    /// is no automatic retry.
    async fn generate_text(&self, prompt: &str, chat_history: &[ChatMessage]) -> Result<String>;
}
