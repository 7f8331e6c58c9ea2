// OpenAI-compatible provider
// One reqwest client implements both the embedding and generation
// capabilities against /embeddings and /chat/completions

#[cfg(test)]
mod tests;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{ChatMessage, ChatRole, EmbeddingMode, EmbeddingProvider, GenerationProvider};
use crate::config::LlmConfig;
use crate::{RagError, Result};

/// Client for an OpenAI-compatible API (OpenAI, Ollama, vLLM, ...).
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    base_url: Url,
    api_key: String,
    generation_model: String,
    embedding_model: String,
    embedding_size: usize,
    max_input_characters: usize,
    max_output_tokens: u32,
    temperature: f32,
    client: Client,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenAiCompatClient {
    #[inline]
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = config
            .api_url()
            .map_err(|e| RagError::Config(e.to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            generation_model: config.generation_model.clone(),
            embedding_model: config.embedding_model.clone(),
            embedding_size: config.embedding_size,
            max_input_characters: config.max_input_characters,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            client,
        })
    }

    /// Trim and cap input at `max_input_characters` before sending.
    fn process_text(&self, text: &str) -> String {
        let trimmed = text.trim();
        trimmed
            .char_indices()
            .nth(self.max_input_characters)
            .map_or_else(|| trimmed.to_string(), |(idx, _)| trimmed[..idx].to_string())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        // Preserve any base path like /v1 that Url::join would drop.
        let joined = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined)
            .map_err(|e| RagError::Config(format!("Invalid endpoint URL {}: {}", joined, e)))
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatClient {
    /// Embed text via the `/embeddings` endpoint.
    ///
    /// OpenAI-compatible servers have no document/query distinction on the
    /// wire, so `mode` is accepted for the contract but not transmitted;
    /// asymmetric backends would map it to their input-type field.
    async fn embed_text(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>> {
        let input = self.process_text(text);
        debug!(
            "Embedding {} characters in {:?} mode with {}",
            input.len(),
            mode,
            self.embedding_model
        );

        let request = EmbeddingsRequest {
            model: self.embedding_model.clone(),
            input,
        };

        let response = self
            .request(self.endpoint("embeddings")?)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("Embedding request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| RagError::Embedding(format!("Embedding request failed: {}", e)))?;

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("Invalid embedding response: {}", e)))?;

        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::Embedding("Embedding response contained no data".to_string()))?;

        // A provider returning the wrong dimension must fail before any
        // store write, never insert a mis-sized vector.
        if embedding.len() != self.embedding_size {
            return Err(RagError::Embedding(format!(
                "Embedding model returned {} dimensions, expected {}",
                embedding.len(),
                self.embedding_size
            )));
        }

        Ok(embedding)
    }

    #[inline]
    fn embedding_size(&self) -> usize {
        self.embedding_size
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatClient {
    #[inline]
    fn construct_prompt(&self, text: &str, role: ChatRole) -> ChatMessage {
        ChatMessage {
            role,
            content: self.process_text(text),
        }
    }

    async fn generate_text(&self, prompt: &str, chat_history: &[ChatMessage]) -> Result<String> {
        let mut messages = chat_history.to_vec();
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: self.process_text(prompt),
        });

        debug!(
            "Requesting completion from {} with {} messages",
            self.generation_model,
            messages.len()
        );

        let request = ChatCompletionRequest {
            model: self.generation_model.clone(),
            messages,
            max_tokens: self.max_output_tokens,
            temperature: self.temperature,
        };

        let response = self
            .request(self.endpoint("chat/completions")?)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Generation(format!("Generation request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| RagError::Generation(format!("Generation request failed: {}", e)))?;

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("Invalid generation response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| RagError::Generation("Generation response contained no choices".to_string()))
    }
}
