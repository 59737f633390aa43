use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{EmbeddingsConfig, OllamaConfig};
use crate::embeddings::Embedder;
use crate::error::{OllamaError, ServiceError, ServiceResult};

/// Single-shot text generation
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a reply to `prompt` under the given system prompt
    async fn generate(&self, system: &str, prompt: &str) -> ServiceResult<String>;

    /// Model name recorded alongside generated text
    fn model_name(&self) -> &str;

    /// Whether the backend answers at all
    async fn is_available(&self) -> bool;
}

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    config: OllamaConfig,
    embedding_model: String,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: OllamaConfig, embeddings: &EmbeddingsConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::Ollama(OllamaError::Connection {
                    url: config.base_url.clone(),
                    source: e,
                })
            })?;

        Ok(Self {
            client,
            config,
            embedding_model: embeddings.model.clone(),
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> ServiceResult<bool> {
        let url = format!("{}/api/tags", self.config.base_url);

        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => {
                warn!(error = %e, "Ollama health check failed");
                Ok(false)
            }
        }
    }

    /// Embed text with the configured embedding model
    pub async fn embed_text(&self, text: &str) -> ServiceResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OllamaError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let response = check_status(response, &self.embedding_model).await?;

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::InvalidResponse { source: e })?;

        if body.embedding.is_empty() {
            return Err(ServiceError::Ollama(OllamaError::EmptyEmbedding));
        }

        debug!(
            model = %self.embedding_model,
            dims = body.embedding.len(),
            "Generated embedding"
        );

        Ok(body.embedding)
    }

    /// Generate a non-streaming chat response
    pub async fn generate_simple(&self, messages: Vec<ChatMessage>) -> ServiceResult<String> {
        let url = format!("{}/api/chat", self.config.base_url);
        let model = &self.config.generation_model;

        let request = OllamaChatRequest {
            model: model.clone(),
            messages,
            stream: false,
            options: Some(OllamaOptions {
                temperature: Some(self.config.temperature),
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OllamaError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let response = check_status(response, model).await?;

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::InvalidResponse { source: e })?;

        Ok(chat_response.message.content)
    }
}

async fn check_status(response: reqwest::Response, model: &str) -> ServiceResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();

    if message.contains("model") && message.contains("not found") {
        return Err(ServiceError::Ollama(OllamaError::ModelNotFound {
            model: model.to_string(),
        }));
    }

    Err(ServiceError::Ollama(OllamaError::Generation { status, message }))
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        self.embed_text(text).await
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, system: &str, prompt: &str) -> ServiceResult<String> {
        self.generate_simple(vec![ChatMessage::system(system), ChatMessage::user(prompt)])
            .await
    }

    fn model_name(&self) -> &str {
        &self.config.generation_model
    }

    async fn is_available(&self) -> bool {
        self.health_check().await.unwrap_or(false)
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

// Internal Ollama API types

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}
