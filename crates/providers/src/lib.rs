//! Provider abstractions for LLMs and embeddings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod hashing;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod openai;
pub mod qdrant;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of an OpenAI-compatible `/v1/chat/completions` call.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<ChatChoiceMessage>,
    /// Completion-style servers put the generated text here instead.
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError>;
}

#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    embeddings: HashMap<String, Arc<dyn EmbeddingProvider>>,
    llms: HashMap<String, Arc<dyn LlmProvider>>,
    pub preferred_embedding: Option<String>,
    pub preferred_llm: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, name: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings.insert(name.to_string(), provider);
        self
    }

    pub fn with_llm(mut self, name: &str, provider: Arc<dyn LlmProvider>) -> Self {
        self.llms.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_embedding(mut self, name: &str) -> Self {
        self.preferred_embedding = Some(name.to_string());
        self
    }

    pub fn set_preferred_llm(mut self, name: &str) -> Self {
        self.preferred_llm = Some(name.to_string());
        self
    }

    pub fn embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_embedding.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no embedding provider configured".into())
            })?;
        self.embeddings
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    pub fn llm(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_llm.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no llm provider configured".into()))?;
        self.llms
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}
