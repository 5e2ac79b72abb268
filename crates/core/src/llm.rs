//! Answer generation against an OpenAI-compatible chat-completions API.

use crate::config::LlmConfig;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, ProviderError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_MODEL: &str = "deepseek-r1";
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const BASE_URL_ENV: &str = "DEEPSEEK_API_BASE_URL";
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

const SYSTEM_PROMPT: &str =
    "You are an intelligent assistant. Provide answers based on the given context.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API base URL is not provided; set llm.base_url or DEEPSEEK_API_BASE_URL")]
    MissingBaseUrl,
    #[error("LLM request failed: {0}")]
    Request(#[from] ProviderError),
    #[error("LLM response contained no answer")]
    NoAnswer,
}

/// The apology shown to users in place of an answer when generation fails.
pub fn fallback_message(err: &LlmError) -> &'static str {
    match err {
        LlmError::NoAnswer => "Sorry, I received a response but could not extract an answer.",
        LlmError::Request(ProviderError::RequestFailed(_) | ProviderError::InvalidResponse(_)) => {
            "Sorry, I encountered an error while trying to reach the language model."
        }
        _ => "Sorry, an unexpected error occurred while processing your request with the language model.",
    }
}

/// Completion-style prompt for servers without a chat endpoint.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are an intelligent assistant. Based on the following context, please answer the \
         user's question. If the context does not contain the answer, say so.\n\n\
         Context:\n{context}\n\nQuestion: {query}\n\nAnswer:"
    )
}

pub fn build_messages(query: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("Context:\n{context}\n\nQuestion: {query}")),
    ]
}

/// First choice's message content, else its completion text, trimmed.
pub fn extract_answer(resp: &ChatResponse) -> Option<String> {
    let choice = resp.choices.first()?;
    choice
        .message
        .as_ref()
        .and_then(|m| m.content.as_deref())
        .filter(|c| !c.is_empty())
        .or_else(|| choice.text.as_deref().filter(|t| !t.is_empty()))
        .map(|s| s.trim().to_string())
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&LlmConfig> for LlmSettings {
    fn from(cfg: &LlmConfig) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }
}

impl LlmSettings {
    /// Fills unset base URL and key from the DeepSeek environment variables.
    pub fn with_env_fallback(mut self) -> Self {
        if self.base_url.is_none() {
            self.base_url = std::env::var(BASE_URL_ENV).ok().filter(|v| !v.is_empty());
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var(API_KEY_ENV).ok().filter(|v| !v.is_empty());
        }
        self
    }
}

/// The chat-completions client for `settings`; fails when no base URL is set.
pub fn chat_provider(settings: &LlmSettings) -> Result<OpenAiProvider, LlmError> {
    let base_url = settings
        .base_url
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or(LlmError::MissingBaseUrl)?;
    if settings.api_key.is_none() {
        warn!("no API key configured for the LLM; set llm.api_key or {API_KEY_ENV} if the API requires one");
    }
    info!(model = %settings.model, url = %base_url, "LLM provider initialised");
    Ok(OpenAiProvider::new(OpenAiConfig {
        api_key: settings.api_key.clone(),
        base_url,
        embedding_model: String::new(),
        timeout: settings.timeout,
    }))
}

#[derive(Clone)]
pub struct LlmIntegrator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmIntegrator {
    /// Builds an integrator talking to `{base_url}/v1/chat/completions`.
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let provider = chat_provider(&settings)?;
        Ok(Self::with_provider(Arc::new(provider), &settings))
    }

    /// Uses an already-built provider, e.g. one from a [`providers::ProviderRegistry`].
    pub fn with_provider(provider: Arc<dyn LlmProvider>, settings: &LlmSettings) -> Self {
        Self {
            provider,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answers with the configured token limit and temperature.
    pub async fn answer(&self, query: &str, context: &str) -> Result<String, LlmError> {
        self.generate_answer(query, context, self.max_tokens, self.temperature)
            .await
    }

    pub async fn generate_answer(
        &self,
        query: &str,
        context: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: build_messages(query, context),
            max_tokens,
            temperature,
        };
        let resp = self.provider.chat(request).await?;
        extract_answer(&resp).ok_or_else(|| {
            warn!(choices = resp.choices.len(), "could not extract answer from LLM response");
            LlmError::NoAnswer
        })
    }
}
