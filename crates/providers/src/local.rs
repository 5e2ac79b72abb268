//! Local sentence embeddings (all-MiniLM-L6-v2, 384 dimensions) via fastembed.

use crate::{EmbedResponse, EmbeddingProvider, ProviderError};
use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;

pub const MINILM_DIMENSIONS: usize = 384;

#[derive(Clone)]
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
}

impl FastEmbedProvider {
    /// Loads the model, downloading it on first use. Blocking.
    pub fn try_new() -> Result<Self, ProviderError> {
        let mut options = InitOptions::default();
        options.model_name = EmbeddingModel::AllMiniLML6V2;
        options.show_download_progress = false;
        let model =
            TextEmbedding::try_new(options).map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        tracing::info!("loaded local embedding model all-MiniLM-L6-v2");
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("embedding task panicked: {e}")))?
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(EmbedResponse { vectors })
    }
}
