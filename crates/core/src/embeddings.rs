use crate::chunker::Chunk;
use anyhow::ensure;
use providers::ProviderRegistry;

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
}

pub async fn embed(
    req: EmbeddingRequest,
    registry: &ProviderRegistry,
) -> anyhow::Result<EmbeddingResult> {
    let provider = registry.embedding(req.provider.as_deref())?;
    let resp = provider.embed(&req.texts).await?;
    ensure!(
        resp.vectors.len() == req.texts.len(),
        "embedding provider returned {} vectors for {} texts",
        resp.vectors.len(),
        req.texts.len()
    );
    Ok(EmbeddingResult {
        vectors: resp.vectors,
    })
}

/// Embeds a single query string with the preferred provider.
pub async fn embed_query(query: &str, registry: &ProviderRegistry) -> anyhow::Result<Vec<f32>> {
    let result = embed(
        EmbeddingRequest {
            texts: vec![query.to_string()],
            provider: None,
        },
        registry,
    )
    .await?;
    Ok(result.vectors.into_iter().next().unwrap_or_default())
}

/// Embed chunks in batches, returning one vector per chunk in order.
pub async fn embed_chunks(
    chunks: &[Chunk],
    registry: &ProviderRegistry,
    batch_size: usize,
) -> anyhow::Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let req = EmbeddingRequest {
            texts: batch.iter().map(|c| c.text.clone()).collect(),
            provider: None, // Use preferred provider
        };
        let result = embed(req, registry).await?;
        vectors.extend(result.vectors);
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::TextStructurizer;
    use providers::hashing::HashingEmbedder;
    use providers::{EmbedResponse, EmbeddingProvider, ProviderError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbedResponse {
                vectors: texts.iter().map(|t| vec![t.len() as f32]).collect(),
            })
        }
    }

    struct ShortEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for ShortEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            Ok(EmbedResponse { vectors: vec![] })
        }
    }

    #[tokio::test]
    async fn batches_preserve_order() {
        let counter = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let registry = ProviderRegistry::new()
            .with_embedding("count", counter.clone())
            .set_preferred_embedding("count");
        let chunks = TextStructurizer::new(3, 0).structure_chunks("abcdefgh").unwrap();
        let vectors = embed_chunks(&chunks, &registry, 2).await.unwrap();
        assert_eq!(vectors, vec![vec![3.0], vec![3.0], vec![2.0]]);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let registry = ProviderRegistry::new()
            .with_embedding("short", Arc::new(ShortEmbedder))
            .set_preferred_embedding("short");
        assert!(embed_query("hello", &registry).await.is_err());
    }

    #[tokio::test]
    async fn query_uses_preferred_provider() {
        let registry = ProviderRegistry::new()
            .with_embedding("hashing", Arc::new(HashingEmbedder::new(16)))
            .set_preferred_embedding("hashing");
        let v = embed_query("hello world", &registry).await.unwrap();
        assert_eq!(v.len(), 16);
    }
}
