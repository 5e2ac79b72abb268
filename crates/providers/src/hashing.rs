//! Offline embedder based on the hashing trick.
//!
//! Each lowercase alphanumeric token is hashed with blake3; the hash picks
//! a bucket and a sign. Vectors are L2-normalised so cosine similarity
//! reduces to a dot product. Texts sharing vocabulary land close together,
//! which is enough for local retrieval without a model download.

use crate::{EmbedResponse, EmbeddingProvider, ProviderError};

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(word) % self.dimensions as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: texts.iter().map(|t| self.embed_one(t)).collect(),
        })
    }
}
