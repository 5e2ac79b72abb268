use providers::qdrant::{match_filter, QdrantClient, QdrantPoint};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use storage::models::StoredVector;
use thiserror::Error;
use tokio::sync::RwLock;

/// Payload key holding the source document path.
pub const PATH_KEY: &str = "path";
pub const TEXT_KEY: &str = "text";
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VectorStoreError {
    #[error("vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

impl VectorRecord {
    pub fn path(&self) -> Option<&str> {
        self.metadata.get(PATH_KEY).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()>;
    async fn search(&self, vector: &[f32], limit: usize) -> anyhow::Result<Vec<ScoredRecord>>;
    async fn delete_document(&self, path: &str) -> anyhow::Result<()>;
    async fn len(&self) -> anyhow::Result<usize>;
    /// Width of the stored vectors; `None` while the store is empty.
    async fn dimensions(&self) -> anyhow::Result<Option<usize>>;
    /// Drops every stored vector.
    async fn clear(&self) -> anyhow::Result<()>;
}

/// Stable UUID-shaped point id for a chunk of a document. Qdrant only
/// accepts integers or UUIDs as ids.
pub fn point_id(path: &str, chunk_index: usize, chunk_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&(chunk_index as u64).to_le_bytes());
    hasher.update(chunk_hash.as_bytes());
    let hex = hasher.finalize().to_hex();
    let h = hex.as_str();
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut na = 0f32;
    let mut nb = 0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[derive(Default)]
struct FlatIndex {
    dimensions: Option<usize>,
    records: HashMap<String, VectorRecord>,
}

impl FlatIndex {
    fn check(&self, actual: usize) -> Result<(), VectorStoreError> {
        match self.dimensions {
            Some(expected) if expected != actual => {
                Err(VectorStoreError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }
}

/// Exact nearest-neighbour search over every stored vector.
///
/// When opened with a pool, the index is loaded from the `vectors` table
/// and every write goes through to it.
pub struct FlatVectorStore {
    index: RwLock<FlatIndex>,
    pool: Option<SqlitePool>,
}

impl Default for FlatVectorStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl FlatVectorStore {
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(FlatIndex::default()),
            pool: None,
        }
    }

    pub async fn open(pool: SqlitePool) -> anyhow::Result<Self> {
        let mut index = FlatIndex::default();
        for stored in storage::load_vectors(&pool).await? {
            index.check(stored.vector.len())?;
            index.dimensions = Some(stored.vector.len());
            let metadata: HashMap<String, String> =
                serde_json::from_value(stored.payload).unwrap_or_default();
            index.records.insert(
                stored.id.clone(),
                VectorRecord {
                    id: stored.id,
                    vector: stored.vector,
                    metadata,
                },
            );
        }
        tracing::debug!(vectors = index.records.len(), "loaded flat vector index");
        Ok(Self {
            index: RwLock::new(index),
            pool: Some(pool),
        })
    }
}

#[async_trait::async_trait]
impl VectorStore for FlatVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut index = self.index.write().await;
        let expected = index.dimensions.unwrap_or(records[0].vector.len());
        for r in &records {
            if r.vector.len() != expected {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: r.vector.len(),
                }
                .into());
            }
        }

        if let Some(pool) = &self.pool {
            let stored: Vec<StoredVector> = records
                .iter()
                .map(|r| StoredVector {
                    id: r.id.clone(),
                    document_path: r.path().unwrap_or_default().to_string(),
                    vector: r.vector.clone(),
                    payload: serde_json::json!(r.metadata),
                })
                .collect();
            storage::upsert_vectors(pool, &stored).await?;
        }

        index.dimensions = Some(expected);
        for r in records {
            index.records.insert(r.id.clone(), r);
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> anyhow::Result<Vec<ScoredRecord>> {
        let index = self.index.read().await;
        if index.records.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        index.check(vector.len())?;
        let mut scored: Vec<ScoredRecord> = index
            .records
            .values()
            .map(|r| ScoredRecord {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_document(&self, path: &str) -> anyhow::Result<()> {
        if let Some(pool) = &self.pool {
            storage::delete_vectors_for_document(pool, path).await?;
        }
        let mut index = self.index.write().await;
        index.records.retain(|_, r| r.path() != Some(path));
        if index.records.is_empty() {
            index.dimensions = None;
        }
        Ok(())
    }

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.index.read().await.records.len())
    }

    async fn dimensions(&self) -> anyhow::Result<Option<usize>> {
        Ok(self.index.read().await.dimensions)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let mut index = self.index.write().await;
        if let Some(pool) = &self.pool {
            storage::clear_vectors(pool).await?;
        }
        index.records.clear();
        index.dimensions = None;
        Ok(())
    }
}

pub struct QdrantStore {
    client: QdrantClient,
}

impl QdrantStore {
    pub fn new(client: QdrantClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        self.client.ensure_collection(first.vector.len()).await?;
        let points: Vec<QdrantPoint> = records
            .into_iter()
            .map(|r| QdrantPoint {
                id: r.id,
                vector: r.vector,
                payload: r
                    .metadata
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect(),
            })
            .collect();
        self.client.upsert(points).await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> anyhow::Result<Vec<ScoredRecord>> {
        let resp = self.client.search(vector.to_vec(), limit as u64, None).await?;
        Ok(resp
            .result
            .into_iter()
            .map(|r| {
                let id = match r.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                let metadata = r
                    .payload
                    .and_then(|p| p.as_object().cloned())
                    .map(|obj| {
                        obj.into_iter()
                            .map(|(k, v)| match v {
                                serde_json::Value::String(s) => (k, s),
                                other => (k, other.to_string()),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                ScoredRecord {
                    id,
                    score: r.score,
                    metadata,
                }
            })
            .collect())
    }

    async fn delete_document(&self, path: &str) -> anyhow::Result<()> {
        self.client
            .delete_by_filter(match_filter(PATH_KEY, path))
            .await?;
        Ok(())
    }

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.client.count().await? as usize)
    }

    async fn dimensions(&self) -> anyhow::Result<Option<usize>> {
        Ok(self.client.collection_dimensions().await?)
    }

    /// The next upsert recreates the collection at the new width.
    async fn clear(&self) -> anyhow::Result<()> {
        if self.client.collection_dimensions().await?.is_some() {
            self.client.delete_collection().await?;
        }
        Ok(())
    }
}
