use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub path: String,
    pub content_hash: Option<String>,
    pub kind: String,
    pub status: String,
    pub notice: Option<String>,
    pub chunk_count: i64,
    pub ingested_at: i64,
}

/// Insert/update payload for the `documents` table.
#[derive(Debug, Clone)]
pub struct DocumentUpsert {
    pub path: String,
    pub content_hash: Option<String>,
    pub kind: String,
    pub status: DocumentStatus,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Ingested,
    Skipped,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Ingested => "ingested",
            DocumentStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub idx: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub text: String,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub idx: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub text: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub id: String,
    pub document_path: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub documents: i64,
    pub skipped: i64,
    pub chunks: i64,
    pub vectors: i64,
}
