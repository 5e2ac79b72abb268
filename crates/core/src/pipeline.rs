use crate::chunker::{ChunkError, SentenceSplitter, TextStructurizer};
use crate::cleaner::TextCleaner;
use crate::config::{AppConfig, ChunkStrategy};
use crate::embeddings;
use crate::llm::{self, LlmError, LlmIntegrator, LlmSettings};
use crate::loader::{DocumentContent, DocumentLoader};
use crate::scanner;
use crate::vectorstore::{
    self, FlatVectorStore, QdrantStore, VectorRecord, VectorStore, CHUNK_INDEX_KEY, PATH_KEY,
    TEXT_KEY,
};
use anyhow::Context;
use providers::hashing::HashingEmbedder;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::qdrant::{QdrantClient, QdrantConfig};
use providers::ProviderRegistry;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::models::{DocumentStatus, DocumentUpsert, NewChunk, Stats};
use storage::{connect, migrate};
use tracing::{debug, info, warn};

/// Registry name of the chat-completions LLM.
pub const DEEPSEEK_PROVIDER: &str = "deepseek";

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestSummary {
    pub discovered: usize,
    pub ingested: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks: usize,
    pub embedded: usize,
}

/// What happened to a single file during ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum FileOutcome {
    Ingested { chunks: usize },
    Unchanged,
    Skipped { notice: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub path: String,
    pub chunk_index: usize,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

/// The question-answering pipeline: ingest documents into the vector
/// store, retrieve the closest chunks for a question, then ask the LLM.
pub struct Assistant {
    config: AppConfig,
    pool: SqlitePool,
    registry: ProviderRegistry,
    store: Arc<dyn VectorStore>,
    loader: DocumentLoader,
    cleaner: Option<TextCleaner>,
    structurizer: TextStructurizer,
    llm: Option<LlmIntegrator>,
}

impl Assistant {
    pub async fn open(config: AppConfig) -> anyhow::Result<Self> {
        let pool = connect(&config.database.path).await.context("db connect")?;
        migrate(&pool).await.context("db migrate")?;

        let registry = build_registry(&config).await?;
        // Fail on a misnamed provider now rather than on the first embed.
        registry
            .embedding(None)
            .with_context(|| format!("embedding provider '{}'", config.embeddings.provider))?;
        let store = build_vector_store(&config, pool.clone()).await?;
        reconcile_dimensions(&registry, store.as_ref(), &pool).await?;

        let llm = registry
            .llm(None)
            .ok()
            .map(|provider| LlmIntegrator::with_provider(provider, &LlmSettings::from(&config.llm)));

        Self::assemble(config, pool, registry, store, llm)
    }

    fn assemble(
        config: AppConfig,
        pool: SqlitePool,
        registry: ProviderRegistry,
        store: Arc<dyn VectorStore>,
        llm: Option<LlmIntegrator>,
    ) -> anyhow::Result<Self> {
        let structurizer = build_structurizer(&config)?;
        let cleaner = config
            .cleaner
            .enabled
            .then(|| TextCleaner::new(config.cleaner.remove_special_chars));
        Ok(Self {
            config,
            pool,
            registry,
            store,
            loader: DocumentLoader::new(),
            cleaner,
            structurizer,
            llm,
        })
    }

    pub fn with_llm(mut self, llm: LlmIntegrator) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Ingests every loadable file under `paths`, or under the configured
    /// include roots when `paths` is empty.
    pub async fn ingest(&self, paths: &[PathBuf]) -> anyhow::Result<IngestSummary> {
        let roots: Vec<PathBuf> = if paths.is_empty() {
            self.config.ingest.include.iter().map(PathBuf::from).collect()
        } else {
            paths.to_vec()
        };
        if roots.is_empty() {
            warn!("nothing to ingest: no paths given and ingest.include is empty");
        }
        let files = scanner::discover_async(
            roots,
            self.config.ingest.exclude.clone(),
            self.config.ingest.hidden,
        )
        .await?;

        let mut summary = IngestSummary {
            discovered: files.len(),
            ..Default::default()
        };
        info!(files = files.len(), "starting ingest");

        for path in &files {
            match self.ingest_file(path).await {
                Ok(FileOutcome::Ingested { chunks }) => {
                    summary.ingested += 1;
                    summary.chunks += chunks;
                    summary.embedded += chunks;
                }
                Ok(FileOutcome::Unchanged) => summary.unchanged += 1,
                Ok(FileOutcome::Skipped { .. }) => summary.skipped += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to ingest file");
                    summary.failed += 1;
                }
            }
        }

        info!(
            ingested = summary.ingested,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            failed = summary.failed,
            chunks = summary.chunks,
            "ingest complete"
        );
        Ok(summary)
    }

    pub async fn ingest_file(&self, path: &Path) -> anyhow::Result<FileOutcome> {
        let doc = self.loader.load_async(path.to_path_buf()).await?;
        let key = path_key(path);
        let previous = storage::document_by_path(&self.pool, &key).await?;

        let text = match doc.content {
            DocumentContent::Notice(notice) => {
                debug!(path = %key, notice = %notice, "document produced no text");
                if previous.is_some() {
                    self.store.delete_document(&key).await?;
                }
                let id = storage::upsert_document(
                    &self.pool,
                    &DocumentUpsert {
                        path: key,
                        content_hash: None,
                        kind: doc.kind.as_str().to_string(),
                        status: DocumentStatus::Skipped,
                        notice: Some(notice.clone()),
                    },
                )
                .await?;
                storage::replace_chunks(&self.pool, id, &[]).await?;
                return Ok(FileOutcome::Skipped { notice });
            }
            DocumentContent::Text(text) => text,
        };

        let text = match &self.cleaner {
            Some(cleaner) => cleaner.clean_text(&text),
            None => text,
        };
        let fingerprint = self.fingerprint(&text);
        if let Some(prev) = &previous {
            if prev.status == DocumentStatus::Ingested.as_str()
                && prev.content_hash.as_deref() == Some(fingerprint.as_str())
            {
                debug!(path = %key, "unchanged, skipping");
                return Ok(FileOutcome::Unchanged);
            }
        }

        let chunks = self.structurizer.structure_chunks(&text)?;
        let vectors =
            embeddings::embed_chunks(&chunks, &self.registry, self.config.embeddings.batch_size)
                .await?;

        if previous.is_some() {
            self.store.delete_document(&key).await?;
        }
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut metadata = HashMap::new();
                metadata.insert(PATH_KEY.to_string(), key.clone());
                metadata.insert(CHUNK_INDEX_KEY.to_string(), chunk.index.to_string());
                metadata.insert(TEXT_KEY.to_string(), chunk.text.clone());
                VectorRecord {
                    id: vectorstore::point_id(&key, chunk.index, &chunk.hash),
                    vector,
                    metadata,
                }
            })
            .collect();
        if let Err(e) = self.store.upsert(records).await {
            if previous.is_some() {
                // The old vectors are gone, so the stored fingerprint must not
                // let the next run skip this file.
                storage::clear_content_hash(&self.pool, Some(&key)).await?;
            }
            return Err(e);
        }

        let id = storage::upsert_document(
            &self.pool,
            &DocumentUpsert {
                path: key.clone(),
                content_hash: Some(fingerprint),
                kind: doc.kind.as_str().to_string(),
                status: DocumentStatus::Ingested,
                notice: None,
            },
        )
        .await?;
        let rows: Vec<NewChunk> = chunks
            .iter()
            .map(|c| NewChunk {
                idx: c.index as i64,
                start_offset: c.start as i64,
                end_offset: c.end as i64,
                text: c.text.clone(),
                hash: c.hash.clone(),
            })
            .collect();
        storage::replace_chunks(&self.pool, id, &rows).await?;

        info!(path = %key, chunks = chunks.len(), "ingested");
        Ok(FileOutcome::Ingested {
            chunks: chunks.len(),
        })
    }

    /// Drops a document and its vectors, e.g. after the file was deleted.
    pub async fn forget(&self, path: &Path) -> anyhow::Result<bool> {
        let key = path_key(path);
        let removed = self.forget_key(&key).await?;
        if removed {
            info!(path = %key, "removed from index");
        }
        Ok(removed)
    }

    /// Forgets every document below `dir`. Returns how many were removed.
    pub async fn forget_dir(&self, dir: &Path) -> anyhow::Result<usize> {
        let prefix = format!("{}/", path_key(dir).trim_end_matches('/'));
        let mut removed = 0;
        for doc in storage::list_documents(&self.pool).await? {
            if doc.path.starts_with(&prefix) && self.forget_key(&doc.path).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(dir = %prefix, documents = removed, "removed directory from index");
        }
        Ok(removed)
    }

    async fn forget_key(&self, key: &str) -> anyhow::Result<bool> {
        self.store.delete_document(key).await?;
        storage::delete_document(&self.pool, key).await
    }

    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<RetrievedChunk>> {
        let query = embeddings::embed_query(question, &self.registry).await?;
        let hits = self.store.search(&query, top_k).await?;
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                path: hit.metadata.get(PATH_KEY).cloned().unwrap_or_default(),
                chunk_index: hit
                    .metadata
                    .get(CHUNK_INDEX_KEY)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default(),
                text: hit.metadata.get(TEXT_KEY).cloned().unwrap_or_default(),
                score: hit.score,
            })
            .collect())
    }

    /// Retrieves context for `question` and asks the LLM. The LLM is called
    /// even when nothing was retrieved.
    pub async fn ask(&self, question: &str, top_k: usize) -> anyhow::Result<Answer> {
        let llm = self.llm.as_ref().ok_or(LlmError::MissingBaseUrl)?;
        let sources = self.retrieve(question, top_k).await?;
        if sources.is_empty() {
            warn!("no context retrieved; asking without context");
        }
        let context = build_context(&sources);
        let text = llm.answer(question, &context).await?;
        Ok(Answer {
            question: question.to_string(),
            text,
            sources,
        })
    }

    pub async fn stats(&self) -> anyhow::Result<Stats> {
        let mut stats = storage::stats(&self.pool).await?;
        // Qdrant keeps its own points; report what the active store holds.
        stats.vectors = self.store.len().await? as i64;
        Ok(stats)
    }

    /// Document content hashes also cover the settings that shape the
    /// stored chunks, so changing them forces a re-ingest.
    fn fingerprint(&self, text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        hasher.update(&(self.structurizer.chunk_size as u64).to_le_bytes());
        hasher.update(&(self.structurizer.chunk_overlap as u64).to_le_bytes());
        hasher.update(format!("{:?}", self.config.chunking.strategy).as_bytes());
        hasher.update(self.config.embeddings.provider.as_bytes());
        hasher.update(self.config.embeddings.model.as_bytes());
        hasher.update(&(self.config.embeddings.dimensions as u64).to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Numbered, source-labelled chunks separated by blank lines.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}\n{}", i + 1, c.path, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_structurizer(config: &AppConfig) -> Result<TextStructurizer, ChunkError> {
    let size = config.chunking.chunk_size;
    let overlap = config.chunking.chunk_overlap;
    if size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    if overlap >= size {
        return Err(ChunkError::OverlapTooLarge { size, overlap });
    }
    let structurizer = TextStructurizer::new(size, overlap);
    Ok(match config.chunking.strategy {
        ChunkStrategy::Fixed => structurizer,
        ChunkStrategy::Sentence => structurizer.with_splitter(SentenceSplitter),
    })
}

pub async fn build_registry(config: &AppConfig) -> anyhow::Result<ProviderRegistry> {
    let emb = &config.embeddings;
    let mut reg = ProviderRegistry::new()
        .with_embedding("hashing", Arc::new(HashingEmbedder::new(emb.dimensions)));

    if let Some(base) = std::env::var_os("OPENAI_BASE_URL") {
        let mut cfg = OpenAiConfig::new(base.to_string_lossy());
        cfg.api_key = std::env::var("OPENAI_API_KEY").ok();
        cfg.embedding_model = emb.model.clone();
        reg = reg.with_embedding("openai", Arc::new(OpenAiProvider::new(cfg)));
    }

    #[cfg(feature = "local-embeddings")]
    if emb.provider == "fastembed" {
        let provider =
            tokio::task::spawn_blocking(providers::local::FastEmbedProvider::try_new).await??;
        reg = reg.with_embedding("fastembed", Arc::new(provider));
    }

    let settings = LlmSettings::from(&config.llm).with_env_fallback();
    match llm::chat_provider(&settings) {
        Ok(provider) => {
            reg = reg
                .with_llm(DEEPSEEK_PROVIDER, Arc::new(provider))
                .set_preferred_llm(DEEPSEEK_PROVIDER);
        }
        Err(LlmError::MissingBaseUrl) => {
            debug!("no LLM base URL configured; ask will be unavailable");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(reg.set_preferred_embedding(&emb.provider))
}

/// Clears the vector index when the embedder no longer produces vectors of
/// the stored width, and drops every fingerprint so the next ingest
/// re-embeds all documents.
async fn reconcile_dimensions(
    registry: &ProviderRegistry,
    store: &dyn VectorStore,
    pool: &SqlitePool,
) -> anyhow::Result<()> {
    let Some(indexed) = store.dimensions().await? else {
        return Ok(());
    };
    let produced = match embeddings::embed_query("dimension check", registry).await {
        Ok(v) => v.len(),
        Err(e) => {
            warn!(error = %e, "could not check embedding width");
            return Ok(());
        }
    };
    if produced == indexed {
        return Ok(());
    }
    warn!(indexed, produced, "embedding width changed; clearing the vector index");
    store.clear().await?;
    let stale = storage::clear_content_hash(pool, None).await?;
    info!(documents = stale, "documents marked for re-embedding");
    Ok(())
}

pub async fn build_vector_store(
    config: &AppConfig,
    pool: SqlitePool,
) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.vectors.provider.as_str() {
        "qdrant" => {
            let url = config
                .vectors
                .url
                .clone()
                .context("vectors.url is required for the qdrant store")?;
            let client = QdrantClient::new(QdrantConfig {
                url,
                collection: config.vectors.collection.clone(),
                api_key: std::env::var("QDRANT_API_KEY").ok(),
            });
            Ok(Arc::new(QdrantStore::new(client)))
        }
        "flat" => Ok(Arc::new(FlatVectorStore::open(pool).await?)),
        other => anyhow::bail!("unknown vector store provider '{other}'"),
    }
}

/// Documents are keyed by absolute path so CLI runs from different working
/// directories and the watcher agree.
fn path_key(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    abs.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            path: path.to_string(),
            chunk_index: 0,
            score: 1.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn context_numbers_and_labels_chunks() {
        let ctx = build_context(&[hit("a.txt", "alpha"), hit("b.md", "beta")]);
        assert_eq!(ctx, "[1] a.txt\nalpha\n\n[2] b.md\nbeta");
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn invalid_chunking_is_rejected_up_front() {
        let mut cfg = AppConfig::default();
        cfg.chunking.chunk_overlap = cfg.chunking.chunk_size;
        assert!(matches!(
            build_structurizer(&cfg),
            Err(ChunkError::OverlapTooLarge { .. })
        ));
        cfg.chunking.chunk_size = 0;
        assert_eq!(build_structurizer(&cfg).unwrap_err(), ChunkError::ZeroChunkSize);
    }

    #[tokio::test]
    async fn unknown_vector_store_is_an_error() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let mut cfg = AppConfig::default();
        cfg.vectors.provider = "faiss".into();
        assert!(build_vector_store(&cfg, pool.clone()).await.is_err());
        cfg.vectors.provider = "qdrant".into();
        assert!(build_vector_store(&cfg, pool).await.is_err());
    }

    #[tokio::test]
    async fn registry_serves_the_chat_llm_when_a_base_url_is_set() {
        let mut cfg = AppConfig::default();
        cfg.llm.base_url = Some("http://127.0.0.1:9".into());
        let reg = build_registry(&cfg).await.unwrap();
        assert_eq!(reg.preferred_llm.as_deref(), Some(DEEPSEEK_PROVIDER));
        assert!(reg.llm(None).is_ok());
    }

    struct RejectingStore;

    #[async_trait::async_trait]
    impl VectorStore for RejectingStore {
        async fn upsert(&self, _records: Vec<VectorRecord>) -> anyhow::Result<()> {
            anyhow::bail!("store offline")
        }
        async fn search(
            &self,
            _vector: &[f32],
            _limit: usize,
        ) -> anyhow::Result<Vec<vectorstore::ScoredRecord>> {
            Ok(Vec::new())
        }
        async fn delete_document(&self, _path: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn len(&self) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn dimensions(&self) -> anyhow::Result<Option<usize>> {
            Ok(None)
        }
        async fn clear(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_upsert_after_delete_drops_the_fingerprint() {
        let pool = connect("sqlite://file:pipeline_failed_upsert?mode=memory&cache=shared")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        let mut cfg = AppConfig::default();
        cfg.embeddings.dimensions = 64;
        cfg.chunking.chunk_size = 200;
        cfg.chunking.chunk_overlap = 40;
        let registry = build_registry(&cfg).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "The first version of the notes.").unwrap();

        let healthy = Assistant::assemble(
            cfg.clone(),
            pool.clone(),
            registry.clone(),
            Arc::new(FlatVectorStore::in_memory()),
            None,
        )
        .unwrap();
        healthy.ingest_file(&file).await.unwrap();
        let key = path_key(&file);
        let doc = storage::document_by_path(&pool, &key).await.unwrap().unwrap();
        assert!(doc.content_hash.is_some());

        std::fs::write(&file, "The second version of the notes.").unwrap();
        let broken =
            Assistant::assemble(cfg, pool.clone(), registry, Arc::new(RejectingStore), None)
                .unwrap();
        assert!(broken.ingest_file(&file).await.is_err());
        let doc = storage::document_by_path(&pool, &key).await.unwrap().unwrap();
        assert_eq!(doc.content_hash, None);
    }
}
