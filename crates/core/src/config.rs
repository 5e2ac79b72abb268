use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub cleaner: CleanerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    #[serde(default)]
    pub vectors: VectorConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/qa.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub remove_special_chars: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remove_special_chars: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    #[default]
    Fixed,
    Sentence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Fixed,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Output size of the `hashing` provider.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: String::new(),
            batch_size: default_batch_size(),
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            url: None,
            collection: default_collection(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Falls back to `DEEPSEEK_API_BASE_URL`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Falls back to `DEEPSEEK_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_dimensions() -> usize {
    384
}
fn default_vector_provider() -> String {
    "flat".to_string()
}
fn default_collection() -> String {
    "qa_chunks".to_string()
}
fn default_top_k() -> usize {
    4
}
fn default_model() -> String {
    crate::llm::DEFAULT_MODEL.to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    60
}

/// Loads the TOML config (explicit path, else optional `config/default`)
/// layered with `QA_*` environment overrides such as `QA_LLM__MODEL`.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("QA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
