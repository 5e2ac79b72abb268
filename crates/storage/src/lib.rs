//! Storage layer: SQLite schemas and helpers.
//!
//! Holds DB pool setup, the migration runner and the document, chunk and
//! vector tables used by the ingest pipeline.

pub mod documents;
pub mod models;
pub mod vectors;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub use documents::{
    chunks_by_hash, chunks_for_document, clear_content_hash, delete_document, document_by_path,
    list_documents, replace_chunks, stats, upsert_document,
};
pub use vectors::{clear_vectors, delete_vectors_for_document, load_vectors, upsert_vectors};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
    }
    if !url.contains("memory") && !url.contains("mode=") {
        let sep = if url.contains('?') { '&' } else { '?' };
        url = format!("{url}{sep}mode=rwc");
    }
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        opts = opts.max_connections(1);
    } else {
        opts = opts.max_connections(5);
    }
    tracing::debug!(url = %url, "connecting to sqlite");
    let pool = opts.connect(&url).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    // Safe to run multiple times (idempotent).
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
