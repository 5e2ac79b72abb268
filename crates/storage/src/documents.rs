use crate::models::{Chunk, Document, DocumentUpsert, NewChunk, Stats};
use sqlx::SqlitePool;

/// Inserts or refreshes a document row and returns its id.
pub async fn upsert_document(pool: &SqlitePool, doc: &DocumentUpsert) -> anyhow::Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO documents (path, content_hash, kind, status, notice, ingested_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            kind = excluded.kind,
            status = excluded.status,
            notice = excluded.notice,
            ingested_at = excluded.ingested_at
        RETURNING id
        "#,
    )
    .bind(&doc.path)
    .bind(&doc.content_hash)
    .bind(&doc.kind)
    .bind(doc.status.as_str())
    .bind(&doc.notice)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn document_by_path(pool: &SqlitePool, path: &str) -> anyhow::Result<Option<Document>> {
    let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE path = ?1")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(doc)
}

/// Removes a document with its chunks and persisted vectors.
pub async fn delete_document(pool: &SqlitePool, path: &str) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE path = ?1)")
        .bind(path)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM vectors WHERE document_path = ?1")
        .bind(path)
        .execute(&mut *tx)
        .await?;
    let res = sqlx::query("DELETE FROM documents WHERE path = ?1")
        .bind(path)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(res.rows_affected() > 0)
}

/// Forgets the content fingerprint of one document, or of all documents
/// when `path` is `None`, so the next ingest re-embeds them.
pub async fn clear_content_hash(pool: &SqlitePool, path: Option<&str>) -> anyhow::Result<u64> {
    let res = match path {
        Some(path) => {
            sqlx::query("UPDATE documents SET content_hash = NULL WHERE path = ?1")
                .bind(path)
                .execute(pool)
                .await?
        }
        None => {
            sqlx::query("UPDATE documents SET content_hash = NULL")
                .execute(pool)
                .await?
        }
    };
    Ok(res.rows_affected())
}

pub async fn list_documents(pool: &SqlitePool) -> anyhow::Result<Vec<Document>> {
    let docs = sqlx::query_as::<_, Document>("SELECT * FROM documents ORDER BY path")
        .fetch_all(pool)
        .await?;
    Ok(docs)
}

/// Swaps the chunk set of a document in one transaction and updates its
/// chunk count.
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_id: i64,
    chunks: &[NewChunk],
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT INTO chunks (document_id, idx, start_offset, end_offset, text, hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(document_id)
        .bind(chunk.idx)
        .bind(chunk.start_offset)
        .bind(chunk.end_offset)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE documents SET chunk_count = ?2 WHERE id = ?1")
        .bind(document_id)
        .bind(chunks.len() as i64)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn chunks_for_document(pool: &SqlitePool, document_id: i64) -> anyhow::Result<Vec<Chunk>> {
    let chunks = sqlx::query_as::<_, Chunk>(
        "SELECT * FROM chunks WHERE document_id = ?1 ORDER BY idx",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(chunks)
}

pub async fn chunks_by_hash(pool: &SqlitePool, hash: &str) -> anyhow::Result<Vec<Chunk>> {
    let chunks = sqlx::query_as::<_, Chunk>("SELECT * FROM chunks WHERE hash = ?1 ORDER BY id")
        .bind(hash)
        .fetch_all(pool)
        .await?;
    Ok(chunks)
}

pub async fn stats(pool: &SqlitePool) -> anyhow::Result<Stats> {
    let (documents, skipped): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN status = 'ingested' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0)
        FROM documents
        "#,
    )
    .fetch_one(pool)
    .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
        .fetch_one(pool)
        .await?;
    Ok(Stats {
        documents,
        skipped,
        chunks,
        vectors,
    })
}
