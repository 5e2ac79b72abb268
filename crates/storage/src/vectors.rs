//! Persistence for the in-process flat vector index.
//!
//! Vectors are stored as little-endian `f32` blobs keyed by point id.

use crate::models::StoredVector;
use sqlx::{Row, SqlitePool};

pub async fn upsert_vectors(pool: &SqlitePool, records: &[StoredVector]) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO vectors (id, document_path, vector, payload_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                document_path = excluded.document_path,
                vector = excluded.vector,
                payload_json = excluded.payload_json
            "#,
        )
        .bind(&record.id)
        .bind(&record.document_path)
        .bind(encode_vector(&record.vector))
        .bind(record.payload.to_string())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn load_vectors(pool: &SqlitePool) -> anyhow::Result<Vec<StoredVector>> {
    let rows = sqlx::query("SELECT id, document_path, vector, payload_json FROM vectors ORDER BY id")
        .fetch_all(pool)
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let blob: Vec<u8> = row.try_get("vector")?;
        let payload: String = row.try_get("payload_json")?;
        out.push(StoredVector {
            id: row.try_get("id")?,
            document_path: row.try_get("document_path")?,
            vector: decode_vector(&blob)?,
            payload: serde_json::from_str(&payload)?,
        });
    }
    Ok(out)
}

pub async fn delete_vectors_for_document(pool: &SqlitePool, path: &str) -> anyhow::Result<u64> {
    let res = sqlx::query("DELETE FROM vectors WHERE document_path = ?1")
        .bind(path)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn clear_vectors(pool: &SqlitePool) -> anyhow::Result<u64> {
    let res = sqlx::query("DELETE FROM vectors").execute(pool).await?;
    Ok(res.rows_affected())
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> anyhow::Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        anyhow::bail!("corrupt vector blob of {} bytes", blob.len());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
