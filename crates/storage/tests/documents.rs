use storage::models::{DocumentStatus, DocumentUpsert, NewChunk, StoredVector};
use storage::{connect, migrate};

fn upsert(path: &str, hash: &str) -> DocumentUpsert {
    DocumentUpsert {
        path: path.to_string(),
        content_hash: Some(hash.to_string()),
        kind: "text".to_string(),
        status: DocumentStatus::Ingested,
        notice: None,
    }
}

fn chunk(idx: i64, text: &str) -> NewChunk {
    NewChunk {
        idx,
        start_offset: idx * 10,
        end_offset: idx * 10 + text.chars().count() as i64,
        text: text.to_string(),
        hash: format!("h-{text}"),
    }
}

#[tokio::test]
async fn document_lifecycle() {
    let pool = connect("sqlite://file:storage_lifecycle?mode=memory&cache=shared")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    // Migrations are idempotent.
    migrate(&pool).await.unwrap();

    let id = storage::upsert_document(&pool, &upsert("/docs/a.txt", "v1"))
        .await
        .unwrap();
    storage::replace_chunks(&pool, id, &[chunk(0, "alpha"), chunk(1, "beta")])
        .await
        .unwrap();

    // Re-upserting keeps the id and swaps the hash.
    let again = storage::upsert_document(&pool, &upsert("/docs/a.txt", "v2"))
        .await
        .unwrap();
    assert_eq!(id, again);
    storage::replace_chunks(&pool, id, &[chunk(0, "gamma")])
        .await
        .unwrap();

    let doc = storage::document_by_path(&pool, "/docs/a.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.content_hash.as_deref(), Some("v2"));
    assert_eq!(doc.status, "ingested");
    assert_eq!(doc.chunk_count, 1);

    let chunks = storage::chunks_for_document(&pool, id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "gamma");
    assert_eq!(storage::chunks_by_hash(&pool, "h-gamma").await.unwrap().len(), 1);
    assert!(storage::chunks_by_hash(&pool, "h-alpha").await.unwrap().is_empty());

    storage::upsert_document(
        &pool,
        &DocumentUpsert {
            path: "/docs/scan.png".into(),
            content_hash: None,
            kind: "image".into(),
            status: DocumentStatus::Skipped,
            notice: Some("[image files are not processed: OCR is not enabled]".into()),
        },
    )
    .await
    .unwrap();

    storage::upsert_vectors(
        &pool,
        &[StoredVector {
            id: "p1".into(),
            document_path: "/docs/a.txt".into(),
            vector: vec![0.25, -0.5],
            payload: serde_json::json!({"path": "/docs/a.txt"}),
        }],
    )
    .await
    .unwrap();

    let stats = storage::stats(&pool).await.unwrap();
    assert_eq!(
        (stats.documents, stats.skipped, stats.chunks, stats.vectors),
        (1, 1, 1, 1)
    );

    let listed: Vec<String> = storage::list_documents(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.path)
        .collect();
    assert_eq!(listed, vec!["/docs/a.txt", "/docs/scan.png"]);

    assert!(storage::delete_document(&pool, "/docs/a.txt").await.unwrap());
    let stats = storage::stats(&pool).await.unwrap();
    assert_eq!(
        (stats.documents, stats.chunks, stats.vectors),
        (0, 0, 0)
    );
    assert!(!storage::delete_document(&pool, "/docs/a.txt").await.unwrap());
}

#[tokio::test]
async fn vectors_round_trip_and_delete_by_document() {
    let pool = connect("sqlite://file:storage_vectors?mode=memory&cache=shared")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();

    let rows: Vec<StoredVector> = ["a", "b", "c"]
        .iter()
        .enumerate()
        .map(|(i, id)| StoredVector {
            id: id.to_string(),
            document_path: if i < 2 { "/x.md".into() } else { "/y.md".into() },
            vector: vec![i as f32, 1.0, -2.5],
            payload: serde_json::json!({"chunk_index": i.to_string()}),
        })
        .collect();
    storage::upsert_vectors(&pool, &rows).await.unwrap();

    let loaded = storage::load_vectors(&pool).await.unwrap();
    assert_eq!(loaded, rows);

    assert_eq!(
        storage::delete_vectors_for_document(&pool, "/x.md").await.unwrap(),
        2
    );
    let left = storage::load_vectors(&pool).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, "c");
}

#[tokio::test]
async fn clearing_fingerprints_and_vectors() {
    let pool = connect("sqlite://file:storage_reset?mode=memory&cache=shared")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();

    for path in ["/r/a.txt", "/r/b.txt"] {
        storage::upsert_document(&pool, &upsert(path, "fp")).await.unwrap();
    }
    storage::upsert_vectors(
        &pool,
        &[StoredVector {
            id: "p1".into(),
            document_path: "/r/a.txt".into(),
            vector: vec![1.0, 0.0],
            payload: serde_json::json!({}),
        }],
    )
    .await
    .unwrap();

    let hash = |path: &'static str| {
        let pool = pool.clone();
        async move {
            storage::document_by_path(&pool, path)
                .await
                .unwrap()
                .unwrap()
                .content_hash
        }
    };

    assert_eq!(storage::clear_content_hash(&pool, Some("/r/a.txt")).await.unwrap(), 1);
    assert_eq!(hash("/r/a.txt").await, None);
    assert_eq!(hash("/r/b.txt").await.as_deref(), Some("fp"));

    assert_eq!(storage::clear_content_hash(&pool, None).await.unwrap(), 2);
    assert_eq!(hash("/r/b.txt").await, None);

    assert_eq!(storage::clear_vectors(&pool).await.unwrap(), 1);
    assert!(storage::load_vectors(&pool).await.unwrap().is_empty());
}
