use providers::{ChatRequest, ChatResponse, LlmProvider, ProviderError, Role};
use qa_core::config::AppConfig;
use qa_core::llm::{fallback_message, LlmError, LlmIntegrator, LlmSettings};
use qa_core::pipeline::{Assistant, FileOutcome};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

/// Answers "Paris." and remembers the last request it was sent.
#[derive(Default)]
struct StubLlm {
    last: Mutex<Option<ChatRequest>>,
    fail: bool,
}

#[async_trait::async_trait]
impl LlmProvider for StubLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        *self.last.lock().unwrap() = Some(request);
        if self.fail {
            return Err(ProviderError::RequestFailed("connection refused".into()));
        }
        Ok(serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": " Paris. "}}]
        }))
        .unwrap())
    }
}

fn test_config(root: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.database.path = root.join("qa.sqlite").to_string_lossy().into_owned();
    cfg.embeddings.provider = "hashing".into();
    cfg.embeddings.dimensions = 512;
    cfg.chunking.chunk_size = 200;
    cfg.chunking.chunk_overlap = 40;
    cfg.llm.base_url = None;
    cfg
}

fn seed_docs(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("france.txt"),
        "Paris is the capital of France. The city sits on the Seine.",
    )
    .unwrap();
    fs::write(
        dir.join("rust.md"),
        "# Rust\n\nRust programming language focuses on memory safety without garbage collection.",
    )
    .unwrap();
    fs::write(dir.join("scan.png"), "not really an image").unwrap();
}

async fn open_with(cfg: AppConfig, llm: Arc<StubLlm>) -> Assistant {
    Assistant::open(cfg)
        .await
        .unwrap()
        .with_llm(LlmIntegrator::with_provider(llm, &LlmSettings::default()))
}

#[tokio::test]
async fn ingest_then_ask_uses_retrieved_context() {
    let temp = tempdir().unwrap();
    let docs = temp.path().join("docs");
    seed_docs(&docs);

    let llm = Arc::new(StubLlm::default());
    let assistant = open_with(test_config(temp.path()), llm.clone()).await;

    let summary = assistant.ingest(&[docs.clone()]).await.unwrap();
    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.chunks, 2);
    assert_eq!(summary.embedded, 2);

    let answer = assistant
        .ask("What is the capital of France?", 1)
        .await
        .unwrap();
    assert_eq!(answer.text, "Paris.");
    assert_eq!(answer.sources.len(), 1);
    assert!(answer.sources[0].path.ends_with("docs/france.txt"));

    let request = llm.last.lock().unwrap().clone().unwrap();
    assert_eq!(request.model, "deepseek-r1");
    assert_eq!(request.max_tokens, 500);
    let user = request
        .messages
        .iter()
        .find(|m| m.role == Role::User)
        .unwrap();
    assert!(user.content.starts_with("Context:\n[1] "));
    assert!(user.content.contains("paris is the capital of france."));
    assert!(user
        .content
        .ends_with("\n\nQuestion: What is the capital of France?"));

    let stats = assistant.stats().await.unwrap();
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.chunks, 2);
    assert_eq!(stats.vectors, 2);
}

#[tokio::test]
async fn unchanged_files_are_not_reembedded() {
    let temp = tempdir().unwrap();
    let docs = temp.path().join("docs");
    seed_docs(&docs);
    let cfg = test_config(temp.path());

    let assistant = open_with(cfg.clone(), Arc::new(StubLlm::default())).await;
    assistant.ingest(&[docs.clone()]).await.unwrap();

    let again = assistant.ingest(&[docs.clone()]).await.unwrap();
    assert_eq!(again.ingested, 0);
    assert_eq!(again.unchanged, 2);
    assert_eq!(again.embedded, 0);

    fs::write(docs.join("rust.md"), "Rust has no garbage collector.").unwrap();
    assert_eq!(
        assistant.ingest_file(&docs.join("rust.md")).await.unwrap(),
        FileOutcome::Ingested { chunks: 1 }
    );
    drop(assistant);

    // A fresh process sees the persisted index and skips unchanged files.
    let reopened = open_with(cfg, Arc::new(StubLlm::default())).await;
    let third = reopened.ingest(&[docs]).await.unwrap();
    assert_eq!(third.unchanged, 2);
    assert_eq!(reopened.stats().await.unwrap().vectors, 2);
}

#[tokio::test]
async fn forgotten_documents_leave_the_index() {
    let temp = tempdir().unwrap();
    let docs = temp.path().join("docs");
    seed_docs(&docs);

    let assistant = open_with(test_config(temp.path()), Arc::new(StubLlm::default())).await;
    assistant.ingest(&[docs.clone()]).await.unwrap();

    let france = docs.join("france.txt");
    fs::remove_file(&france).unwrap();
    assert!(assistant.forget(&france).await.unwrap());
    assert!(!assistant.forget(&france).await.unwrap());

    let stats = assistant.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.vectors, 1);
    let hits = assistant.retrieve("capital of France", 5).await.unwrap();
    assert!(hits.iter().all(|h| !h.path.ends_with("france.txt")));
}

#[tokio::test]
async fn llm_failures_surface_as_llm_errors() {
    let temp = tempdir().unwrap();
    let docs = temp.path().join("docs");
    seed_docs(&docs);

    let llm = Arc::new(StubLlm {
        fail: true,
        ..Default::default()
    });
    let assistant = open_with(test_config(temp.path()), llm).await;
    assistant.ingest(&[docs]).await.unwrap();

    let err = assistant.ask("Where is the Seine?", 2).await.unwrap_err();
    let llm_err = err.downcast_ref::<LlmError>().unwrap();
    assert!(fallback_message(llm_err).contains("trying to reach the language model"));
}

#[tokio::test]
async fn asking_an_empty_index_still_calls_the_llm() {
    let temp = tempdir().unwrap();
    let llm = Arc::new(StubLlm::default());
    let assistant = open_with(test_config(temp.path()), llm.clone()).await;

    let answer = assistant.ask("Anything?", 3).await.unwrap();
    assert!(answer.sources.is_empty());
    let request = llm.last.lock().unwrap().clone().unwrap();
    assert!(request.messages[1].content.starts_with("Context:\n\nQuestion: Anything?"));
}

#[tokio::test]
async fn changing_embedding_width_rebuilds_the_index() {
    let temp = tempdir().unwrap();
    let docs = temp.path().join("docs");
    seed_docs(&docs);
    let cfg = test_config(temp.path());

    let first = open_with(cfg.clone(), Arc::new(StubLlm::default())).await;
    assert_eq!(first.ingest(&[docs.clone()]).await.unwrap().ingested, 2);
    drop(first);

    let mut narrower = cfg;
    narrower.embeddings.dimensions = 256;
    let reopened = open_with(narrower, Arc::new(StubLlm::default())).await;
    // The 512-wide vectors were dropped on open.
    assert_eq!(reopened.stats().await.unwrap().vectors, 0);

    let again = reopened.ingest(&[docs]).await.unwrap();
    assert_eq!(again.ingested, 2);
    assert_eq!(again.unchanged, 0);
    assert_eq!(again.failed, 0);
    assert_eq!(reopened.stats().await.unwrap().vectors, 2);

    let hits = reopened.retrieve("capital of France", 1).await.unwrap();
    assert!(hits[0].path.ends_with("france.txt"));
}

#[tokio::test]
async fn forgetting_a_directory_drops_everything_below_it() {
    let temp = tempdir().unwrap();
    let docs = temp.path().join("docs");
    seed_docs(&docs);
    let nested = docs.join("nested");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("notes.txt"), "Lyon is on the Rhone.").unwrap();
    let other = temp.path().join("docs-archive");
    fs::create_dir_all(&other).unwrap();
    fs::write(other.join("old.txt"), "An archived note.").unwrap();

    let assistant = open_with(test_config(temp.path()), Arc::new(StubLlm::default())).await;
    assistant
        .ingest(&[docs.clone(), other.clone()])
        .await
        .unwrap();

    fs::remove_dir_all(&docs).unwrap();
    // france.txt, rust.md, scan.png and nested/notes.txt; not docs-archive.
    assert_eq!(assistant.forget_dir(&docs).await.unwrap(), 4);
    assert_eq!(assistant.forget_dir(&docs).await.unwrap(), 0);

    let stats = assistant.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.vectors, 1);
}
