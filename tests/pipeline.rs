//! End-to-end ingestion and retrieval over both storage backends, driven
//! through fake GitLab and embedding collaborators.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{merged_mr, sample_project, wiki, CannedModel, HashEmbedder, PoisonedEmbedder};
use knowdesk::answer::{query_knowledge, AnswerSynthesizer, NO_KNOWLEDGE_ANSWER};
use knowdesk::batch::EmbeddingBatcher;
use knowdesk::config::IngestConfig;
use knowdesk::ingest::{status, IngestPipeline, IngestService, StatusQuery};
use knowdesk::retrieve::Retriever;
use knowdesk::sqlite_store::SqliteStore;
use knowdesk::{db, migrate};
use knowdesk_core::chunk::ChunkOptions;
use knowdesk_core::completion::CompletionOptions;
use knowdesk_core::models::{KbStatus, ResourceType, SourceType};
use knowdesk_core::store::memory::InMemoryStore;
use knowdesk_core::store::{ChunkStore, KnowledgeBaseStore, ResourceLedger, Store};
use tempfile::TempDir;

fn batcher() -> Arc<EmbeddingBatcher> {
    Arc::new(EmbeddingBatcher::new(
        Arc::new(HashEmbedder::new()),
        10,
        3,
        Duration::from_millis(1),
    ))
}

fn service(store: Arc<dyn Store>, embedder: Arc<EmbeddingBatcher>) -> IngestService {
    service_with(store, embedder, IngestConfig::default())
}

fn service_with(
    store: Arc<dyn Store>,
    embedder: Arc<EmbeddingBatcher>,
    settings: IngestConfig,
) -> IngestService {
    IngestService::new(Arc::new(IngestPipeline::new(
        store,
        embedder,
        ChunkOptions::default(),
        settings,
    )))
}

async fn sqlite_store(tmp: &TempDir) -> Arc<dyn Store> {
    let pool = db::connect_path(&tmp.path().join("kd.sqlite")).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

async fn check_full_run(store: Arc<dyn Store>) {
    let source = Arc::new(sample_project());
    let ingest = service(store.clone(), batcher());

    let job = ingest.trigger("ws-1", "group/app", source.clone()).await.unwrap();
    let kb = job.config_id.clone();
    let summary = job.wait().await.unwrap();

    assert_eq!(summary.wikis, 1);
    assert_eq!(summary.merge_requests, 1);
    assert_eq!(summary.issues, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.new_chunks, 4);
    assert_eq!(summary.total_chunks, 4);
    assert_eq!(summary.total_documents, 3);

    let chunks = store.load_chunks(&kb).await.unwrap();
    let count = |t: SourceType| chunks.iter().filter(|c| c.source_type == t).count();
    assert_eq!(count(SourceType::Wiki), 1);
    assert_eq!(count(SourceType::MergeRequest), 1);
    assert_eq!(count(SourceType::MergeRequestComment), 0);
    assert_eq!(count(SourceType::Issue), 1);
    assert_eq!(count(SourceType::IssueComment), 1);

    let wiki_chunk = chunks.iter().find(|c| c.source_type == SourceType::Wiki).unwrap();
    assert_eq!(
        wiki_chunk.source_url.as_deref(),
        Some("https://gitlab.example.com/group/app/wikis/deploy")
    );
    assert_eq!(wiki_chunk.metadata["title"], "Deploy");

    let st = status(store.as_ref(), &StatusQuery::Workspace("ws-1".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(st.id, kb);
    assert_eq!(st.status, KbStatus::Completed);
    assert_eq!(st.total_documents, 3);
    assert_eq!(st.total_chunks, 4);
    assert!(st.last_indexed_at.is_some());
    assert!(st.error.is_none());

    // Second run over unchanged data is a no-op apart from timestamps.
    let job = ingest.trigger("ws-1", "group/app", source.clone()).await.unwrap();
    assert_eq!(job.config_id, kb);
    let again = job.wait().await.unwrap();
    assert_eq!(again.new_chunks, 0);
    assert_eq!(again.skipped, 3);
    assert_eq!(again.total_chunks, 4);
    assert_eq!(again.total_documents, 3);
    assert_eq!(source.wiki_fetches.load(Ordering::SeqCst), 1);

    let config = store.get_knowledge_base(&kb).await.unwrap().unwrap();
    assert_eq!(config.status, KbStatus::Completed);
    assert_eq!(store.count_chunks(&kb).await.unwrap(), 4);
}

#[tokio::test]
async fn test_full_run_in_memory() {
    check_full_run(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn test_full_run_sqlite() {
    let tmp = TempDir::new().unwrap();
    check_full_run(sqlite_store(&tmp).await).await;
}

#[tokio::test]
async fn test_failed_resource_is_retried_on_next_run() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;

    let mut project = sample_project();
    project.wikis.push(wiki(
        "oncall",
        "On-call",
        "Pages go to the primary first and escalate to the secondary after fifteen minutes.",
    ));
    project.break_wiki("oncall");
    let source = Arc::new(project);
    let ingest = service(store.clone(), batcher());

    let job = ingest.trigger("ws-2", "group/app", source.clone()).await.unwrap();
    let kb = job.config_id.clone();
    let first = job.wait().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.wikis, 1);
    assert_eq!(first.issues, 1);

    let config = store.get_knowledge_base(&kb).await.unwrap().unwrap();
    assert_eq!(config.status, KbStatus::Completed);
    assert_eq!(config.total_documents, 3);
    assert!(!store
        .is_indexed(&kb, ResourceType::Wiki, "oncall")
        .await
        .unwrap());

    source.repair_wiki("oncall");
    let second = service(store.clone(), batcher())
        .trigger("ws-2", "group/app", source.clone())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(second.wikis, 1);
    assert_eq!(second.failed, 0);
    assert_eq!(second.new_chunks, 1);
    assert_eq!(second.total_documents, 4);
    assert_eq!(second.total_chunks, 5);
}

#[tokio::test]
async fn test_embedding_failure_leaves_resource_unindexed() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;

    let mut project = sample_project();
    project.wikis.push(wiki(
        "secrets",
        "Secrets",
        "Rotate the REJECTED-BY-MODEL signing keys every quarter and record it in the vault.",
    ));
    let embedder = Arc::new(EmbeddingBatcher::new(
        Arc::new(PoisonedEmbedder {
            poison: "REJECTED-BY-MODEL".to_string(),
        }),
        10,
        3,
        Duration::from_millis(1),
    ));

    let job = service(store.clone(), embedder)
        .trigger("ws-5", "group/app", Arc::new(project))
        .await
        .unwrap();
    let kb = job.config_id.clone();
    let summary = job.wait().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.wikis, 1);
    assert_eq!(summary.merge_requests, 1);
    assert_eq!(summary.issues, 1);

    let chunks = store.load_chunks(&kb).await.unwrap();
    assert!(chunks.iter().all(|c| c.source_id != "secrets"));
    assert!(chunks.iter().any(|c| c.source_id == "deploy"));
    assert!(!store.is_indexed(&kb, ResourceType::Wiki, "secrets").await.unwrap());
    assert!(store.is_indexed(&kb, ResourceType::Wiki, "deploy").await.unwrap());

    let config = store.get_knowledge_base(&kb).await.unwrap().unwrap();
    assert_eq!(config.status, KbStatus::Completed);
    assert_eq!(config.total_documents, 3);
    assert_eq!(config.total_chunks, 4);
}

#[tokio::test]
async fn test_merge_request_limit_caps_phase() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let mut project = sample_project();
    project.merge_requests = vec![
        merged_mr(21, "Pin the Rust toolchain"),
        merged_mr(22, "Cache cargo registry in CI"),
        merged_mr(23, "Split integration tests"),
        merged_mr(24, "Drop the legacy deploy script"),
        merged_mr(25, "Add nightly vulnerability scan"),
    ];
    let settings = IngestConfig {
        merge_request_limit: 2,
        ..IngestConfig::default()
    };

    let job = service_with(store.clone(), batcher(), settings)
        .trigger("ws-6", "group/app", Arc::new(project))
        .await
        .unwrap();
    let kb = job.config_id.clone();
    let summary = job.wait().await.unwrap();

    assert_eq!(summary.merge_requests, 2);
    assert_eq!(summary.failed, 0);
    for iid in ["21", "22"] {
        assert!(store.is_indexed(&kb, ResourceType::MergeRequest, iid).await.unwrap());
    }
    for iid in ["23", "24", "25"] {
        assert!(!store.is_indexed(&kb, ResourceType::MergeRequest, iid).await.unwrap());
    }
    let chunks = store.load_chunks(&kb).await.unwrap();
    let mr_chunks = chunks
        .iter()
        .filter(|c| c.source_type == SourceType::MergeRequest)
        .count();
    assert_eq!(mr_chunks, 2);
    assert_eq!(summary.total_documents, 4);
}

#[tokio::test]
async fn test_question_answered_from_ingested_content() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let embedder = batcher();
    let kb = service(store.clone(), embedder.clone())
        .trigger("ws-3", "group/app", Arc::new(sample_project()))
        .await
        .unwrap();
    let kb_id = kb.config_id.clone();
    kb.wait().await.unwrap();

    let model = Arc::new(CannedModel::new("Set SameSite=None on the session cookie."));
    let synthesizer = AnswerSynthesizer::new(
        Retriever::new(store.clone(), embedder),
        model.clone(),
        CompletionOptions::default(),
    );

    let question =
        "The redirect drops the SameSite cookie; setting SameSite=None fixes it for Safari.";
    let answer = query_knowledge(store.as_ref(), &synthesizer, &kb_id, question)
        .await
        .unwrap();

    assert_eq!(answer.answer, "Set SameSite=None on the session cookie.");
    assert_eq!(answer.sources.len(), 4);
    assert_eq!(answer.sources[0].source_type, SourceType::IssueComment);
    assert!((answer.sources[0].similarity - 1.0).abs() < 1e-5);
    assert!(answer
        .sources
        .windows(2)
        .all(|w| w[0].similarity >= w[1].similarity));

    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[0][0].content.contains("[Source 1]: The redirect drops"));
}

#[tokio::test]
async fn test_reset_then_query_reports_missing() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let embedder = batcher();
    let job = service(store.clone(), embedder.clone())
        .trigger("ws-4", "group/app", Arc::new(sample_project()))
        .await
        .unwrap();
    let kb_id = job.config_id.clone();
    job.wait().await.unwrap();

    assert!(store.delete_knowledge_base(&kb_id).await.unwrap());
    assert_eq!(store.count_chunks(&kb_id).await.unwrap(), 0);
    assert_eq!(store.count_indexed(&kb_id).await.unwrap(), 0);

    let synthesizer = AnswerSynthesizer::new(
        Retriever::new(store.clone(), embedder),
        Arc::new(CannedModel::new("unused")),
        CompletionOptions::default(),
    );
    let err = query_knowledge(store.as_ref(), &synthesizer, &kb_id, "anything")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));

    let answer = synthesizer.answer(&kb_id, "anything").await.unwrap();
    assert_eq!(answer.answer, NO_KNOWLEDGE_ANSWER);
}
