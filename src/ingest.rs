//! Ingestion pipeline and job model.
//!
//! A run indexes one (workspace, project) pair in strictly ordered phases:
//!
//! | Phase | Work |
//! |-------|------|
//! | 0 | Create or reuse the knowledge base config, set `processing` |
//! | 1 | Wiki pages: fetch, chunk, embed + store, mark indexed |
//! | 2 | Merge requests (most recent, capped): body + qualifying comments as one unit |
//! | 3 | Issues: same shape as phase 2, uncapped |
//! | 4 | Finalize: cumulative totals, `completed`, `last_indexed_at` |
//!
//! Each resource is processed as one unit: its chunks are embedded and
//! written in a single batch, and only then is its ledger entry written. A
//! failing resource is logged and skipped; an unavailable listing skips the
//! phase. Resources already in the ledger are not fetched again, so a re-run
//! only picks up what is missing. An error that escapes the phases, or a
//! panic in the run task, marks the knowledge base `failed`.
//!
//! [`IngestService::trigger`] performs phase 0 inline and returns an
//! [`IngestJob`] while phases 1–4 run on a spawned tokio task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use knowdesk_core::chunk::{split_into_chunks, ChunkOptions};
use knowdesk_core::models::{
    DocumentChunk, KbStatus, KbTotals, PendingChunk, ResourceType, SourceType,
};
use knowdesk_core::store::{ChunkStore, KnowledgeBaseStore, ResourceLedger, Store};

use crate::batch::EmbeddingBatcher;
use crate::config::IngestConfig;
use crate::source::{
    Issue, MergeRequest, Note, SourceCollaborator, SourceError, WikiPageSummary,
};

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub knowledge_base_id: String,
    /// Resources indexed during this run, per phase.
    pub wikis: usize,
    pub merge_requests: usize,
    pub issues: usize,
    /// Resources skipped because the ledger already had them.
    pub skipped: usize,
    /// Resources that failed and will be retried on the next run.
    pub failed: usize,
    /// Chunks written during this run.
    pub new_chunks: usize,
    /// Cumulative totals written at finalize.
    pub total_documents: i64,
    pub total_chunks: i64,
    pub elapsed: Duration,
}

pub struct IngestPipeline {
    store: Arc<dyn Store>,
    embedder: Arc<EmbeddingBatcher>,
    chunking: ChunkOptions,
    settings: IngestConfig,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<EmbeddingBatcher>,
        chunking: ChunkOptions,
        settings: IngestConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            settings,
        }
    }

    /// Phases 1–4 for a knowledge base opened by phase 0.
    pub async fn run(
        &self,
        knowledge_base_id: &str,
        project_id: &str,
        source: &dyn SourceCollaborator,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary {
            knowledge_base_id: knowledge_base_id.to_string(),
            ..Default::default()
        };

        info!(kb = knowledge_base_id, project = project_id, "ingestion started");

        self.index_wikis(knowledge_base_id, project_id, source, &mut summary)
            .await;
        self.index_merge_requests(knowledge_base_id, project_id, source, &mut summary)
            .await;
        self.index_issues(knowledge_base_id, project_id, source, &mut summary)
            .await;

        let totals = KbTotals {
            documents: self.store.count_indexed(knowledge_base_id).await?,
            chunks: self.store.count_chunks(knowledge_base_id).await?,
        };
        self.store
            .complete_run(knowledge_base_id, totals)
            .await
            .context("Failed to finalize knowledge base")?;

        summary.total_documents = totals.documents;
        summary.total_chunks = totals.chunks;
        summary.elapsed = started.elapsed();

        info!(
            kb = knowledge_base_id,
            phase = 4,
            wikis = summary.wikis,
            merge_requests = summary.merge_requests,
            issues = summary.issues,
            skipped = summary.skipped,
            failed = summary.failed,
            new_chunks = summary.new_chunks,
            documents = totals.documents,
            chunks = totals.chunks,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "ingestion completed"
        );
        Ok(summary)
    }

    /// Ledger lookup that fails open: an error means "not indexed".
    async fn already_indexed(&self, kb: &str, resource_type: ResourceType, id: &str) -> bool {
        match self.store.is_indexed(kb, resource_type, id).await {
            Ok(indexed) => indexed,
            Err(e) => {
                warn!(kb, resource = %format!("{}:{}", resource_type, id), error = %e, "ledger lookup failed, reprocessing");
                false
            }
        }
    }

    /// Embed and store one resource's chunks as a single batch.
    async fn store_unit(&self, kb: &str, pending: Vec<PendingChunk>) -> Result<usize> {
        if pending.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = pending.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_all(&texts).await?;
        let chunks: Vec<DocumentChunk> = pending
            .into_iter()
            .zip(vectors)
            .map(|(p, v)| p.with_embedding(kb, v))
            .collect();
        self.store.store_chunks(&chunks).await
    }

    /// Store the unit, then write the ledger entry.
    async fn commit_resource(
        &self,
        kb: &str,
        resource_type: ResourceType,
        resource_id: &str,
        pending: Vec<PendingChunk>,
        external_updated_at: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let stored = self.store_unit(kb, pending).await?;
        self.store
            .mark_indexed(kb, resource_type, resource_id, external_updated_at)
            .await?;
        Ok(stored)
    }

    fn record(
        summary: &mut RunSummary,
        kb: &str,
        resource_type: ResourceType,
        resource_id: &str,
        outcome: Result<usize>,
    ) -> bool {
        match outcome {
            Ok(stored) => {
                summary.new_chunks += stored;
                info!(kb, resource = %format!("{}:{}", resource_type, resource_id), chunks = stored, "indexed");
                true
            }
            Err(e) => {
                summary.failed += 1;
                warn!(kb, resource = %format!("{}:{}", resource_type, resource_id), error = %format!("{:#}", e), "resource failed, skipping");
                false
            }
        }
    }

    // ── Phase 1 ──

    async fn index_wikis(
        &self,
        kb: &str,
        project_id: &str,
        source: &dyn SourceCollaborator,
        summary: &mut RunSummary,
    ) {
        let pages = match source.list_wiki_pages(project_id).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(kb, phase = 1, error = %e, "wiki pages unavailable, skipping phase");
                return;
            }
        };
        info!(kb, phase = 1, count = pages.len(), "indexing wiki pages");

        for page in &pages {
            if self.already_indexed(kb, ResourceType::Wiki, &page.slug).await {
                summary.skipped += 1;
                continue;
            }
            let outcome = self.index_wiki_page(kb, project_id, source, page).await;
            if Self::record(summary, kb, ResourceType::Wiki, &page.slug, outcome) {
                summary.wikis += 1;
            }
        }
    }

    async fn index_wiki_page(
        &self,
        kb: &str,
        project_id: &str,
        source: &dyn SourceCollaborator,
        page: &WikiPageSummary,
    ) -> Result<usize> {
        let full = source
            .get_wiki_page(project_id, &page.slug)
            .await
            .with_context(|| format!("Could not fetch wiki page '{}'", page.title))?;

        let url = format!("{}/wikis/{}", source.base_url(), full.slug);
        let metadata = json!({
            "title": page.title,
            "format": page.format.as_deref().or(full.format.as_deref()),
        });
        let pending = split_into_chunks(full.content.as_deref().unwrap_or(""), &self.chunking)
            .into_iter()
            .enumerate()
            .map(|(i, content)| PendingChunk {
                source_type: SourceType::Wiki,
                source_id: page.slug.clone(),
                source_url: Some(url.clone()),
                chunk_index: i as i64,
                content,
                metadata: metadata.clone(),
            })
            .collect();

        self.commit_resource(kb, ResourceType::Wiki, &page.slug, pending, None)
            .await
    }

    // ── Phase 2 ──

    async fn index_merge_requests(
        &self,
        kb: &str,
        project_id: &str,
        source: &dyn SourceCollaborator,
        summary: &mut RunSummary,
    ) {
        let merge_requests = match source
            .list_merge_requests(project_id, &self.settings.merge_request_state)
            .await
        {
            Ok(mrs) => mrs,
            Err(e) => {
                warn!(kb, phase = 2, error = %e, "merge requests unavailable, skipping phase");
                return;
            }
        };
        let limit = self.settings.merge_request_limit;
        info!(kb, phase = 2, found = merge_requests.len(), limit, "indexing merge requests");

        for mr in merge_requests.iter().take(limit) {
            let doc = ThreadDoc::merge_request(mr);
            if self.already_indexed(kb, doc.resource_type, &doc.id).await {
                summary.skipped += 1;
                continue;
            }
            let notes = source.get_merge_request_comments(project_id, mr.iid).await;
            let outcome = self.index_thread(kb, &doc, notes).await;
            if Self::record(summary, kb, doc.resource_type, &doc.id, outcome) {
                summary.merge_requests += 1;
            }
        }
    }

    // ── Phase 3 ──

    async fn index_issues(
        &self,
        kb: &str,
        project_id: &str,
        source: &dyn SourceCollaborator,
        summary: &mut RunSummary,
    ) {
        let issues = match source.list_issues(project_id).await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(kb, phase = 3, error = %e, "issues unavailable, skipping phase");
                return;
            }
        };
        info!(kb, phase = 3, count = issues.len(), "indexing issues");

        for issue in &issues {
            let doc = ThreadDoc::issue(issue);
            if self.already_indexed(kb, doc.resource_type, &doc.id).await {
                summary.skipped += 1;
                continue;
            }
            let notes = source.get_issue_comments(project_id, issue.iid).await;
            let outcome = self.index_thread(kb, &doc, notes).await;
            if Self::record(summary, kb, doc.resource_type, &doc.id, outcome) {
                summary.issues += 1;
            }
        }
    }

    async fn index_thread(
        &self,
        kb: &str,
        doc: &ThreadDoc,
        notes: Result<Vec<Note>, SourceError>,
    ) -> Result<usize> {
        let notes = match notes {
            Ok(notes) => notes,
            Err(e) => {
                warn!(kb, resource = %format!("{}:{}", doc.resource_type, doc.id), error = %e, "comments unavailable, indexing body only");
                Vec::new()
            }
        };
        let pending = thread_chunks(
            doc,
            &notes,
            &self.chunking,
            self.settings.min_comment_chars,
        );
        self.commit_resource(kb, doc.resource_type, &doc.id, pending, doc.updated_at)
            .await
    }
}

/// A merge request or issue flattened into the shape both phases share.
struct ThreadDoc {
    resource_type: ResourceType,
    body_type: SourceType,
    comment_type: SourceType,
    id: String,
    title: String,
    description: Option<String>,
    state: String,
    web_url: Option<String>,
    metadata: Value,
    updated_at: Option<DateTime<Utc>>,
}

impl ThreadDoc {
    fn merge_request(mr: &MergeRequest) -> Self {
        Self {
            resource_type: ResourceType::MergeRequest,
            body_type: SourceType::MergeRequest,
            comment_type: SourceType::MergeRequestComment,
            id: mr.iid.to_string(),
            title: mr.title.clone(),
            description: mr.description.clone(),
            state: mr.state.clone(),
            web_url: mr.web_url.clone(),
            metadata: json!({
                "title": mr.title,
                "author": mr.author.as_ref().and_then(|a| a.name.clone()),
                "merged_at": mr.merged_at,
            }),
            updated_at: mr.updated_at,
        }
    }

    fn issue(issue: &Issue) -> Self {
        Self {
            resource_type: ResourceType::Issue,
            body_type: SourceType::Issue,
            comment_type: SourceType::IssueComment,
            id: issue.iid.to_string(),
            title: issue.title.clone(),
            description: issue.description.clone(),
            state: issue.state.clone(),
            web_url: issue.web_url.clone(),
            metadata: json!({
                "title": issue.title,
                "author": issue.author.as_ref().and_then(|a| a.name.clone()),
                "state": issue.state,
            }),
            updated_at: issue.updated_at,
        }
    }

    fn document(&self) -> String {
        let description = match self.description.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ => "No description",
        };
        format!(
            "Title: {}\n\nDescription: {}\n\nState: {}",
            self.title, description, self.state
        )
    }
}

/// Body chunks followed by one chunk per comment longer than
/// `min_comment_chars`.
fn thread_chunks(
    doc: &ThreadDoc,
    notes: &[Note],
    options: &ChunkOptions,
    min_comment_chars: usize,
) -> Vec<PendingChunk> {
    let body = split_into_chunks(&doc.document(), options)
        .into_iter()
        .enumerate()
        .map(|(i, content)| PendingChunk {
            source_type: doc.body_type,
            source_id: doc.id.clone(),
            source_url: doc.web_url.clone(),
            chunk_index: i as i64,
            content,
            metadata: doc.metadata.clone(),
        });

    let comments = notes.iter().filter_map(|note| {
        let text = note.body.as_deref()?;
        if text.chars().count() <= min_comment_chars {
            return None;
        }
        Some(PendingChunk {
            source_type: doc.comment_type,
            source_id: format!("{}-comment-{}", doc.id, note.id),
            source_url: doc.web_url.clone(),
            chunk_index: 0,
            content: text.to_string(),
            metadata: json!({
                "title": format!("Comment on: {}", doc.title),
                "author": note.author_name(),
            }),
        })
    });

    body.chain(comments).collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Job model
// ═══════════════════════════════════════════════════════════════════════

/// A triggered ingestion run.
pub struct IngestJob {
    pub config_id: String,
    handle: JoinHandle<Result<RunSummary>>,
}

impl IngestJob {
    /// Wait for the background run to finish.
    pub async fn wait(self) -> Result<RunSummary> {
        self.handle
            .await
            .map_err(|e| anyhow!("ingestion supervisor failed: {}", e))?
    }
}

#[derive(Clone)]
pub struct IngestService {
    pipeline: Arc<IngestPipeline>,
}

impl IngestService {
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self { pipeline }
    }

    /// Run phase 0 and start phases 1–4 in the background.
    ///
    /// Two runs for the same (workspace, project) are not serialized; the
    /// ledger keeps a concurrent double run correct, only wasteful.
    pub async fn trigger(
        &self,
        workspace_id: &str,
        project_id: &str,
        source: Arc<dyn SourceCollaborator>,
    ) -> Result<IngestJob> {
        let config = self
            .pipeline
            .store
            .open_run(workspace_id, project_id)
            .await
            .context("Failed to open knowledge base")?;
        info!(kb = %config.id, workspace = workspace_id, project = project_id, phase = 0, "knowledge base processing");

        let kb_id = config.id.clone();
        let project = project_id.to_string();
        let pipeline = self.pipeline.clone();
        let store = self.pipeline.store.clone();

        let handle = tokio::spawn(async move {
            let run_kb = kb_id.clone();
            let run = tokio::spawn(async move {
                pipeline.run(&run_kb, &project, source.as_ref()).await
            });

            let outcome = match run.await {
                Ok(result) => result,
                Err(join_err) => Err(anyhow!("ingestion task panicked: {}", join_err)),
            };

            if let Err(e) = &outcome {
                let message = format!("{:#}", e);
                error!(kb = %kb_id, error = %message, "ingestion failed");
                if let Err(mark_err) = store.fail_run(&kb_id, &message).await {
                    error!(kb = %kb_id, error = %mark_err, "could not record failure");
                }
            }
            outcome
        });

        Ok(IngestJob {
            config_id: config.id,
            handle,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Status query
// ═══════════════════════════════════════════════════════════════════════

pub enum StatusQuery {
    Config(String),
    Workspace(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseStatus {
    pub id: String,
    pub workspace_id: String,
    pub project_id: String,
    pub enabled: bool,
    pub status: KbStatus,
    pub total_documents: i64,
    pub total_chunks: i64,
    pub last_indexed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Look up a knowledge base by config ID or by workspace.
pub async fn status(store: &dyn Store, query: &StatusQuery) -> Result<Option<KnowledgeBaseStatus>> {
    let config = match query {
        StatusQuery::Config(id) => store.get_knowledge_base(id).await?,
        StatusQuery::Workspace(ws) => store.find_by_workspace(ws).await?,
    };
    Ok(config.map(|c| KnowledgeBaseStatus {
        id: c.id,
        workspace_id: c.workspace_id,
        project_id: c.project_id,
        enabled: c.enabled,
        status: c.status,
        total_documents: c.total_documents,
        total_chunks: c.total_chunks,
        last_indexed_at: c.last_indexed_at,
        error: c.error_message,
    }))
}
