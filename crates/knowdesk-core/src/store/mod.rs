//! Storage abstraction for knowdesk.
//!
//! Three traits cover everything the pipeline and the retrieval engine
//! persist, enabling pluggable backends (SQLite in the app crate,
//! [`memory::InMemoryStore`] for tests):
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`KnowledgeBaseStore`] | Knowledge-base configs and run status |
//! | [`ChunkStore`] | Embedded chunks (the vector store) |
//! | [`ResourceLedger`] | Idempotency record of indexed resources |
//!
//! [`Store`] is implemented for anything that provides all three.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashSet;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{DocumentChunk, KbTotals, KnowledgeBaseConfig, ResourceType, SourceType};

/// Knowledge-base configs and their run lifecycle.
#[async_trait]
pub trait KnowledgeBaseStore: Send + Sync {
    /// Create the config for `(workspace_id, project_id)` or reuse the
    /// existing one, then mark it enabled and `processing`.
    async fn open_run(&self, workspace_id: &str, project_id: &str) -> Result<KnowledgeBaseConfig>;

    /// Fetch a config by ID.
    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBaseConfig>>;

    /// Fetch the most recently updated config for a workspace.
    async fn find_by_workspace(&self, workspace_id: &str) -> Result<Option<KnowledgeBaseConfig>>;

    /// Record totals, set `completed`, and stamp `last_indexed_at`.
    async fn complete_run(&self, id: &str, totals: KbTotals) -> Result<()>;

    /// Set `failed` with the captured message.
    async fn fail_run(&self, id: &str, message: &str) -> Result<()>;

    /// Delete a config together with its chunks and ledger entries.
    ///
    /// Returns `false` if no such config existed.
    async fn delete_knowledge_base(&self, id: &str) -> Result<bool>;
}

/// Durable chunk + embedding + metadata storage.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Write a batch of chunks atomically.
    ///
    /// Any chunks previously stored for the same `(source_type, source_id)`
    /// pairs are replaced within the same write, so a resource re-processed
    /// after an interrupted run never ends up with duplicate indices.
    /// Returns the number of chunks written.
    async fn store_chunks(&self, chunks: &[DocumentChunk]) -> Result<usize>;

    /// Load every chunk of a knowledge base (full scan).
    async fn load_chunks(&self, knowledge_base_id: &str) -> Result<Vec<DocumentChunk>>;

    /// Count stored chunks of a knowledge base.
    async fn count_chunks(&self, knowledge_base_id: &str) -> Result<i64>;
}

/// Idempotency ledger: which source resources are fully stored.
#[async_trait]
pub trait ResourceLedger: Send + Sync {
    /// Whether the resource already has a ledger entry.
    ///
    /// Callers decide what a lookup error means; the ingestion pipeline
    /// treats it as "not indexed".
    async fn is_indexed(
        &self,
        knowledge_base_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool>;

    /// Upsert a ledger entry. Repeat calls refresh `indexed_at`.
    async fn mark_indexed(
        &self,
        knowledge_base_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
        external_updated_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Count ledger entries of a knowledge base.
    async fn count_indexed(&self, knowledge_base_id: &str) -> Result<i64>;
}

/// A complete storage backend.
pub trait Store: KnowledgeBaseStore + ChunkStore + ResourceLedger {}

impl<T: KnowledgeBaseStore + ChunkStore + ResourceLedger> Store for T {}

/// Validate a chunk batch before it is written.
///
/// All chunks must belong to one knowledge base, carry non-empty vectors of
/// one length, and match `existing_dims` (the dimensionality already stored
/// for that knowledge base, if any). Returns the knowledge base ID.
pub fn validate_batch(chunks: &[DocumentChunk], existing_dims: Option<usize>) -> Result<&str> {
    let first = match chunks.first() {
        Some(c) => c,
        None => bail!("empty chunk batch"),
    };
    let dims = first.embedding.len();
    if dims == 0 {
        bail!(
            "chunk {}#{} has an empty embedding",
            first.source_id,
            first.chunk_index
        );
    }

    let mut seen: HashSet<(SourceType, &str, i64)> = HashSet::new();
    for c in chunks {
        if c.knowledge_base_id != first.knowledge_base_id {
            bail!("chunk batch spans multiple knowledge bases");
        }
        if c.embedding.len() != dims {
            bail!(
                "embedding dimensionality mismatch within batch: {} vs {}",
                c.embedding.len(),
                dims
            );
        }
        if !seen.insert((c.source_type, c.source_id.as_str(), c.chunk_index)) {
            bail!(
                "duplicate chunk index {} for {} '{}'",
                c.chunk_index,
                c.source_type,
                c.source_id
            );
        }
    }

    if let Some(existing) = existing_dims {
        if existing != dims {
            bail!(
                "embedding dimensionality {} does not match knowledge base dimensionality {}",
                dims,
                existing
            );
        }
    }

    Ok(&first.knowledge_base_id)
}
