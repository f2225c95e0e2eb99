//! In-memory [`Store`](super::Store) implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Every write takes a
//! single lock, so chunk batches become visible all at once, mirroring the
//! transactional behavior of the SQLite backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    DocumentChunk, IndexedResource, KbStatus, KbTotals, KnowledgeBaseConfig, ResourceType,
};

use super::{validate_batch, ChunkStore, KnowledgeBaseStore, ResourceLedger};

type LedgerKey = (String, ResourceType, String);

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    configs: RwLock<HashMap<String, KnowledgeBaseConfig>>,
    chunks: RwLock<Vec<DocumentChunk>>,
    ledger: RwLock<HashMap<LedgerKey, IndexedResource>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the ledger entries for a knowledge base.
    pub fn ledger_entries(&self, knowledge_base_id: &str) -> Result<Vec<IndexedResource>> {
        Ok(read(&self.ledger)?
            .values()
            .filter(|r| r.knowledge_base_id == knowledge_base_id)
            .cloned()
            .collect())
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn update_config<F>(store: &InMemoryStore, id: &str, f: F) -> Result<()>
where
    F: FnOnce(&mut KnowledgeBaseConfig),
{
    let mut configs = write(&store.configs)?;
    let cfg = configs
        .get_mut(id)
        .ok_or_else(|| anyhow!("knowledge base {} not found", id))?;
    f(cfg);
    cfg.updated_at = Utc::now();
    Ok(())
}

#[async_trait]
impl KnowledgeBaseStore for InMemoryStore {
    async fn open_run(&self, workspace_id: &str, project_id: &str) -> Result<KnowledgeBaseConfig> {
        let mut configs = write(&self.configs)?;
        let existing = configs
            .values_mut()
            .find(|c| c.workspace_id == workspace_id && c.project_id == project_id);

        if let Some(cfg) = existing {
            cfg.enabled = true;
            cfg.status = KbStatus::Processing;
            cfg.error_message = None;
            cfg.updated_at = Utc::now();
            return Ok(cfg.clone());
        }

        let cfg = KnowledgeBaseConfig::new_processing(workspace_id, project_id);
        configs.insert(cfg.id.clone(), cfg.clone());
        Ok(cfg)
    }

    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBaseConfig>> {
        Ok(read(&self.configs)?.get(id).cloned())
    }

    async fn find_by_workspace(&self, workspace_id: &str) -> Result<Option<KnowledgeBaseConfig>> {
        Ok(read(&self.configs)?
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn complete_run(&self, id: &str, totals: KbTotals) -> Result<()> {
        update_config(self, id, |cfg| {
            cfg.status = KbStatus::Completed;
            cfg.total_documents = totals.documents;
            cfg.total_chunks = totals.chunks;
            cfg.last_indexed_at = Some(Utc::now());
        })
    }

    async fn fail_run(&self, id: &str, message: &str) -> Result<()> {
        update_config(self, id, |cfg| {
            cfg.status = KbStatus::Failed;
            cfg.error_message = Some(message.to_string());
        })
    }

    async fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
        let removed = write(&self.configs)?.remove(id).is_some();
        write(&self.chunks)?.retain(|c| c.knowledge_base_id != id);
        write(&self.ledger)?.retain(|(kb, _, _), _| kb != id);
        Ok(removed)
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn store_chunks(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let mut stored = write(&self.chunks)?;
        let kb_id = chunks[0].knowledge_base_id.as_str();
        let existing_dims = stored
            .iter()
            .find(|c| c.knowledge_base_id == kb_id)
            .map(|c| c.embedding.len());
        validate_batch(chunks, existing_dims)?;

        stored.retain(|old| {
            old.knowledge_base_id != kb_id
                || !chunks
                    .iter()
                    .any(|c| c.source_type == old.source_type && c.source_id == old.source_id)
        });
        stored.extend(chunks.iter().cloned());
        Ok(chunks.len())
    }

    async fn load_chunks(&self, knowledge_base_id: &str) -> Result<Vec<DocumentChunk>> {
        Ok(read(&self.chunks)?
            .iter()
            .filter(|c| c.knowledge_base_id == knowledge_base_id)
            .cloned()
            .collect())
    }

    async fn count_chunks(&self, knowledge_base_id: &str) -> Result<i64> {
        Ok(read(&self.chunks)?
            .iter()
            .filter(|c| c.knowledge_base_id == knowledge_base_id)
            .count() as i64)
    }
}

#[async_trait]
impl ResourceLedger for InMemoryStore {
    async fn is_indexed(
        &self,
        knowledge_base_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool> {
        let key = (
            knowledge_base_id.to_string(),
            resource_type,
            resource_id.to_string(),
        );
        Ok(read(&self.ledger)?.contains_key(&key))
    }

    async fn mark_indexed(
        &self,
        knowledge_base_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
        external_updated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let key = (
            knowledge_base_id.to_string(),
            resource_type,
            resource_id.to_string(),
        );
        write(&self.ledger)?.insert(
            key,
            IndexedResource {
                knowledge_base_id: knowledge_base_id.to_string(),
                resource_type,
                resource_id: resource_id.to_string(),
                indexed_at: Utc::now(),
                external_updated_at,
            },
        );
        Ok(())
    }

    async fn count_indexed(&self, knowledge_base_id: &str) -> Result<i64> {
        Ok(read(&self.ledger)?
            .keys()
            .filter(|(kb, _, _)| kb == knowledge_base_id)
            .count() as i64)
    }
}
