//! SQLite-backed storage.
//!
//! Implements the knowledge-base registry, the vector store, and the
//! resource ledger from `knowdesk_core::store` against the schema created
//! by [`crate::migrate`]. Embeddings are stored as little-endian f32 BLOBs
//! next to their chunk text; retrieval loads them back for a full scan.

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use knowdesk_core::embedding::{blob_to_vec, vec_to_blob};
use knowdesk_core::models::{
    DocumentChunk, KbStatus, KbTotals, KnowledgeBaseConfig, ResourceType, SourceType,
};
use knowdesk_core::store::{validate_batch, ChunkStore, KnowledgeBaseStore, ResourceLedger};

/// SQLite implementation of the storage traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_ts(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| anyhow!("timestamp out of range: {}", ts))
}

const CONFIG_COLUMNS: &str = "id, workspace_id, project_id, enabled, status, total_documents, \
     total_chunks, last_indexed_at, error_message, created_at, updated_at";

fn row_to_config(row: &SqliteRow) -> Result<KnowledgeBaseConfig> {
    let status: String = row.try_get("status")?;
    let last_indexed_at: Option<i64> = row.try_get("last_indexed_at")?;
    Ok(KnowledgeBaseConfig {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        project_id: row.try_get("project_id")?,
        enabled: row.try_get("enabled")?,
        status: status.parse()?,
        total_documents: row.try_get("total_documents")?,
        total_chunks: row.try_get("total_chunks")?,
        last_indexed_at: last_indexed_at.map(from_ts).transpose()?,
        error_message: row.try_get("error_message")?,
        created_at: from_ts(row.try_get("created_at")?)?,
        updated_at: from_ts(row.try_get("updated_at")?)?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<DocumentChunk> {
    let source_type: String = row.try_get("source_type")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let id: String = row.try_get("id")?;
    Ok(DocumentChunk {
        id: id.clone(),
        knowledge_base_id: row.try_get("knowledge_base_id")?,
        source_type: source_type.parse::<SourceType>()?,
        source_id: row.try_get("source_id")?,
        source_url: row.try_get("source_url")?,
        chunk_index: row.try_get("chunk_index")?,
        content: row.try_get("content")?,
        embedding: blob_to_vec(&blob),
        metadata: serde_json::from_str(&metadata_json)
            .with_context(|| format!("corrupt metadata for chunk {}", id))?,
    })
}

#[async_trait]
impl KnowledgeBaseStore for SqliteStore {
    async fn open_run(&self, workspace_id: &str, project_id: &str) -> Result<KnowledgeBaseConfig> {
        let fresh = KnowledgeBaseConfig::new_processing(workspace_id, project_id);
        let now = fresh.created_at.timestamp();

        sqlx::query(
            r#"
            INSERT INTO knowledge_bases (id, workspace_id, project_id, enabled, status,
                                         total_documents, total_chunks, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, 0, 0, ?, ?)
            ON CONFLICT(workspace_id, project_id) DO UPDATE SET
                enabled = 1,
                status = excluded.status,
                error_message = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&fresh.id)
        .bind(workspace_id)
        .bind(project_id)
        .bind(KbStatus::Processing.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge_bases WHERE workspace_id = ? AND project_id = ?",
            CONFIG_COLUMNS
        ))
        .bind(workspace_id)
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        row_to_config(&row)
    }

    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBaseConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge_bases WHERE id = ?",
            CONFIG_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_config).transpose()
    }

    async fn find_by_workspace(&self, workspace_id: &str) -> Result<Option<KnowledgeBaseConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge_bases WHERE workspace_id = ? \
             ORDER BY updated_at DESC, created_at DESC LIMIT 1",
            CONFIG_COLUMNS
        ))
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_config).transpose()
    }

    async fn complete_run(&self, id: &str, totals: KbTotals) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE knowledge_bases
            SET status = ?, total_documents = ?, total_chunks = ?,
                last_indexed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(KbStatus::Completed.as_str())
        .bind(totals.documents)
        .bind(totals.chunks)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_run(&self, id: &str, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE knowledge_bases SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(KbStatus::Failed.as_str())
        .bind(message)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge_bases WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn store_chunks(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let kb_id = match chunks.first() {
            Some(c) => c.knowledge_base_id.as_str(),
            None => return Ok(0),
        };

        let mut tx = self.pool.begin().await?;

        let existing_dims: Option<i64> = sqlx::query_scalar(
            "SELECT dims FROM document_chunks WHERE knowledge_base_id = ? LIMIT 1",
        )
        .bind(kb_id)
        .fetch_optional(&mut *tx)
        .await?;
        validate_batch(chunks, existing_dims.map(|d| d as usize))?;

        let sources: BTreeSet<(&str, &str)> = chunks
            .iter()
            .map(|c| (c.source_type.as_str(), c.source_id.as_str()))
            .collect();
        for (source_type, source_id) in sources {
            sqlx::query(
                "DELETE FROM document_chunks WHERE knowledge_base_id = ? AND source_type = ? AND source_id = ?",
            )
            .bind(kb_id)
            .bind(source_type)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        }

        let now = Utc::now().timestamp();
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (id, knowledge_base_id, source_type, source_id,
                                             source_url, chunk_index, content, embedding,
                                             dims, metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.knowledge_base_id)
            .bind(chunk.source_type.as_str())
            .bind(&chunk.source_id)
            .bind(&chunk.source_url)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(chunk.embedding.len() as i64)
            .bind(chunk.metadata.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert chunk {} of {} '{}'",
                    chunk.chunk_index, chunk.source_type, chunk.source_id
                )
            })?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn load_chunks(&self, knowledge_base_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, knowledge_base_id, source_type, source_id, source_url,
                   chunk_index, content, embedding, metadata_json
            FROM document_chunks
            WHERE knowledge_base_id = ?
            ORDER BY created_at ASC, source_type ASC, source_id ASC, chunk_index ASC
            "#,
        )
        .bind(knowledge_base_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn count_chunks(&self, knowledge_base_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE knowledge_base_id = ?")
                .bind(knowledge_base_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl ResourceLedger for SqliteStore {
    async fn is_indexed(
        &self,
        knowledge_base_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM indexed_resources
            WHERE knowledge_base_id = ? AND resource_type = ? AND resource_id = ?
            "#,
        )
        .bind(knowledge_base_id)
        .bind(resource_type.as_str())
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn mark_indexed(
        &self,
        knowledge_base_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
        external_updated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexed_resources (knowledge_base_id, resource_type, resource_id,
                                           indexed_at, external_updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(knowledge_base_id, resource_type, resource_id) DO UPDATE SET
                indexed_at = excluded.indexed_at,
                external_updated_at = excluded.external_updated_at
            "#,
        )
        .bind(knowledge_base_id)
        .bind(resource_type.as_str())
        .bind(resource_id)
        .bind(Utc::now().timestamp())
        .bind(external_updated_at.map(|dt| dt.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_indexed(&self, knowledge_base_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM indexed_resources WHERE knowledge_base_id = ?",
        )
        .bind(knowledge_base_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
