//! Core data models for knowledge bases, chunks, and the indexing ledger.
//!
//! These types flow between the ingestion pipeline, the storage backends,
//! and the retrieval engine. Nothing here performs I/O.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a knowledge base's most recent ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbStatus {
    Uninitialized,
    Processing,
    Completed,
    Failed,
}

impl KbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KbStatus::Uninitialized => "uninitialized",
            KbStatus::Processing => "processing",
            KbStatus::Completed => "completed",
            KbStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for KbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KbStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "uninitialized" => Ok(KbStatus::Uninitialized),
            "processing" => Ok(KbStatus::Processing),
            "completed" => Ok(KbStatus::Completed),
            "failed" => Ok(KbStatus::Failed),
            other => bail!("Unknown knowledge base status: '{}'", other),
        }
    }
}

/// Where a stored chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Wiki,
    MergeRequest,
    MergeRequestComment,
    Issue,
    IssueComment,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Wiki => "wiki",
            SourceType::MergeRequest => "merge_request",
            SourceType::MergeRequestComment => "merge_request_comment",
            SourceType::Issue => "issue",
            SourceType::IssueComment => "issue_comment",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "wiki" => Ok(SourceType::Wiki),
            "merge_request" => Ok(SourceType::MergeRequest),
            "merge_request_comment" => Ok(SourceType::MergeRequestComment),
            "issue" => Ok(SourceType::Issue),
            "issue_comment" => Ok(SourceType::IssueComment),
            other => bail!("Unknown source type: '{}'", other),
        }
    }
}

/// The unit of idempotency tracked by the ledger.
///
/// Comments are never tracked on their own: they are stored together with
/// their parent merge request or issue and share its ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Wiki,
    MergeRequest,
    Issue,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Wiki => "wiki",
            ResourceType::MergeRequest => "merge_request",
            ResourceType::Issue => "issue",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "wiki" => Ok(ResourceType::Wiki),
            "merge_request" => Ok(ResourceType::MergeRequest),
            "issue" => Ok(ResourceType::Issue),
            other => bail!("Unknown resource type: '{}'", other),
        }
    }
}

/// Indexing state for one (workspace, external project) pair.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseConfig {
    pub id: String,
    pub workspace_id: String,
    pub project_id: String,
    pub enabled: bool,
    pub status: KbStatus,
    pub total_documents: i64,
    pub total_chunks: i64,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBaseConfig {
    /// A freshly created config, already marked as processing.
    pub fn new_processing(workspace_id: &str, project_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            project_id: project_id.to_string(),
            enabled: true,
            status: KbStatus::Processing,
            total_documents: 0,
            total_chunks: 0,
            last_indexed_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A chunk ready to be embedded: provenance plus text, no vector yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub source_type: SourceType,
    pub source_id: String,
    pub source_url: Option<String>,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: serde_json::Value,
}

impl PendingChunk {
    /// Attach an embedding, producing a storable chunk.
    pub fn with_embedding(self, knowledge_base_id: &str, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: uuid::Uuid::new_v4().to_string(),
            knowledge_base_id: knowledge_base_id.to_string(),
            source_type: self.source_type,
            source_id: self.source_id,
            source_url: self.source_url,
            chunk_index: self.chunk_index,
            content: self.content,
            embedding,
            metadata: self.metadata,
        }
    }
}

/// A stored, embedded chunk. Immutable once written.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: String,
    pub knowledge_base_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub source_url: Option<String>,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A ledger entry: proof that a source resource is fully stored.
#[derive(Debug, Clone)]
pub struct IndexedResource {
    pub knowledge_base_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub indexed_at: DateTime<Utc>,
    pub external_updated_at: Option<DateTime<Utc>>,
}

/// Cumulative counts written when a run finalizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KbTotals {
    pub documents: i64,
    pub chunks: i64,
}
