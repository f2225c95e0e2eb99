//! Source collaborator abstraction.
//!
//! The ingestion pipeline reads project artifacts through the read-only
//! [`SourceCollaborator`] trait. Every call may be slow, rate limited, or
//! unavailable (a project without wikis answers 403/404); the pipeline treats
//! each [`SourceError`] as non-fatal and skips at resource granularity.
//!
//! [`crate::gitlab::GitLabClient`] is the production implementation. Tests
//! substitute in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("source transport error: {0}")]
    Transport(String),

    #[error("could not decode source response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// An entry of the wiki listing (no content).
#[derive(Debug, Clone, Deserialize)]
pub struct WikiPageSummary {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WikiPage {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    pub iid: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub iid: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A comment on a merge request or issue.
#[derive(Debug, Clone, Deserialize)]
pub struct Note {
    pub id: i64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub author: Option<Author>,
}

impl Note {
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().and_then(|a| a.name.as_deref())
    }
}

/// Read-only access to a project's wikis, merge requests, and issues.
#[async_trait]
pub trait SourceCollaborator: Send + Sync {
    /// Base web URL of the source, used to build wiki page links.
    fn base_url(&self) -> &str;

    async fn list_wiki_pages(&self, project_id: &str) -> Result<Vec<WikiPageSummary>, SourceError>;

    async fn get_wiki_page(&self, project_id: &str, slug: &str) -> Result<WikiPage, SourceError>;

    /// Merge requests in `state`, most recent first.
    async fn list_merge_requests(
        &self,
        project_id: &str,
        state: &str,
    ) -> Result<Vec<MergeRequest>, SourceError>;

    async fn get_merge_request_comments(
        &self,
        project_id: &str,
        merge_request_iid: i64,
    ) -> Result<Vec<Note>, SourceError>;

    /// Open issues.
    async fn list_issues(&self, project_id: &str) -> Result<Vec<Issue>, SourceError>;

    async fn get_issue_comments(
        &self,
        project_id: &str,
        issue_iid: i64,
    ) -> Result<Vec<Note>, SourceError>;
}
