//! GitLab REST API source collaborator.
//!
//! Reads wikis, merge requests, issues, and their notes from
//! `{url}/api/v4/projects/:id/...` with a `PRIVATE-TOKEN` header. Listings
//! request `per_page=100` and read only the first page. Project IDs and
//! wiki slugs are percent-encoded as single path segments, so a
//! `group/project` path works as a project ID.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::GitLabConfig;
use crate::source::{
    Issue, MergeRequest, Note, SourceCollaborator, SourceError, WikiPage, WikiPageSummary,
};

const PER_PAGE: &str = "100";

pub struct GitLabClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitLabClient {
    pub fn new(base_url: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("knowdesk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Build a client from config, preferring an explicit token over the
    /// environment variable named by `gitlab.token_env`.
    pub fn from_config(config: &GitLabConfig, token: Option<String>) -> Result<Self> {
        let token = match token.or_else(|| std::env::var(&config.token_env).ok()) {
            Some(t) if !t.is_empty() => t,
            _ => bail!(
                "No GitLab token: pass --token or set {}",
                config.token_env
            ),
        };
        Self::new(&config.url, &token, config.timeout_secs)
    }

    fn project_url(
        &self,
        project_id: &str,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SourceError::Transport(format!("invalid GitLab URL: {}", e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SourceError::Transport("GitLab URL cannot be a base".into()))?;
            path.pop_if_empty()
                .extend(["api", "v4", "projects", project_id])
                .extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        debug!(url = %url, "GitLab GET");
        let response = self
            .client
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SourceCollaborator for GitLabClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_wiki_pages(&self, project_id: &str) -> Result<Vec<WikiPageSummary>, SourceError> {
        let url = self.project_url(project_id, &["wikis"], &[("per_page", PER_PAGE)])?;
        self.get_json(url).await
    }

    async fn get_wiki_page(&self, project_id: &str, slug: &str) -> Result<WikiPage, SourceError> {
        let url = self.project_url(project_id, &["wikis", slug], &[])?;
        self.get_json(url).await
    }

    async fn list_merge_requests(
        &self,
        project_id: &str,
        state: &str,
    ) -> Result<Vec<MergeRequest>, SourceError> {
        let url = self.project_url(
            project_id,
            &["merge_requests"],
            &[("state", state), ("per_page", PER_PAGE)],
        )?;
        self.get_json(url).await
    }

    async fn get_merge_request_comments(
        &self,
        project_id: &str,
        merge_request_iid: i64,
    ) -> Result<Vec<Note>, SourceError> {
        let iid = merge_request_iid.to_string();
        let url = self.project_url(
            project_id,
            &["merge_requests", &iid, "notes"],
            &[("per_page", PER_PAGE)],
        )?;
        self.get_json(url).await
    }

    async fn list_issues(&self, project_id: &str) -> Result<Vec<Issue>, SourceError> {
        let url = self.project_url(
            project_id,
            &["issues"],
            &[("state", "opened"), ("per_page", PER_PAGE)],
        )?;
        self.get_json(url).await
    }

    async fn get_issue_comments(
        &self,
        project_id: &str,
        issue_iid: i64,
    ) -> Result<Vec<Note>, SourceError> {
        let iid = issue_iid.to_string();
        let url = self.project_url(
            project_id,
            &["issues", &iid, "notes"],
            &[("per_page", PER_PAGE)],
        )?;
        self.get_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitLabClient {
        GitLabClient::new("https://gitlab.example.com/", "glpat-test", 5).unwrap()
    }

    #[test]
    fn test_listing_url() {
        let url = client()
            .project_url("42", &["merge_requests"], &[("state", "merged"), ("per_page", "100")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/42/merge_requests?state=merged&per_page=100"
        );
    }

    #[test]
    fn test_namespaced_project_and_slug_are_encoded() {
        let url = client()
            .project_url("group/app", &["wikis", "design/overview"], &[])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/group%2Fapp/wikis/design%2Foverview"
        );
    }

    #[test]
    fn test_base_url_trimmed() {
        assert_eq!(client().base_url(), "https://gitlab.example.com");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(GitLabClient::new("not a url", "t", 5).is_err());
    }

    #[test]
    fn test_decode_gitlab_payloads() {
        let mrs: Vec<MergeRequest> = serde_json::from_str(
            r#"[{"id": 901, "iid": 12, "title": "Add retries", "description": null,
                 "state": "merged", "web_url": "https://gitlab.example.com/g/a/-/merge_requests/12",
                 "author": {"name": "Sam Doe", "username": "sdoe"},
                 "merged_at": "2024-03-01T10:00:00.000Z", "updated_at": "2024-03-01T10:05:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(mrs[0].iid, 12);
        assert!(mrs[0].description.is_none());
        assert!(mrs[0].merged_at.is_some());

        let notes: Vec<Note> =
            serde_json::from_str(r#"[{"id": 5, "body": "LGTM", "author": {"name": "Kim"}}]"#)
                .unwrap();
        assert_eq!(notes[0].author_name(), Some("Kim"));
    }
}
