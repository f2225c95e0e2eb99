//! Shared fakes for the library-level integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use knowdesk::source::{
    Author, Issue, MergeRequest, Note, SourceCollaborator, SourceError, WikiPage, WikiPageSummary,
};
use knowdesk_core::completion::{ChatMessage, CompletionOptions, CompletionProvider};
use knowdesk_core::embedding::{EmbeddingProvider, ProviderError};

pub const DIMS: usize = 32;

/// Bag-of-words embedder: each lowercase word bumps one hashed bucket.
/// Identical texts get identical vectors.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            let mut h: u32 = 2166136261;
            for b in word.bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(16777619);
            }
            v[(h as usize) % DIMS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// [`HashEmbedder`] that rejects any batch containing `poison` with a
/// permanent API error.
pub struct PoisonedEmbedder {
    pub poison: String,
}

#[async_trait]
impl EmbeddingProvider for PoisonedEmbedder {
    fn model_name(&self) -> &str {
        "poisoned"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.iter().any(|t| t.contains(&self.poison)) {
            return Err(ProviderError::Api {
                status: 400,
                message: "input rejected".into(),
            });
        }
        Ok(texts.iter().map(|t| HashEmbedder::vector(t)).collect())
    }
}

/// Chat model that always answers with the same text and records prompts.
pub struct CannedModel {
    pub reply: String,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl CannedModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionProvider for CannedModel {
    fn model_name(&self) -> &str {
        "canned"
    }
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

/// In-memory GitLab project.
#[derive(Default)]
pub struct FakeGitLab {
    pub wikis: Vec<WikiPage>,
    pub merge_requests: Vec<MergeRequest>,
    pub issues: Vec<Issue>,
    pub mr_notes: HashMap<i64, Vec<Note>>,
    pub issue_notes: HashMap<i64, Vec<Note>>,
    /// Wiki slugs whose fetch fails.
    pub broken_wikis: Mutex<HashSet<String>>,
    pub wiki_fetches: AtomicUsize,
}

impl FakeGitLab {
    pub fn break_wiki(&self, slug: &str) {
        self.broken_wikis.lock().unwrap().insert(slug.to_string());
    }

    pub fn repair_wiki(&self, slug: &str) {
        self.broken_wikis.lock().unwrap().remove(slug);
    }
}

#[async_trait]
impl SourceCollaborator for FakeGitLab {
    fn base_url(&self) -> &str {
        "https://gitlab.example.com/group/app"
    }

    async fn list_wiki_pages(&self, _project_id: &str) -> Result<Vec<WikiPageSummary>, SourceError> {
        Ok(self
            .wikis
            .iter()
            .map(|w| WikiPageSummary {
                slug: w.slug.clone(),
                title: w.title.clone(),
                format: w.format.clone(),
            })
            .collect())
    }

    async fn get_wiki_page(&self, _project_id: &str, slug: &str) -> Result<WikiPage, SourceError> {
        self.wiki_fetches.fetch_add(1, Ordering::SeqCst);
        if self.broken_wikis.lock().unwrap().contains(slug) {
            return Err(SourceError::Unavailable {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }
        self.wikis
            .iter()
            .find(|w| w.slug == slug)
            .cloned()
            .ok_or_else(|| SourceError::Unavailable {
                status: 404,
                message: "Not Found".into(),
            })
    }

    async fn list_merge_requests(
        &self,
        _project_id: &str,
        state: &str,
    ) -> Result<Vec<MergeRequest>, SourceError> {
        Ok(self
            .merge_requests
            .iter()
            .filter(|mr| mr.state == state)
            .cloned()
            .collect())
    }

    async fn get_merge_request_comments(
        &self,
        _project_id: &str,
        merge_request_iid: i64,
    ) -> Result<Vec<Note>, SourceError> {
        Ok(self.mr_notes.get(&merge_request_iid).cloned().unwrap_or_default())
    }

    async fn list_issues(&self, _project_id: &str) -> Result<Vec<Issue>, SourceError> {
        Ok(self.issues.clone())
    }

    async fn get_issue_comments(
        &self,
        _project_id: &str,
        issue_iid: i64,
    ) -> Result<Vec<Note>, SourceError> {
        Ok(self.issue_notes.get(&issue_iid).cloned().unwrap_or_default())
    }
}

pub fn wiki(slug: &str, title: &str, content: &str) -> WikiPage {
    WikiPage {
        slug: slug.to_string(),
        title: title.to_string(),
        format: Some("markdown".to_string()),
        content: Some(content.to_string()),
    }
}

pub fn note(id: i64, body: &str) -> Note {
    Note {
        id,
        body: Some(body.to_string()),
        author: Some(Author {
            name: Some("Robin Diaz".to_string()),
            username: Some("rdiaz".to_string()),
        }),
    }
}

pub fn merged_mr(iid: i64, title: &str) -> MergeRequest {
    MergeRequest {
        iid,
        title: title.to_string(),
        description: Some(format!("{} across every service in the monorepo.", title)),
        state: "merged".to_string(),
        web_url: Some(format!(
            "https://gitlab.example.com/group/app/-/merge_requests/{}",
            iid
        )),
        author: None,
        merged_at: None,
        updated_at: None,
    }
}

/// One wiki page, one merged MR without qualifying comments, and one open
/// issue with a single long comment.
pub fn sample_project() -> FakeGitLab {
    let mut project = FakeGitLab {
        wikis: vec![wiki(
            "deploy",
            "Deploy",
            "Deploys run from the main branch.\n\nStaging is refreshed every night at 02:00 UTC.",
        )],
        merge_requests: vec![MergeRequest {
            iid: 7,
            title: "Move CI to shared runners".to_string(),
            description: Some("Switches every pipeline job to the shared runner pool.".to_string()),
            state: "merged".to_string(),
            web_url: Some("https://gitlab.example.com/group/app/-/merge_requests/7".to_string()),
            author: None,
            merged_at: None,
            updated_at: None,
        }],
        issues: vec![Issue {
            iid: 12,
            title: "Login fails on Safari".to_string(),
            description: Some("Users on Safari 17 see a blank page after the SSO redirect.".to_string()),
            state: "opened".to_string(),
            web_url: Some("https://gitlab.example.com/group/app/-/issues/12".to_string()),
            author: None,
            updated_at: None,
        }],
        ..Default::default()
    };
    project.mr_notes.insert(7, vec![note(1, "LGTM"), note(2, "Merged, thanks.")]);
    project.issue_notes.insert(
        12,
        vec![note(
            3,
            "The redirect drops the SameSite cookie; setting SameSite=None fixes it for Safari.",
        )],
    );
    project
}
