//! Answer synthesis: retrieval plus one generative completion.
//!
//! The top chunks are concatenated as `[Source N]: content` blocks into a
//! system prompt that tells the model to answer only from that context and
//! to say so when the context is insufficient. An empty retrieval
//! short-circuits to a fixed answer without calling the model. Generation
//! errors propagate unchanged; there is no retry.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use knowdesk_core::completion::{ChatMessage, CompletionOptions, CompletionProvider};
use knowdesk_core::models::{KbStatus, SourceType};
use knowdesk_core::search::{SimilarChunk, DEFAULT_TOP_K};
use knowdesk_core::store::{KnowledgeBaseStore, Store};

use crate::retrieve::Retriever;

/// Returned when retrieval finds nothing.
pub const NO_KNOWLEDGE_ANSWER: &str =
    "I don't have enough information in the knowledge base to answer this question.";

pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// A cited source in an [`Answer`].
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub url: Option<String>,
    pub similarity: f32,
    pub preview: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

pub struct AnswerSynthesizer {
    retriever: Retriever,
    completer: Arc<dyn CompletionProvider>,
    options: CompletionOptions,
    top_k: usize,
    preview_chars: usize,
}

impl AnswerSynthesizer {
    pub fn new(
        retriever: Retriever,
        completer: Arc<dyn CompletionProvider>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            retriever,
            completer,
            options,
            top_k: DEFAULT_TOP_K,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    pub fn with_limits(mut self, top_k: usize, preview_chars: usize) -> Self {
        self.top_k = top_k;
        self.preview_chars = preview_chars;
        self
    }

    /// Answer `question` from the chunks of one knowledge base.
    pub async fn answer(&self, knowledge_base_id: &str, question: &str) -> Result<Answer> {
        let chunks = self
            .retriever
            .find_similar(knowledge_base_id, question, self.top_k)
            .await?;

        if chunks.is_empty() {
            info!(kb = knowledge_base_id, "no chunks retrieved, skipping generation");
            return Ok(Answer {
                answer: NO_KNOWLEDGE_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let messages = [
            ChatMessage::system(build_system_prompt(&chunks)),
            ChatMessage::user(question),
        ];
        let answer = self
            .completer
            .complete(&messages, &self.options)
            .await
            .context("Answer generation failed")?;

        let sources = chunks
            .into_iter()
            .map(|c| SourceRef {
                preview: preview(&c.content, self.preview_chars),
                source_type: c.source_type,
                url: c.source_url,
                similarity: c.similarity,
                metadata: c.metadata,
            })
            .collect();

        Ok(Answer { answer, sources })
    }
}

fn build_system_prompt(chunks: &[SimilarChunk]) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[Source {}]: {}", i + 1, c.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a helpful assistant that answers questions based on the provided context \
         from GitLab wikis, merge requests, and issue comments.\n\n\
         Use the following context to answer the user's question. If the context doesn't \
         contain enough information, say so clearly.\n\n\
         Context:\n{}",
        context
    )
}

/// First `max_chars` characters, with `...` appended only when truncated.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// Errors of the knowledge query interface.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("knowledge base not found: {0}")]
    NotFound(String),

    #[error("knowledge base is not ready (status: {status})")]
    NotReady { status: KbStatus },

    #[error("{0:#}")]
    Failed(anyhow::Error),
}

/// Answer a question against a knowledge base that has finished indexing.
pub async fn query_knowledge(
    store: &dyn Store,
    synthesizer: &AnswerSynthesizer,
    knowledge_base_id: &str,
    question: &str,
) -> Result<Answer, QueryError> {
    if question.trim().is_empty() {
        return Err(QueryError::EmptyQuestion);
    }

    let config = store
        .get_knowledge_base(knowledge_base_id)
        .await
        .map_err(QueryError::Failed)?
        .ok_or_else(|| QueryError::NotFound(knowledge_base_id.to_string()))?;

    if config.status != KbStatus::Completed {
        return Err(QueryError::NotReady {
            status: config.status,
        });
    }

    synthesizer
        .answer(knowledge_base_id, question)
        .await
        .map_err(QueryError::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::EmbeddingBatcher;
    use async_trait::async_trait;
    use knowdesk_core::embedding::{EmbeddingProvider, ProviderError};
    use knowdesk_core::models::{KbTotals, PendingChunk};
    use knowdesk_core::store::memory::InMemoryStore;
    use knowdesk_core::store::ChunkStore;
    use std::sync::Mutex;
    use std::time::Duration;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl CompletionProvider for RecordingModel {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            Ok("Deploys run from main.".to_string())
        }
    }

    fn synthesizer(store: Arc<InMemoryStore>, model: Arc<RecordingModel>) -> AnswerSynthesizer {
        let batcher = EmbeddingBatcher::new(Arc::new(UnitEmbedder), 10, 3, Duration::from_millis(1));
        AnswerSynthesizer::new(
            Retriever::new(store, Arc::new(batcher)),
            model,
            CompletionOptions::default(),
        )
    }

    #[test]
    fn test_preview_truncates_with_ellipsis() {
        let long = "a".repeat(250);
        let p = preview(&long, 200);
        assert_eq!(p.chars().count(), 203);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short", 200), "short");
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("ééé", 2), "éé...");
    }

    #[tokio::test]
    async fn test_no_chunks_skips_generation() {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(RecordingModel::default());
        let answer = synthesizer(store, model.clone())
            .answer("kb-empty", "How do we deploy?")
            .await
            .unwrap();

        assert_eq!(answer.answer, NO_KNOWLEDGE_ANSWER);
        assert!(answer.sources.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answer_cites_sources_and_labels_context() {
        let store = Arc::new(InMemoryStore::new());
        let kb = store.open_run("ws", "1").await.unwrap();
        let content = format!("Deploys run from main. {}", "x".repeat(300));
        store
            .store_chunks(&[PendingChunk {
                source_type: SourceType::MergeRequest,
                source_id: "4".into(),
                source_url: Some("https://gitlab.example.com/mr/4".into()),
                chunk_index: 0,
                content: content.clone(),
                metadata: serde_json::json!({ "title": "CI" }),
            }
            .with_embedding(&kb.id, vec![1.0, 0.0])])
            .await
            .unwrap();

        let model = Arc::new(RecordingModel::default());
        let answer = synthesizer(store, model.clone())
            .answer(&kb.id, "How do we deploy?")
            .await
            .unwrap();

        assert_eq!(answer.answer, "Deploys run from main.");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].source_type, SourceType::MergeRequest);
        assert!(answer.sources[0].preview.ends_with("..."));
        assert_eq!(answer.sources[0].metadata["title"], "CI");

        let prompts = model.prompts.lock().unwrap();
        let system = &prompts[0][0].content;
        assert!(system.contains(&format!("[Source 1]: {}", content)));
        assert_eq!(prompts[0][1].content, "How do we deploy?");
    }

    #[tokio::test]
    async fn test_query_requires_completed_knowledge_base() {
        let store = Arc::new(InMemoryStore::new());
        let kb = store.open_run("ws", "1").await.unwrap();
        let model = Arc::new(RecordingModel::default());
        let synth = synthesizer(store.clone(), model);

        let err = query_knowledge(store.as_ref(), &synth, &kb.id, "q")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotReady { status: KbStatus::Processing }));

        let err = query_knowledge(store.as_ref(), &synth, "nope", "q")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));

        store.complete_run(&kb.id, KbTotals::default()).await.unwrap();
        let answer = query_knowledge(store.as_ref(), &synth, &kb.id, "q").await.unwrap();
        assert_eq!(answer.answer, NO_KNOWLEDGE_ANSWER);

        let err = query_knowledge(store.as_ref(), &synth, &kb.id, "  ").await.unwrap_err();
        assert!(matches!(err, QueryError::EmptyQuestion));
    }
}
