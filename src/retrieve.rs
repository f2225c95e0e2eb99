//! Retrieval engine: cosine-similarity top-K over one knowledge base.
//!
//! The query is embedded with the same batch client used for ingestion, so
//! query and chunk vectors come from the same model. Ranking itself lives in
//! [`knowdesk_core::search`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use knowdesk_core::search::{search_chunks, SimilarChunk};
use knowdesk_core::store::Store;

use crate::batch::EmbeddingBatcher;

pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Arc<EmbeddingBatcher>,
}

impl Retriever {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<EmbeddingBatcher>) -> Self {
        Self { store, embedder }
    }

    /// The `top_k` chunks most similar to `query`, best first.
    pub async fn find_similar(
        &self,
        knowledge_base_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarChunk>> {
        let query_vec = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;

        let results = search_chunks(self.store.as_ref(), knowledge_base_id, &query_vec, top_k).await?;
        debug!(
            kb = knowledge_base_id,
            hits = results.len(),
            best = results.first().map(|r| r.similarity).unwrap_or(0.0),
            "retrieval complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knowdesk_core::embedding::{EmbeddingProvider, ProviderError};
    use knowdesk_core::models::{PendingChunk, SourceType};
    use knowdesk_core::store::memory::InMemoryStore;
    use knowdesk_core::store::{ChunkStore, KnowledgeBaseStore};
    use std::time::Duration;

    /// Maps a few known texts to fixed vectors.
    struct LookupEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LookupEmbedder {
        fn model_name(&self) -> &str {
            "lookup"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts
                .iter()
                .map(|t| match t.as_str() {
                    "deploy" => vec![1.0, 0.0, 0.0],
                    "billing" => vec![0.0, 1.0, 0.0],
                    _ => vec![0.0, 0.0, 1.0],
                })
                .collect())
        }
    }

    fn chunk(source_id: &str, content: &str) -> PendingChunk {
        PendingChunk {
            source_type: SourceType::Wiki,
            source_id: source_id.to_string(),
            source_url: None,
            chunk_index: 0,
            content: content.to_string(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_identical_vector_ranks_first_with_similarity_one() {
        let store = Arc::new(InMemoryStore::new());
        let kb = store.open_run("ws", "1").await.unwrap();
        store
            .store_chunks(&[
                chunk("billing", "Invoices are sent monthly").with_embedding(&kb.id, vec![0.0, 1.0, 0.0]),
                chunk("deploy", "Deploys run from main").with_embedding(&kb.id, vec![1.0, 0.0, 0.0]),
                chunk("mixed", "Deploy billing service").with_embedding(&kb.id, vec![0.7, 0.7, 0.0]),
            ])
            .await
            .unwrap();

        let batcher = EmbeddingBatcher::new(Arc::new(LookupEmbedder), 10, 3, Duration::from_millis(1));
        let retriever = Retriever::new(store, Arc::new(batcher));
        let hits = retriever.find_similar(&kb.id, "deploy", 5).await.unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].content, "Deploys run from main");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits[1].similarity > hits[2].similarity);
    }

    #[tokio::test]
    async fn test_empty_knowledge_base_returns_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let batcher = EmbeddingBatcher::new(Arc::new(LookupEmbedder), 10, 3, Duration::from_millis(1));
        let retriever = Retriever::new(store, Arc::new(batcher));
        let hits = retriever.find_similar("missing", "deploy", 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
