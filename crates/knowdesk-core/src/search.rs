//! Similarity ranking over a knowledge base's chunks.
//!
//! Retrieval is a full linear scan: every chunk of the knowledge base is
//! scored against the query vector by cosine similarity, sorted descending,
//! and truncated to `top_k`. There is no relevance threshold; callers decide
//! their own cutoffs.
//!
//! The calling application embeds the query and passes the vector in, so
//! this module stays free of provider and runtime dependencies.

use std::cmp::Ordering;

use anyhow::Result;
use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::models::{DocumentChunk, SourceType};
use crate::store::ChunkStore;

/// Number of chunks returned when the caller does not say otherwise.
pub const DEFAULT_TOP_K: usize = 5;

/// A chunk with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarChunk {
    pub chunk_id: String,
    pub similarity: f32,
    pub content: String,
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// Score `chunks` against `query_vec` and keep the best `top_k`.
///
/// Ties keep their load order (stable sort).
pub fn rank_chunks(query_vec: &[f32], chunks: Vec<DocumentChunk>, top_k: usize) -> Vec<SimilarChunk> {
    let mut scored: Vec<SimilarChunk> = chunks
        .into_iter()
        .map(|c| SimilarChunk {
            similarity: cosine_similarity(query_vec, &c.embedding),
            chunk_id: c.id,
            content: c.content,
            source_type: c.source_type,
            source_url: c.source_url,
            metadata: c.metadata,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(top_k);
    scored
}

/// Load every chunk of a knowledge base and rank it against `query_vec`.
pub async fn search_chunks<S: ChunkStore + ?Sized>(
    store: &S,
    knowledge_base_id: &str,
    query_vec: &[f32],
    top_k: usize,
) -> Result<Vec<SimilarChunk>> {
    let chunks = store.load_chunks(knowledge_base_id).await?;
    Ok(rank_chunks(query_vec, chunks, top_k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PendingChunk;
    use crate::store::memory::InMemoryStore;

    fn chunk(source_id: &str, embedding: Vec<f32>) -> DocumentChunk {
        PendingChunk {
            source_type: SourceType::Issue,
            source_id: source_id.to_string(),
            source_url: Some(format!("https://git.example/issues/{}", source_id)),
            chunk_index: 0,
            content: format!("content of {}", source_id),
            metadata: serde_json::json!({ "title": source_id }),
        }
        .with_embedding("kb", embedding)
    }

    #[test]
    fn test_rank_orders_by_similarity() {
        let chunks = vec![
            chunk("far", vec![0.0, 1.0]),
            chunk("near", vec![1.0, 0.1]),
            chunk("exact", vec![2.0, 0.0]),
        ];
        let ranked = rank_chunks(&[1.0, 0.0], chunks, 5);
        let ids: Vec<&str> = ranked.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(ids, vec!["content of exact", "content of near", "content of far"]);
        assert!((ranked[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_truncates_to_top_k() {
        let chunks = (0..10)
            .map(|i| chunk(&i.to_string(), vec![1.0, i as f32]))
            .collect();
        assert_eq!(rank_chunks(&[1.0, 0.0], chunks, 3).len(), 3);
    }

    #[test]
    fn test_rank_keeps_provenance() {
        let ranked = rank_chunks(&[1.0], vec![chunk("12", vec![1.0])], 1);
        assert_eq!(ranked[0].source_type, SourceType::Issue);
        assert_eq!(
            ranked[0].source_url.as_deref(),
            Some("https://git.example/issues/12")
        );
        assert_eq!(ranked[0].metadata["title"], "12");
    }

    #[tokio::test]
    async fn test_search_single_chunk_exact_match() {
        let store = InMemoryStore::new();
        store
            .store_chunks(&[chunk("only", vec![0.2, 0.4, 0.6])])
            .await
            .unwrap();
        let results = search_chunks(&store, "kb", &[0.2, 0.4, 0.6], DEFAULT_TOP_K)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_search_empty_knowledge_base() {
        let store = InMemoryStore::new();
        let results = search_chunks(&store, "kb", &[1.0], DEFAULT_TOP_K).await.unwrap();
        assert!(results.is_empty());
    }
}
