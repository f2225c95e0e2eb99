//! Embedding provider trait, provider errors, and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] capability that the ingestion pipeline
//! and the retrieval engine receive at construction time, the
//! [`ProviderError`] type shared with the completion provider, and pure
//! helpers for vector serialization and similarity computation.
//!
//! Concrete providers (OpenAI, Ollama) live in the `knowdesk` app crate.

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by embedding and completion providers.
///
/// The retry policy of the embedding batch client depends on telling a
/// rate-limit signal apart from everything else; see
/// [`ProviderError::is_rate_limit`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider asked us to slow down (HTTP 429 or `rate_limit_exceeded`).
    #[error("rate limited by provider: {message}")]
    RateLimited { message: String },

    /// The provider rejected the request (auth, validation, server error).
    #[error("provider API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The request never produced an HTTP response.
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The provider answered, but not in the shape we expect.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// No provider is configured.
    #[error("provider is disabled; configure [embedding] / [generation] in the config file")]
    Disabled,
}

impl ProviderError {
    /// Whether this error is the transient rate-limit signal.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// Trait for embedding providers.
///
/// One call embeds one batch: the returned vectors match `texts` in count
/// and order. Implementations make a single attempt; retrying is the
/// caller's business.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the configured embedding dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use knowdesk_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
///
/// Returns `0.0` when either vector has zero magnitude, and for empty
/// vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
