//! Embedding batch client.
//!
//! Splits an ordered list of texts into contiguous sub-batches (the last may
//! be short) and makes one provider call per sub-batch. A rate-limit signal
//! retries the same sub-batch with exponential backoff
//! (`base_delay × 2^attempt`, up to `max_attempts` total attempts); any other
//! error fails the whole job at once. Backoff suspends only the calling task.
//!
//! The output matches the input in count and order, and every vector has the
//! provider's declared length (any common length when it declares 0).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use knowdesk_core::embedding::{EmbeddingProvider, ProviderError};

use crate::config::EmbeddingConfig;

pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_attempts: u32,
    base_delay: Duration,
}

impl EmbeddingBatcher {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_attempts: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::new(
            provider,
            config.batch_size,
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
        )
    }

    /// Embed every text, one provider call per sub-batch.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let embedded = self.embed_with_retry(batch_index, batch).await?;
            if embedded.len() != batch.len() {
                return Err(ProviderError::InvalidResponse(format!(
                    "expected {} vectors for batch {}, got {}",
                    batch.len(),
                    batch_index,
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }

        if let Some(first) = vectors.first() {
            let dims = first.len();
            if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
                return Err(ProviderError::InvalidResponse(
                    "provider returned vectors of inconsistent dimensionality".into(),
                ));
            }
            let expected = self.provider.dims();
            if expected != 0 && dims != expected {
                return Err(ProviderError::InvalidResponse(format!(
                    "expected {}-dimensional vectors from {}, got {}",
                    expected,
                    self.provider.model_name(),
                    dims
                )));
            }
        }

        Ok(vectors)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_all(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("no vector returned for query".into()))
    }

    async fn embed_with_retry(
        &self,
        batch_index: usize,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            match self.provider.embed(batch).await {
                Ok(vectors) => {
                    debug!(batch = batch_index, size = batch.len(), attempt, "embedded sub-batch");
                    return Ok(vectors);
                }
                Err(err) if err.is_rate_limit() && attempt + 1 < self.max_attempts => {
                    let delay = self.base_delay.saturating_mul(1u32 << attempt.min(16));
                    warn!(
                        batch = batch_index,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, retrying sub-batch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
