//! Embedding and completion provider implementations.
//!
//! | Config value | Embedding | Completion |
//! |--------------|-----------|------------|
//! | `"disabled"` | [`DisabledProvider`] | [`DisabledProvider`] |
//! | `"openai"` | `POST /v1/embeddings` | `POST /v1/chat/completions` |
//! | `"ollama"` | `POST /api/embed` | `POST /api/chat` |
//!
//! Every provider makes exactly one HTTP attempt per call. Retrying on rate
//! limits is the job of [`crate::batch::EmbeddingBatcher`]; generation calls
//! are never retried. HTTP 429, or an error body carrying the
//! `rate_limit_exceeded` code, is reported as [`ProviderError::RateLimited`]
//! so the batcher can tell it apart from permanent failures.
//!
//! The OpenAI key is read from `OPENAI_API_KEY` when the provider is built.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use knowdesk_core::completion::{ChatMessage, CompletionOptions, CompletionProvider};
use knowdesk_core::embedding::{EmbeddingProvider, ProviderError};

use crate::config::{EmbeddingConfig, GenerationConfig};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// A provider that refuses every call.
///
/// Used when `provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

#[async_trait]
impl CompletionProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Map a non-success HTTP response to a [`ProviderError`].
fn classify_http_error(status: u16, body: &str) -> ProviderError {
    if status == 429 || body.contains("rate_limit_exceeded") {
        ProviderError::RateLimited {
            message: format!("HTTP {}: {}", status, body),
        }
    } else {
        ProviderError::Api {
            status,
            message: body.to_string(),
        }
    }
}

/// Send a JSON POST and return the decoded body, or a classified error.
async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<Value, ProviderError> {
    let mut request = client.post(url).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(classify_http_error(status.as_u16(), &text));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn json_vector(value: &Value) -> Result<Vec<f32>, ProviderError> {
    value
        .as_array()
        .ok_or_else(|| ProviderError::InvalidResponse("embedding is not an array".into()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::InvalidResponse("non-numeric embedding value".into()))
        })
        .collect()
}

// ============ OpenAI ============

/// OpenAI (or OpenAI-compatible) embeddings and chat completions.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiProvider {
    pub fn for_embeddings(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        Self::build(config.url.as_deref(), model, dims, config.timeout_secs)
    }

    pub fn for_generation(config: &GenerationConfig) -> Result<Self> {
        Self::build(
            config.url.as_deref(),
            config.model.clone(),
            0,
            config.timeout_secs,
        )
    }

    fn build(url: Option<&str>, model: String, dims: usize, timeout_secs: u64) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
        })
    }
}

/// Extract `data[].embedding` in input order (by `index` when present).
fn parse_openai_embeddings(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| ProviderError::InvalidResponse("missing embedding".into()))?;
        indexed.push((index, json_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = json!({ "model": self.model, "input": texts });
        let url = format!("{}/v1/embeddings", self.base_url);
        let json = post_json(&self.client, &url, Some(&self.api_key), &body).await?;
        parse_openai_embeddings(&json)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        let url = format!("{}/v1/chat/completions", self.base_url);
        let json = post_json(&self.client, &url, Some(&self.api_key), &body).await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))
    }
}

// ============ Ollama ============

/// A local Ollama instance.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn for_embeddings(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: ollama_url(config.url.as_deref()),
            model,
            dims,
        })
    }

    pub fn for_generation(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: ollama_url(config.url.as_deref()),
            model: config.model.clone(),
            dims: 0,
        })
    }
}

fn ollama_url(url: Option<&str>) -> String {
    url.unwrap_or(OLLAMA_BASE_URL).trim_end_matches('/').to_string()
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = json!({ "model": self.model, "input": texts });
        let url = format!("{}/api/embed", self.base_url);
        let json = post_json(&self.client, &url, None, &body).await?;

        json.get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse("missing embeddings array".into()))?
            .iter()
            .map(json_vector)
            .collect()
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let mut ollama_options = json!({ "temperature": options.temperature });
        if let Some(max_tokens) = options.max_tokens {
            ollama_options["num_predict"] = json!(max_tokens);
        }
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": ollama_options,
        });
        let url = format!("{}/api/chat", self.base_url);
        let json = post_json(&self.client, &url, None, &body).await?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("missing message.content".into()))
    }
}

/// Build the embedding provider named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiProvider::for_embeddings(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::for_embeddings(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Build the completion provider named by `config.provider`.
pub fn create_completer(config: &GenerationConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiProvider::for_generation(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::for_generation(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_rate_limit() {
        assert!(classify_http_error(429, "slow down").is_rate_limit());
    }

    #[test]
    fn test_rate_limit_code_in_body_is_rate_limit() {
        let body = r#"{"error":{"code":"rate_limit_exceeded","message":"TPM"}}"#;
        assert!(classify_http_error(400, body).is_rate_limit());
    }

    #[test]
    fn test_auth_failure_is_permanent() {
        let err = classify_http_error(401, "invalid api key");
        assert!(!err.is_rate_limit());
        assert!(matches!(err, ProviderError::Api { status: 401, .. }));
    }

    #[test]
    fn test_openai_embeddings_ordered_by_index() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_embeddings(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_openai_embeddings_missing_data() {
        let err = parse_openai_embeddings(&json!({ "object": "list" })).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_disabled_provider_refuses() {
        let provider = DisabledProvider;
        let err = EmbeddingProvider::embed(&provider, &["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Disabled));
    }

    #[test]
    fn test_create_disabled_by_default() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        let completer = create_completer(&GenerationConfig::default()).unwrap();
        assert_eq!(completer.model_name(), "disabled");
    }
}
