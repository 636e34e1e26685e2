//! Embedding generation against an OpenAI-compatible provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::tokenizer::Tokenizer;
use crate::error::EmbeddingError;
use crate::models::{CostEstimate, EmbeddingConfig, ModelInfo};

/// Context window of the `text-embedding-3-*` models.
pub const MODEL_MAX_TOKENS: usize = 8191;

/// One outbound request per call; no caching, no retries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning one vector per input in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<String>,
    model: &'a str,
    dimensions: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for `POST {base_url}/v1/embeddings`.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: u32,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = texts.len();
        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
            dimensions: self.dimension,
        };

        let mut builder = self.client.post(self.embeddings_url()).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(EmbeddingError::ProviderError(format!(
                "status {}: {}",
                status.as_u16(),
                message
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                expected,
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// A single embedded text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub token_count: usize,
}

/// Vectors for a batch, aligned with the non-blank inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: usize,
    pub dimensions: usize,
}

/// Validates inputs against the model limits and prices the calls.
#[derive(Clone)]
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    tokenizer: Tokenizer,
    model: String,
    dimension: u32,
    max_item_tokens: usize,
    max_batch_items: usize,
    cost_per_million_tokens: f64,
}

impl EmbeddingGenerator {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        tokenizer: Tokenizer,
        config: &EmbeddingConfig,
    ) -> Self {
        Self {
            provider,
            tokenizer,
            model: config.model.clone(),
            dimension: config.dimension,
            max_item_tokens: config.max_item_tokens,
            max_batch_items: config.max_batch_items,
            cost_per_million_tokens: config.cost_per_million_tokens,
        }
    }

    /// Generator backed by the HTTP client.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = OpenAiEmbeddingClient::new(config)?;
        Ok(Self::new(Arc::new(client), Tokenizer::new(), config))
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn max_item_tokens(&self) -> usize {
        self.max_item_tokens
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    fn check_item(&self, text: &str) -> Result<usize, EmbeddingError> {
        let tokens = self.tokenizer.count_tokens(text);
        if tokens > self.max_item_tokens {
            return Err(EmbeddingError::Validation(format!(
                "text has {} tokens, limit is {}",
                tokens, self.max_item_tokens
            )));
        }
        Ok(tokens)
    }

    pub async fn generate_embedding(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::Validation("text is empty".to_string()));
        }
        let token_count = self.check_item(text)?;

        let vector = self
            .provider
            .embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".into()))?;

        Ok(Embedding {
            vector,
            token_count,
        })
    }

    /// Embed every non-blank text in one request. Any oversized item fails
    /// the whole batch before anything is sent.
    pub async fn generate_embeddings_batch(
        &self,
        texts: &[String],
    ) -> Result<EmbeddingBatch, EmbeddingError> {
        let valid: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();

        if valid.is_empty() {
            return Err(EmbeddingError::Validation(
                "no non-empty texts to embed".to_string(),
            ));
        }
        if valid.len() > self.max_batch_items {
            return Err(EmbeddingError::Validation(format!(
                "batch has {} items, limit is {}",
                valid.len(),
                self.max_batch_items
            )));
        }

        let mut total_tokens = 0;
        for (i, text) in valid.iter().enumerate() {
            total_tokens += self
                .check_item(text)
                .map_err(|e| EmbeddingError::Validation(format!("item {i}: {e}")))?;
        }

        let vectors = self.provider.embed(valid).await?;
        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        tracing::debug!(
            items = vectors.len(),
            total_tokens,
            dimensions,
            "generated embeddings"
        );

        Ok(EmbeddingBatch {
            vectors,
            total_tokens,
            dimensions,
        })
    }

    /// USD cost of `token_count` tokens, rounded to six decimals.
    pub fn estimate_cost(&self, token_count: usize) -> f64 {
        let raw = token_count as f64 / 1_000_000.0 * self.cost_per_million_tokens;
        (raw * 1_000_000.0).round() / 1_000_000.0
    }

    pub fn estimate(&self, texts: &[String]) -> CostEstimate {
        let counts: Vec<usize> = texts
            .iter()
            .map(|t| self.tokenizer.count_tokens(t))
            .collect();
        let total_tokens = counts.iter().sum();

        CostEstimate {
            model: self.model.clone(),
            items: texts.len(),
            total_tokens,
            estimated_cost: self.estimate_cost(total_tokens),
            over_limit: counts.iter().filter(|&&c| c > self.max_item_tokens).count(),
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model: self.model.clone(),
            dimension: self.dimension,
            max_tokens: MODEL_MAX_TOKENS,
            max_batch_items: self.max_batch_items,
            cost_per_million_tokens: self.cost_per_million_tokens,
        }
    }

    /// Embed a probe string and return the vector dimension.
    pub async fn test_connection(&self) -> Result<usize, EmbeddingError> {
        let embedding = self.generate_embedding("test").await?;
        Ok(embedding.vector.len())
    }
}
