//! Embedding provider selection and the remote HTTP embedding client.
//!
//! Two providers implement [`EmbeddingProvider`]:
//! - **local**: [`LocalVectorizer`], fitted on the loaded corpus, no network.
//! - **remote**: [`RemoteEmbedder`], an OpenAI-compatible `POST <base>/embeddings`
//!   endpoint with bearer authentication.
//!
//! Use [`create_provider`] to build the one selected by configuration.
//! Missing credentials fail there, before any record is embedded.
//!
//! # Retry Strategy
//!
//! Each batch request is retried on transport errors, any non-2xx status, and
//! a response whose vector count differs from the number of inputs:
//! - up to `max_retries` retries (so `max_retries + 1` attempts)
//! - delays of `base_delay * 2^(n-1)`, capped at `max_delay` (0.5s, 1s, 2s, … 8s by default)
//! - exhausting retries yields [`EmbedError::Service`] wrapping the last failure
//!
//! A body in none of the accepted shapes fails immediately with
//! [`EmbedError::ResponseFormat`].

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use resume_search_core::embedding::{EmbeddingProvider, LocalVectorizer, ProgressFn};
use resume_search_core::error::EmbedError;

use crate::config::EmbeddingConfig;

/// Longest response excerpt kept in error messages.
const SNIPPET_CHARS: usize = 200;

/// Bounded exponential backoff for remote embedding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    provider: Option<String>,
    model: String,
    batch_size: usize,
    retry: RetryPolicy,
}

impl RemoteEmbedder {
    /// Build the client from configuration.
    ///
    /// # Errors
    ///
    /// [`EmbedError::Config`] when the base URL, API key or model is missing,
    /// the batch size is zero, or the HTTP client cannot be built.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                EmbedError::Config(
                    "embedding base URL is not set (embedding.base_url or RSX_EMBEDDING_BASE_URL)"
                        .to_string(),
                )
            })?;
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                EmbedError::Config(
                    "embedding API key is not set (embedding.api_key or RSX_EMBEDDING_API_KEY)"
                        .to_string(),
                )
            })?;
        if config.model.trim().is_empty() {
            return Err(EmbedError::Config("embedding.model must not be empty".to_string()));
        }
        if config.batch_size == 0 {
            return Err(EmbedError::Config(
                "embedding batch_size must be > 0".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| EmbedError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            provider: config
                .provider
                .clone()
                .filter(|p| !p.trim().is_empty()),
            model: config.model.clone(),
            batch_size: config.batch_size,
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, inputs: &[String]) -> Value {
        match &self.provider {
            Some(provider) => serde_json::json!({
                "provider": provider,
                "model": self.model,
                "input": inputs,
            }),
            None => serde_json::json!({
                "model": self.model,
                "input": inputs,
            }),
        }
    }

    /// One request, no retries.
    async fn request_once(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(inputs))
            .send()
            .await
            .map_err(|e| EmbedError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| EmbedError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(EmbedError::Transport(format!(
                "HTTP {}: {}",
                status,
                snippet(&text)
            )));
        }

        let json: Value = serde_json::from_str(&text).map_err(|_| EmbedError::ResponseFormat {
            snippet: snippet(&text),
        })?;
        let vectors = parse_embeddings_response(&json)?;
        if vectors.len() != inputs.len() {
            return Err(EmbedError::CountMismatch {
                expected: inputs.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }

    /// One batch with the retry policy applied.
    async fn request_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut last_err = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay(attempt);
                let reason = last_err
                    .as_ref()
                    .map(|e: &EmbedError| e.to_string())
                    .unwrap_or_default();
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "retrying embeddings request"
                );
                tokio::time::sleep(delay).await;
            }

            match self.request_once(inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(EmbedError::Service {
            attempts: self.retry.max_retries + 1,
            last: Box::new(last_err.unwrap_or_else(|| {
                EmbedError::Transport("no request attempted".to_string())
            })),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn kind(&self) -> &str {
        "remote"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        None
    }

    async fn embed_batch_with_progress(
        &self,
        texts: &[String],
        progress: ProgressFn<'_>,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let total = texts.len();
        if total == 0 {
            progress(0, 0);
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(total);
        for (batch, chunk) in texts.chunks(self.batch_size).enumerate() {
            let vectors = self.request_with_retry(chunk).await?;
            out.extend(vectors);
            debug!(batch, done = out.len(), total, "embedded batch");
            progress(out.len(), total);
        }
        Ok(out)
    }
}

/// Extract vectors from any of the accepted response shapes:
/// `{"data": [{"embedding": [...]}, ...]}`, `[[...], ...]`, or
/// `{"embeddings": [[...], ...]}`.
///
/// Entries in `data` carrying an `index` are put back in index order.
pub fn parse_embeddings_response(json: &Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let format_err = || EmbedError::ResponseFormat {
        snippet: snippet(&json.to_string()),
    };

    if let Some(data) = json.get("data").and_then(Value::as_array) {
        let mut indexed = Vec::with_capacity(data.len());
        for (pos, item) in data.iter().enumerate() {
            let vector = item
                .get("embedding")
                .and_then(as_vector)
                .ok_or_else(format_err)?;
            let index = item
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .unwrap_or(pos);
            indexed.push((index, vector));
        }
        indexed.sort_by_key(|(i, _)| *i);
        return Ok(indexed.into_iter().map(|(_, v)| v).collect());
    }

    let list = match json {
        Value::Array(items) => items,
        _ => json
            .get("embeddings")
            .and_then(Value::as_array)
            .ok_or_else(format_err)?,
    };
    list.iter()
        .map(|item| as_vector(item).ok_or_else(format_err))
        .collect()
}

fn as_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn snippet(text: &str) -> String {
    let mut s: String = text.chars().take(SNIPPET_CHARS).collect();
    if text.chars().count() > SNIPPET_CHARS {
        s.push('…');
    }
    s
}

/// Create the [`EmbeddingProvider`] selected by `config.kind`.
///
/// | Kind | Provider |
/// |------|----------|
/// | `"local"` | [`LocalVectorizer`] (must be fitted before use) |
/// | `"remote"` | [`RemoteEmbedder`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.kind.as_str() {
        "local" => Ok(Box::new(LocalVectorizer::new(
            config.dims,
            config.batch_size,
        )?)),
        "remote" => Ok(Box::new(RemoteEmbedder::from_config(config)?)),
        other => bail!("Unknown embedding kind: {}", other),
    }
}
