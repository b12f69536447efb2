//! Multi-provider embedder. §4.5
//!
//! Remote providers are called through `ureq` — the teacher's declared HTTP
//! client, documented there as "100% synchronous — safe to call from a
//! blocking loop" — wrapped in `tokio::task::spawn_blocking` so the async
//! service never blocks on it. `local_transformer` skips HTTP entirely and
//! calls `model2vec_rs::model::StaticModel` in-process.

pub mod providers;

use crate::error::{IndexError, Result};
use providers::{provider_limits, validate_model};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Jina,
    Voyage,
    OpenAi,
    Cohere,
    HuggingFace,
    Ollama,
    LocalTransformer,
    Custom,
}

impl Default for Provider {
    fn default() -> Self {
        Provider::LocalTransformer
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            api_key: None,
            model: None,
            base_url: None,
            dimensions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Monotonic last-fired timestamp per instance; §9 explicitly forbids a
/// global token bucket shared across workspaces.
struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(rpm: u32) -> Self {
        let min_interval = Duration::from_millis(60_000 / rpm.max(1) as u64);
        Self { min_interval, last_call: Mutex::new(None) }
    }

    async fn wait_turn(&self) {
        let wait = {
            let mut last = self.last_call.lock().unwrap();
            let now = Instant::now();
            let wait = match *last {
                Some(prev) => self.min_interval.saturating_sub(now.duration_since(prev)),
                None => Duration::ZERO,
            };
            *last = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

pub struct Embedder {
    config: EmbeddingConfig,
    resolved_model: String,
    dimensions: usize,
    limiter: RateLimiter,
    batch_size: usize,
    local_model: Option<Mutex<model2vec_rs::model::StaticModel>>,
}

impl Embedder {
    /// Validate the model name (substituting the provider default on
    /// mismatch) and, for `local_transformer`, eagerly load the static
    /// model so later batches don't pay a first-call penalty.
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.provider == Provider::Custom && config.base_url.is_none() {
            return Err(IndexError::Config("custom provider requires base_url".into()));
        }

        let (rpm, batch_size) = provider_limits(config.provider);
        let resolved_model = validate_model(config.provider, config.model.as_deref());
        let dimensions = config.dimensions.unwrap_or_else(|| providers::default_dimensions(config.provider));

        let local_model = if config.provider == Provider::LocalTransformer {
            let model = model2vec_rs::model::StaticModel::from_pretrained(&resolved_model, None, None, None)
                .map_err(|e| IndexError::Config(format!("failed to load local model: {e}")))?;
            Some(Mutex::new(model))
        } else {
            None
        };

        Ok(Self {
            config,
            resolved_model,
            dimensions,
            limiter: RateLimiter::new(rpm),
            batch_size,
            local_model,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        Ok(out.remove(0))
    }

    /// Batches `texts` by `batch_size`, rate-limiting and retrying each
    /// batch independently. Output order matches input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            self.limiter.wait_turn().await;
            out.extend(self.embed_batch_with_retry(batch).await?);
        }
        Ok(out)
    }

    async fn embed_batch_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.call_provider(batch).await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < 3 && is_retryable(&e) => {
                    let wait_ms = backoff_ms(&e, attempt);
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_provider(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.config.provider == Provider::LocalTransformer {
            return self.embed_local(batch);
        }

        let provider = self.config.provider;
        let api_key = self.config.api_key.clone();
        let base_url = self.config.base_url.clone();
        let model = self.resolved_model.clone();
        let texts = batch.to_vec();

        tokio::task::spawn_blocking(move || {
            providers::embed_remote_sync(provider, api_key.as_deref(), base_url.as_deref(), &model, &texts)
        })
        .await
        .map_err(|e| IndexError::UpstreamTransient(format!("embedding task panicked: {e}")))?
    }

    fn embed_local(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.local_model.as_ref().ok_or(IndexError::NotInitialized)?;
        let guard = model.lock().unwrap();
        Ok(batch.iter().map(|t| guard.encode_single(t)).collect())
    }

    /// Embeds `"test connection"` and reports round-trip latency.
    pub async fn test_connection(&self) -> ConnectionTestResult {
        let start = Instant::now();
        match self.embed("test connection").await {
            Ok(_) => ConnectionTestResult {
                success: true,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => ConnectionTestResult { success: false, latency_ms: None, error: Some(e.to_string()) },
        }
    }
}

fn is_retryable(err: &IndexError) -> bool {
    matches!(err, IndexError::RateLimited { .. } | IndexError::UpstreamTransient(_))
}

fn backoff_ms(err: &IndexError, attempt: u32) -> u64 {
    match err {
        IndexError::RateLimited { .. } => [20_000, 40_000, 80_000][attempt.min(2) as usize],
        _ => 1000 * (attempt as u64 + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_provider_without_base_url_is_config_error() {
        let cfg = EmbeddingConfig { provider: Provider::Custom, ..Default::default() };
        assert!(Embedder::new(cfg).is_err());
    }

    #[test]
    fn backoff_uses_rate_limit_ladder() {
        let e = IndexError::RateLimited { attempts: 1, message: "x".into() };
        assert_eq!(backoff_ms(&e, 0), 20_000);
        assert_eq!(backoff_ms(&e, 1), 40_000);
        assert_eq!(backoff_ms(&e, 2), 80_000);
    }

    #[test]
    fn backoff_uses_linear_ladder_for_other_errors() {
        let e = IndexError::UpstreamTransient("boom".into());
        assert_eq!(backoff_ms(&e, 0), 1000);
        assert_eq!(backoff_ms(&e, 2), 3000);
    }
}
