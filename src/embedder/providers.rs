//! Per-provider limits, model validation, and the synchronous `ureq` calls.
//! Grounded on the teacher's `ureq` dependency note and on the provider-module
//! split seen in the pack's multi-provider embedding clients.

use super::Provider;
use crate::error::{IndexError, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// `(rpm, batch_size)`, hardcoded per §4.5.
pub fn provider_limits(provider: Provider) -> (u32, usize) {
    match provider {
        Provider::Jina => (60, 100),
        Provider::Voyage => (3, 8),
        Provider::OpenAi => (60, 100),
        Provider::Cohere => (60, 96),
        Provider::HuggingFace => (60, 32),
        Provider::Ollama => (1000, 1),
        Provider::LocalTransformer => (10_000, 32),
        Provider::Custom => (60, 50),
    }
}

pub fn default_dimensions(provider: Provider) -> usize {
    match provider {
        Provider::Jina => 768,
        Provider::Voyage => 1024,
        Provider::OpenAi => 1536,
        Provider::Cohere => 1024,
        Provider::HuggingFace => 384,
        Provider::Ollama => 768,
        Provider::LocalTransformer => 256,
        Provider::Custom => 768,
    }
}

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::Jina => "jina-embeddings-v2-base-code",
        Provider::Voyage => "voyage-code-2",
        Provider::OpenAi => "text-embedding-3-small",
        Provider::Cohere => "embed-english-v3.0",
        Provider::HuggingFace => "sentence-transformers/all-MiniLM-L6-v2",
        Provider::Ollama => "nomic-embed-text",
        Provider::LocalTransformer => "minishlab/potion-base-8M",
        Provider::Custom => "custom",
    }
}

fn model_pattern(provider: Provider) -> &'static str {
    match provider {
        Provider::Jina => r"^jina-embeddings",
        Provider::Voyage => r"^voyage-",
        Provider::OpenAi => r"^text-embedding-",
        Provider::Cohere => r"^embed-",
        Provider::HuggingFace => r".+/.+",
        Provider::Ollama => r".+",
        Provider::LocalTransformer => r".+",
        Provider::Custom => r".+",
    }
}

fn compiled(pattern: &str) -> Regex {
    static CACHE: OnceLock<std::sync::Mutex<std::collections::HashMap<String, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::Mutex::new(std::collections::HashMap::new()));
    let mut guard = cache.lock().unwrap();
    guard.entry(pattern.to_string()).or_insert_with(|| Regex::new(pattern).unwrap()).clone()
}

/// For `custom`, the user-supplied model is used verbatim. Otherwise, a
/// model name failing the provider's regex logs a warning and falls back to
/// the provider default.
pub fn validate_model(provider: Provider, requested: Option<&str>) -> String {
    if provider == Provider::Custom {
        return requested.unwrap_or("custom").to_string();
    }
    let Some(name) = requested else {
        return default_model(provider).to_string();
    };
    if compiled(model_pattern(provider)).is_match(name) {
        name.to_string()
    } else {
        tracing::warn!(provider = ?provider, model = name, "model name did not match provider pattern, substituting default");
        default_model(provider).to_string()
    }
}

fn endpoint(provider: Provider, base_url: Option<&str>) -> String {
    match provider {
        Provider::Jina => "https://api.jina.ai/v1/embeddings".to_string(),
        Provider::Voyage => "https://api.voyageai.com/v1/embeddings".to_string(),
        Provider::OpenAi => "https://api.openai.com/v1/embeddings".to_string(),
        Provider::Cohere => "https://api.cohere.ai/v1/embed".to_string(),
        Provider::HuggingFace => "https://api-inference.huggingface.co/pipeline/feature-extraction".to_string(),
        Provider::Ollama => format!("{}/api/embeddings", base_url.unwrap_or("http://localhost:11434")),
        Provider::Custom => base_url.unwrap_or_default().to_string(),
        Provider::LocalTransformer => unreachable!("local_transformer never makes an HTTP call"),
    }
}

#[derive(Debug, Deserialize)]
struct IndexedEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OpenAiLikeResponse {
    data: Vec<IndexedEmbedding>,
}

#[derive(Debug, Deserialize)]
struct CohereResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

/// Blocking HTTP call, executed inside `spawn_blocking` by the caller.
/// `texts` order must be preserved in the return value; OpenAI-shaped
/// responses carry a per-item `index` and are re-sorted defensively.
pub fn embed_remote_sync(
    provider: Provider,
    api_key: Option<&str>,
    base_url: Option<&str>,
    model: &str,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = endpoint(provider, base_url);

    match provider {
        Provider::Cohere => {
            let body = serde_json::json!({ "model": model, "texts": texts, "input_type": "search_document" });
            let resp: CohereResponse = post_json(&url, api_key, &body)?;
            Ok(resp.embeddings)
        }
        Provider::Ollama => {
            let mut out = Vec::with_capacity(texts.len());
            for t in texts {
                let body = serde_json::json!({ "model": model, "prompt": t });
                let resp: OllamaResponse = post_json(&url, api_key, &body)?;
                out.push(resp.embedding);
            }
            Ok(out)
        }
        Provider::HuggingFace => {
            let body = serde_json::json!({ "inputs": texts });
            let embeddings: Vec<Vec<f32>> = post_json(&url, api_key, &body)?;
            Ok(embeddings)
        }
        _ => {
            let body = serde_json::json!({ "model": model, "input": texts });
            let resp: OpenAiLikeResponse = post_json(&url, api_key, &body)?;
            let mut items = resp.data;
            items.sort_by_key(|e| e.index.unwrap_or(0));
            Ok(items.into_iter().map(|e| e.embedding).collect())
        }
    }
}

fn post_json<T: serde::de::DeserializeOwned>(url: &str, api_key: Option<&str>, body: &serde_json::Value) -> Result<T> {
    let mut req = ureq::post(url);
    if let Some(key) = api_key {
        req = req.set("Authorization", &format!("Bearer {key}"));
    }
    req = req.set("Content-Type", "application/json");

    match req.send_json(body.clone()) {
        Ok(resp) => resp
            .into_json::<T>()
            .map_err(|e| IndexError::UpstreamTransient(format!("failed to parse embedding response: {e}"))),
        Err(ureq::Error::Status(code, resp)) => {
            let message = resp.into_string().unwrap_or_default();
            if code == 429 {
                Err(IndexError::RateLimited { attempts: 1, message })
            } else if IndexError::is_retryable_status(code) {
                Err(IndexError::UpstreamTransient(format!("{code}: {message}")))
            } else {
                Err(IndexError::UpstreamFatal(format!("{code}: {message}")))
            }
        }
        Err(ureq::Error::Transport(t)) => Err(IndexError::UpstreamTransient(t.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_model_substitutes_default_on_mismatch() {
        let resolved = validate_model(Provider::OpenAi, Some("not-an-openai-model"));
        assert_eq!(resolved, default_model(Provider::OpenAi));
    }

    #[test]
    fn validate_model_keeps_matching_name() {
        let resolved = validate_model(Provider::Voyage, Some("voyage-large-2"));
        assert_eq!(resolved, "voyage-large-2");
    }

    #[test]
    fn custom_provider_keeps_name_verbatim_even_if_unusual() {
        let resolved = validate_model(Provider::Custom, Some("anything-goes"));
        assert_eq!(resolved, "anything-goes");
    }

    #[test]
    fn limits_table_matches_spec_examples() {
        assert_eq!(provider_limits(Provider::Voyage), (3, 8));
        assert_eq!(provider_limits(Provider::Jina), (60, 100));
        assert_eq!(provider_limits(Provider::Ollama), (1000, 1));
        assert_eq!(provider_limits(Provider::LocalTransformer), (10_000, 32));
        assert_eq!(provider_limits(Provider::Custom), (60, 50));
    }
}
