//! Embedding endpoint client and vector utilities.
//!
//! [`EmbeddingClient`] turns text into vectors by calling an external HTTP
//! endpoint described by an [`EmbeddingConfig`] row. Two wire shapes are
//! supported and normalized to the same `Vec<f32>` contract:
//!
//! - **OpenAI-compatible** — `POST {api_url}/embeddings` with
//!   `{model, input}` answered by `{data: [{embedding}]}`.
//! - **Qwen/DashScope-compatible** — `{model, input: {texts}}` answered by
//!   `{output: {embeddings: [{embedding}]}}`.
//!
//! Also provides the vector plumbing used by storage and search:
//! - [`cosine_similarity`] — compute similarity between two vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for
//!   SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Batching
//!
//! Qwen-style endpoints cap batch embedding at 10 texts per request; other
//! providers accept far larger batches. [`EmbeddingClient::generate_batch`]
//! slices its input accordingly, issues the requests sequentially, and
//! reassembles the vectors in input order.
//!
//! # Failure behavior
//!
//! A non-2xx response becomes [`Error::Provider`] carrying the status and
//! body; a 2xx response without the expected vector field becomes
//! [`Error::Format`]. Either aborts the whole call — a partial batch is
//! never returned.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::config::EmbeddingHttpConfig;
use crate::error::{Error, Result};
use crate::models::EmbeddingConfig;

/// Fixed sentence sent by [`EmbeddingClient::probe`].
const PROBE_TEXT: &str = "This is a test sentence for embedding generation.";

/// Qwen batch-embedding request cap.
const QWEN_BATCH_SIZE: usize = 10;
/// Batch size for OpenAI-compatible and other providers.
const DEFAULT_BATCH_SIZE: usize = 100;

/// HTTP client for embedding endpoints. Holds only the connection pool and
/// timeout; the endpoint itself comes from the [`EmbeddingConfig`] passed
/// to each call.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
}

/// Result of a connectivity probe, before dimension verification.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub latency_ms: u64,
    pub vector_dimension: usize,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingHttpConfig) -> Result<EmbeddingClient> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(EmbeddingClient { http })
    }

    /// Embed a single text with the given endpoint configuration.
    pub async fn generate(&self, text: &str, config: &EmbeddingConfig) -> Result<Vec<f32>> {
        let vectors = self.request_batch(&[text.to_string()], config).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Format("empty embedding response".to_string()))
    }

    /// Embed a batch of texts, preserving input order.
    pub async fn generate_batch(
        &self,
        texts: &[String],
        config: &EmbeddingConfig,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = if config.is_qwen_style() {
            QWEN_BATCH_SIZE
        } else {
            DEFAULT_BATCH_SIZE
        };

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let vectors = self.request_batch(batch, config).await?;
            all.extend(vectors);
        }

        debug!(
            model = %config.model_id,
            texts = texts.len(),
            "generated embeddings"
        );

        Ok(all)
    }

    /// Send the fixed probe sentence and report latency and the dimension
    /// the endpoint actually returned. Dimension verification against the
    /// configured value is the caller's job (`ConfigStore::test`).
    pub async fn probe(&self, config: &EmbeddingConfig) -> Result<ProbeOutcome> {
        let started = Instant::now();
        let vector = self.generate(PROBE_TEXT, config).await?;
        Ok(ProbeOutcome {
            latency_ms: started.elapsed().as_millis() as u64,
            vector_dimension: vector.len(),
        })
    }

    /// One HTTP round trip for one batch.
    async fn request_batch(
        &self,
        texts: &[String],
        config: &EmbeddingConfig,
    ) -> Result<Vec<Vec<f32>>> {
        let url = endpoint_url(&config.api_url);

        let body = if config.is_qwen_style() {
            serde_json::json!({
                "model": config.model_id,
                "input": { "texts": texts },
                "parameters": { "text_type": "document" },
            })
        } else {
            serde_json::json!({
                "model": config.model_id,
                "input": texts,
                "encoding_format": "float",
            })
        };

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let json: serde_json::Value = response.json().await?;
        let vectors = if config.is_qwen_style() {
            parse_qwen_response(&json)?
        } else {
            parse_openai_response(&json)?
        };

        if vectors.len() != texts.len() {
            return Err(Error::Format(format!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                vectors.len()
            )));
        }

        Ok(vectors)
    }
}

/// Normalize an endpoint base URL to the embeddings route. Full endpoint
/// URLs (already ending in `/embeddings`) pass through untouched.
fn endpoint_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if trimmed.ends_with("/embeddings") || trimmed.contains("text-embedding/text-embedding") {
        trimmed.to_string()
    } else {
        format!("{}/embeddings", trimmed)
    }
}

/// Extract `data[].embedding` from an OpenAI-shaped response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Format("missing 'data' array".to_string()))?;

    data.iter().map(extract_embedding).collect()
}

/// Extract `output.embeddings[].embedding` from a Qwen-shaped response.
fn parse_qwen_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("output")
        .and_then(|o| o.get("embeddings"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Format("missing 'output.embeddings' array".to_string()))?;

    embeddings.iter().map(extract_embedding).collect()
}

fn extract_embedding(item: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = item
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Format("item missing 'embedding' field".to_string()))?;

    embedding
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::Format("non-numeric embedding component".to_string()))
        })
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
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

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Mismatched lengths, empty vectors,
/// and zero-magnitude vectors all yield `0.0`.
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

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_appends_route() {
        assert_eq!(
            endpoint_url("https://api.openai.com/v1"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            endpoint_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn test_endpoint_url_keeps_full_route() {
        assert_eq!(
            endpoint_url("https://api.openai.com/v1/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn test_parse_openai_shape() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [0.1, 0.2], "index": 0},
                {"embedding": [0.3, 0.4], "index": 1},
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 2);
        assert!((vectors[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_qwen_shape() {
        let json = serde_json::json!({
            "output": {
                "embeddings": [
                    {"embedding": [1.0, 0.0, 0.0], "text_index": 0},
                ]
            },
            "usage": {"total_tokens": 3}
        });
        let vectors = parse_qwen_response(&json).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parse_missing_field_is_format_error() {
        let json = serde_json::json!({"data": [{"index": 0}]});
        assert!(matches!(
            parse_openai_response(&json),
            Err(Error::Format(_))
        ));

        let json = serde_json::json!({"unexpected": true});
        assert!(matches!(
            parse_qwen_response(&json),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_bounds() {
        let pairs = [
            (vec![0.3, -0.7, 0.2], vec![0.9, 0.1, -0.4]),
            (vec![5.0, 5.0], vec![-3.0, 8.0]),
            (vec![1e-3, 2e-3], vec![4e3, -2e3]),
        ];
        for (a, b) in &pairs {
            let sim = cosine_similarity(a, b);
            assert!((-1.0..=1.0).contains(&sim), "similarity out of range: {}", sim);
        }
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
