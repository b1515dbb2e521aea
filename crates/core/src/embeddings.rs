use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Hashes character trigrams into a fixed number of buckets. Offline and deterministic.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_text(text))
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiEmbedderConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self, SearchError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut request = self
            .client
            .post(format!(
                "{}/embeddings",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: texts,
            });

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| SearchError::EmbeddingUnavailable(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::EmbeddingUnavailable(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let mut payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| SearchError::EmbeddingUnavailable(error.to_string()))?;

        if payload.data.len() != texts.len() {
            return Err(SearchError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                payload.data.len()
            )));
        }

        payload.data.sort_by_key(|item| item.index);
        payload
            .data
            .into_iter()
            .map(|item| {
                if item.embedding.len() == self.config.dimensions {
                    Ok(item.embedding)
                } else {
                    Err(SearchError::EmbeddingUnavailable(format!(
                        "embedding dimension {} != {}",
                        item.embedding.len(),
                        self.config.dimensions
                    )))
                }
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| SearchError::EmbeddingUnavailable("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            vectors.extend(self.request(batch).await?);
        }
        Ok(vectors)
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let norm_left = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let norm_right = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm_left < f32::EPSILON || norm_right < f32::EPSILON {
        0.0
    } else {
        dot / (norm_left * norm_right)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        cosine_similarity, CharacterNgramEmbedder, Embedder, OpenAiEmbedder, OpenAiEmbedderConfig,
    };
    use crate::fake_http::respond_once;
    use crate::SearchError;
    use std::time::Duration;

    fn remote_embedder(base_url: String) -> OpenAiEmbedder {
        OpenAiEmbedder::new(OpenAiEmbedderConfig {
            base_url,
            api_key: None,
            model: "embed-test".to_string(),
            dimensions: 3,
            batch_size: 16,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Termination notice period").await.unwrap();
        let second = embedder.embed("Termination notice period").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vectors = embedder
            .embed_batch(&["abc".to_string(), "defg".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 32));
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let vector = CharacterNgramEmbedder::default().embed_text("rent deposit");
        assert!((cosine_similarity(&vector, &vector) - 1.0).abs() < 1e-5);
        assert_eq!(cosine_similarity(&vector, &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn error_status_maps_to_embedding_unavailable() {
        let embedder = remote_embedder(respond_once("503 Service Unavailable", r#"{"error":"overloaded"}"#).await);
        match embedder.embed("rent").await {
            Err(SearchError::EmbeddingUnavailable(message)) => {
                assert!(message.contains("503"), "{message}");
            }
            other => panic!("expected embedding unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_maps_to_embedding_unavailable() {
        let embedder = remote_embedder(respond_once("200 OK", r#"{"data":"nope"}"#).await);
        let result = embedder.embed("rent").await;
        assert!(matches!(result, Err(SearchError::EmbeddingUnavailable(_))));
    }

    #[tokio::test]
    async fn wrong_dimension_maps_to_embedding_unavailable() {
        let embedder = remote_embedder(
            respond_once("200 OK", r#"{"data":[{"index":0,"embedding":[0.1,0.2]}]}"#).await,
        );
        match embedder.embed("rent").await {
            Err(SearchError::EmbeddingUnavailable(message)) => {
                assert!(message.contains("dimension 2 != 3"), "{message}");
            }
            other => panic!("expected embedding unavailable, got {other:?}"),
        }
    }
}
