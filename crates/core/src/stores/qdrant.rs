use super::check_embeddings;
use crate::traits::PassageIndex;
use crate::{IndexHandle, Passage, ScoredPassage, SearchError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

/// Qdrant backend: every index handle is its own Qdrant collection.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            vector_size,
        }
    }

    fn collection_url(&self, handle: &IndexHandle) -> String {
        format!("{}/collections/{}", self.endpoint, handle.as_str())
    }

    fn backend_error(status: StatusCode) -> SearchError {
        SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        }
    }

    async fn recreate_collection(&self, handle: &IndexHandle) -> Result<(), SearchError> {
        self.drop_collection(handle).await?;

        let response = self
            .client
            .put(self.collection_url(handle))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl PassageIndex for QdrantStore {
    async fn create_collection(
        &self,
        handle: &IndexHandle,
        passages: &[Passage],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        check_embeddings(passages, embeddings)?;

        let points = passages
            .iter()
            .zip(embeddings.iter())
            .map(|(passage, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": passage.chunk_index,
                    "vector": embedding,
                    "payload": {
                        "passage_id": passage.passage_id,
                        "document_id": passage.document_id,
                        "chunk_index": passage.chunk_index,
                        "page_start": passage.page_start,
                        "page_end": passage.page_end,
                        "text": passage.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        self.recreate_collection(handle).await?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(handle)))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        Ok(())
    }

    async fn drop_collection(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
        let response = self
            .client
            .delete(self.collection_url(handle))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed.pointer("/result").and_then(Value::as_bool).unwrap_or(true))
    }

    async fn collection_exists(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
        let response = self.client.get(self.collection_url(handle)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Self::backend_error(status)),
        }
    }

    async fn search(
        &self,
        handle: &IndexHandle,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(handle)))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SearchError::IndexNotFound(handle.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let mut result = parse_hits(&parsed)?;
        result.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.passage.chunk_index.cmp(&right.passage.chunk_index))
        });
        Ok(result)
    }
}

fn parse_hits(parsed: &Value) -> Result<Vec<ScoredPassage>, SearchError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::new();
    for hit in hits {
        let document_id = hit
            .pointer("/payload/document_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "hit without document_id payload".to_string(),
            })?;
        let page = |pointer: &str| {
            hit.pointer(pointer)
                .and_then(Value::as_u64)
                .unwrap_or_default() as u32
        };

        result.push(ScoredPassage {
            passage: Passage {
                passage_id: hit
                    .pointer("/payload/passage_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                document_id,
                chunk_index: hit
                    .pointer("/payload/chunk_index")
                    .and_then(Value::as_u64)
                    .unwrap_or_default(),
                page_start: page("/payload/page_start"),
                page_end: page("/payload/page_end"),
                text: hit
                    .pointer("/payload/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
        });
    }

    Ok(result)
}
