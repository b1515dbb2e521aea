//! Lifecycle of per-document indexes: build, check, query, delete.

use crate::embeddings::Embedder;
use crate::error::{IngestError, SearchError};
use crate::llm::with_deadline;
use crate::models::{Document, IndexHandle, Passage, ScoredPassage};
use crate::traits::PassageIndex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_TOP_K: usize = 3;

pub struct IndexManager {
    index: Arc<dyn PassageIndex>,
    embedder: Arc<dyn Embedder>,
    embed_timeout: Duration,
}

impl IndexManager {
    pub fn new(index: Arc<dyn PassageIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            embed_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Embeds every passage first and only then writes the collection. Any failure
    /// removes whatever the backend may have kept, so no partial index is left behind.
    pub async fn build(
        &self,
        document: &Document,
        passages: &[Passage],
    ) -> Result<IndexHandle, IngestError> {
        if passages.is_empty() {
            return Err(IngestError::NoExtractableText(document.original_name.clone()));
        }

        let handle = IndexHandle::for_document(&document.user_id, document.document_id);
        let texts = passages
            .iter()
            .map(|passage| passage.text.clone())
            .collect::<Vec<_>>();

        let embeddings = with_deadline(
            self.embed_timeout,
            self.embedder.embed_batch(&texts),
            SearchError::EmbeddingUnavailable,
        )
        .await
        .map_err(|error| IngestError::IndexBuildFailed(error.to_string()))?;

        if let Err(error) = self
            .index
            .create_collection(&handle, passages, &embeddings)
            .await
        {
            self.discard_partial(&handle).await;
            return Err(IngestError::IndexBuildFailed(error.to_string()));
        }

        info!(
            handle = %handle,
            document_id = %document.document_id,
            passages = passages.len(),
            "index built"
        );
        Ok(handle)
    }

    async fn discard_partial(&self, handle: &IndexHandle) {
        if let Err(error) = self.index.drop_collection(handle).await {
            warn!(handle = %handle, error = %error, "could not discard partial index");
        }
    }

    /// Idempotent: `Ok(false)` when the index was already absent.
    pub async fn delete(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
        let removed = self.index.drop_collection(handle).await?;
        info!(handle = %handle, removed, "index delete");
        Ok(removed)
    }

    pub async fn exists(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
        self.index.collection_exists(handle).await
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        with_deadline(
            self.embed_timeout,
            self.embedder.embed(text),
            SearchError::EmbeddingUnavailable,
        )
        .await
    }

    pub async fn search(
        &self,
        handle: &IndexHandle,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, SearchError> {
        self.index.search(handle, query_vector, top_k).await
    }

    /// Checks the index before paying for a query embedding, so a missing index is
    /// reported as `IndexNotFound` even when the embedding service is down.
    pub async fn retrieve(
        &self,
        handle: &IndexHandle,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, SearchError> {
        if !self.exists(handle).await? {
            return Err(SearchError::IndexNotFound(handle.to_string()));
        }
        let query_vector = self.embed(query).await?;
        self.search(handle, &query_vector, top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::Fingerprint;
    use crate::stores::MemoryIndex;
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, SearchError> {
            Err(SearchError::EmbeddingUnavailable("offline".to_string()))
        }
    }

    /// Writes the collection, then reports failure as a backend that died mid-write would.
    struct HalfWritingIndex(Arc<MemoryIndex>);

    #[async_trait]
    impl PassageIndex for HalfWritingIndex {
        async fn create_collection(
            &self,
            handle: &IndexHandle,
            passages: &[Passage],
            embeddings: &[Vec<f32>],
        ) -> Result<(), SearchError> {
            self.0.create_collection(handle, passages, embeddings).await?;
            Err(SearchError::Request("connection reset".to_string()))
        }

        async fn drop_collection(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
            self.0.drop_collection(handle).await
        }

        async fn collection_exists(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
            self.0.collection_exists(handle).await
        }

        async fn search(
            &self,
            handle: &IndexHandle,
            query_vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<ScoredPassage>, SearchError> {
            self.0.search(handle, query_vector, top_k).await
        }
    }

    fn passages(document: &Document, texts: &[&str]) -> Vec<Passage> {
        texts
            .iter()
            .enumerate()
            .map(|(position, text)| Passage {
                passage_id: format!("p{position}"),
                document_id: document.document_id,
                chunk_index: position as u64,
                page_start: 1,
                page_end: 1,
                text: text.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn build_then_retrieve_then_delete() {
        let index = Arc::new(MemoryIndex::new());
        let manager = IndexManager::new(index.clone(), Arc::new(CharacterNgramEmbedder::default()));
        let document = Document::new("alice", "lease.txt", Fingerprint::from_hex("f"));

        let handle = manager
            .build(&document, &passages(&document, &["rent is 500", "pets allowed", "deposit 1000", "keys"]))
            .await
            .expect("build should succeed");
        assert_eq!(handle, IndexHandle::for_document("alice", document.document_id));

        let hits = manager.retrieve(&handle, "pets", DEFAULT_TOP_K).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].passage.text, "pets allowed");

        assert!(manager.delete(&handle).await.unwrap());
        assert!(!manager.delete(&handle).await.unwrap());
        assert!(matches!(
            manager.retrieve(&handle, "pets", 3).await,
            Err(SearchError::IndexNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_embedding_leaves_no_collection() {
        let index = Arc::new(MemoryIndex::new());
        let manager = IndexManager::new(index.clone(), Arc::new(FailingEmbedder));
        let document = Document::new("alice", "lease.txt", Fingerprint::from_hex("f"));

        let result = manager.build(&document, &passages(&document, &["text"])).await;
        assert!(matches!(result, Err(IngestError::IndexBuildFailed(_))));
        assert_eq!(index.collection_count(), 0);
    }

    #[tokio::test]
    async fn failed_collection_write_is_discarded() {
        let backing = Arc::new(MemoryIndex::new());
        let manager = IndexManager::new(
            Arc::new(HalfWritingIndex(backing.clone())),
            Arc::new(CharacterNgramEmbedder::default()),
        );
        let document = Document::new("alice", "lease.txt", Fingerprint::from_hex("f"));

        let result = manager.build(&document, &passages(&document, &["rent is 500"])).await;
        assert!(matches!(result, Err(IngestError::IndexBuildFailed(_))));
        assert_eq!(backing.collection_count(), 0);
        assert!(!manager
            .exists(&IndexHandle::for_document("alice", document.document_id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_index_wins_over_embedding_outage() {
        let manager = IndexManager::new(Arc::new(MemoryIndex::new()), Arc::new(FailingEmbedder));
        let handle = IndexHandle::from_raw("nothing_here");
        assert!(matches!(
            manager.retrieve(&handle, "q", 3).await,
            Err(SearchError::IndexNotFound(_))
        ));
    }
}
