use crate::{IndexHandle, Passage, ScoredPassage, SearchError};
use async_trait::async_trait;

/// Storage backend holding one isolated collection per document.
#[async_trait]
pub trait PassageIndex: Send + Sync {
    /// Writes a complete collection under `handle`, replacing any previous one.
    async fn create_collection(
        &self,
        handle: &IndexHandle,
        passages: &[Passage],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError>;

    /// Returns `false` when there was nothing to drop.
    async fn drop_collection(&self, handle: &IndexHandle) -> Result<bool, SearchError>;

    async fn collection_exists(&self, handle: &IndexHandle) -> Result<bool, SearchError>;

    /// Most similar first. A missing collection is `SearchError::IndexNotFound`.
    async fn search(
        &self,
        handle: &IndexHandle,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, SearchError>;
}
