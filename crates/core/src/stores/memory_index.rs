use super::{check_embeddings, rank_passages};
use crate::traits::PassageIndex;
use crate::{IndexHandle, Passage, ScoredPassage, SearchError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

struct Collection {
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
}

/// Arena of collections keyed by handle. Each collection is an immutable `Arc`, so a
/// search in flight keeps reading the collection it started on even if it is dropped.
#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<IndexHandle, Arc<Collection>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_count(&self) -> usize {
        self.collections.read().map(|map| map.len()).unwrap_or(0)
    }

    fn poisoned() -> SearchError {
        SearchError::Request("memory index lock poisoned".to_string())
    }
}

#[async_trait]
impl PassageIndex for MemoryIndex {
    async fn create_collection(
        &self,
        handle: &IndexHandle,
        passages: &[Passage],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        check_embeddings(passages, embeddings)?;
        let collection = Arc::new(Collection {
            passages: passages.to_vec(),
            vectors: embeddings.to_vec(),
        });
        self.collections
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(handle.clone(), collection);
        Ok(())
    }

    async fn drop_collection(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
        Ok(self
            .collections
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(handle)
            .is_some())
    }

    async fn collection_exists(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
        Ok(self
            .collections
            .read()
            .map_err(|_| Self::poisoned())?
            .contains_key(handle))
    }

    async fn search(
        &self,
        handle: &IndexHandle,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, SearchError> {
        let collection = self
            .collections
            .read()
            .map_err(|_| Self::poisoned())?
            .get(handle)
            .cloned()
            .ok_or_else(|| SearchError::IndexNotFound(handle.to_string()))?;

        Ok(rank_passages(
            collection
                .passages
                .iter()
                .zip(collection.vectors.iter().map(Vec::as_slice)),
            query_vector,
            top_k,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use uuid::Uuid;

    fn passage(document_id: Uuid, index: u64, text: &str) -> Passage {
        Passage {
            passage_id: format!("{document_id}-{index}"),
            document_id,
            chunk_index: index,
            page_start: 1,
            page_end: 1,
            text: text.to_string(),
        }
    }

    async fn seed(index: &MemoryIndex, handle: &IndexHandle, document_id: Uuid, texts: &[&str]) {
        let embedder = CharacterNgramEmbedder::default();
        let passages = texts
            .iter()
            .enumerate()
            .map(|(position, text)| passage(document_id, position as u64, text))
            .collect::<Vec<_>>();
        let vectors = texts.iter().map(|text| embedder.embed_text(text)).collect::<Vec<_>>();
        index
            .create_collection(handle, &passages, &vectors)
            .await
            .expect("collection should be created");
    }

    #[tokio::test]
    async fn searches_stay_inside_one_collection() {
        let index = MemoryIndex::new();
        let alice_doc = Uuid::new_v4();
        let bob_doc = Uuid::new_v4();
        let alice = IndexHandle::for_document("alice", alice_doc);
        let bob = IndexHandle::for_document("bob", bob_doc);
        seed(&index, &alice, alice_doc, &["rent is due monthly", "deposit returned"]).await;
        seed(&index, &bob, bob_doc, &["rent is due monthly exactly"]).await;

        let query = CharacterNgramEmbedder::default().embed_text("rent due");
        let hits = index.search(&alice, &query, 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.passage.document_id == alice_doc));
        assert_eq!(hits[0].passage.text, "rent is due monthly");
    }

    #[tokio::test]
    async fn missing_index_differs_from_empty_result() {
        let index = MemoryIndex::new();
        let document_id = Uuid::new_v4();
        let handle = IndexHandle::for_document("alice", document_id);
        seed(&index, &handle, document_id, &["only passage"]).await;

        let empty = index.search(&handle, &[0.0; 128], 0).await.unwrap();
        assert!(empty.is_empty());

        assert!(index.drop_collection(&handle).await.unwrap());
        assert!(!index.drop_collection(&handle).await.unwrap());
        let missing = index.search(&handle, &[0.0; 128], 3).await;
        assert!(matches!(missing, Err(SearchError::IndexNotFound(_))));
    }

    #[tokio::test]
    async fn equal_scores_keep_chunk_order() {
        let index = MemoryIndex::new();
        let document_id = Uuid::new_v4();
        let handle = IndexHandle::for_document("alice", document_id);
        seed(&index, &handle, document_id, &["same text", "same text", "same text"]).await;

        let query = CharacterNgramEmbedder::default().embed_text("same text");
        let order = index
            .search(&handle, &query, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|hit| hit.passage.chunk_index)
            .collect::<Vec<_>>();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
