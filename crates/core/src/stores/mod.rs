pub mod blob_fs;
pub mod file_index;
pub mod memory_index;
pub mod qdrant;
pub mod sqlite;

pub use blob_fs::FsBlobStore;
pub use file_index::FileIndex;
pub use memory_index::MemoryIndex;
pub use qdrant::QdrantStore;
pub use sqlite::SqliteStore;

use crate::embeddings::cosine_similarity;
use crate::{Passage, ScoredPassage, SearchError};

/// Brute-force cosine ranking. Ties fall back to chunk order so results are stable.
pub(crate) fn rank_passages<'a>(
    entries: impl Iterator<Item = (&'a Passage, &'a [f32])>,
    query_vector: &[f32],
    top_k: usize,
) -> Vec<ScoredPassage> {
    let mut scored = entries
        .map(|(passage, vector)| ScoredPassage {
            passage: passage.clone(),
            score: cosine_similarity(query_vector, vector),
        })
        .collect::<Vec<_>>();

    scored.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.passage.chunk_index.cmp(&right.passage.chunk_index))
    });
    scored.truncate(top_k);
    scored
}

pub(crate) fn check_embeddings(
    passages: &[Passage],
    embeddings: &[Vec<f32>],
) -> Result<(), SearchError> {
    if passages.len() != embeddings.len() {
        return Err(SearchError::Request(format!(
            "embedding count {} doesn't match passage count {}",
            embeddings.len(),
            passages.len()
        )));
    }
    if let Some(first) = embeddings.first() {
        if embeddings.iter().any(|vector| vector.len() != first.len()) {
            return Err(SearchError::Request(
                "embeddings have mixed dimensions".to_string(),
            ));
        }
    }
    Ok(())
}
