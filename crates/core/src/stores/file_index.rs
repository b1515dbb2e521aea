use super::{check_embeddings, rank_passages};
use crate::traits::PassageIndex;
use crate::{IndexHandle, Passage, ScoredPassage, SearchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct CollectionFile {
    handle: IndexHandle,
    dimensions: usize,
    entries: Vec<CollectionEntry>,
}

#[derive(Serialize, Deserialize)]
struct CollectionEntry {
    passage: Passage,
    vector: Vec<f32>,
}

/// One JSON file per collection under a directory.
///
/// Collections are written to a staging file and renamed into place, so a reader sees
/// either the whole collection or none of it.
pub struct FileIndex {
    root: PathBuf,
}

impl FileIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collection_path(&self, handle: &IndexHandle) -> Result<PathBuf, SearchError> {
        let valid = !handle.as_str().is_empty()
            && handle
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SearchError::Request(format!(
                "index handle {handle} is not a valid collection name"
            )));
        }
        Ok(self.root.join(format!("{}.json", handle.as_str())))
    }
}

#[async_trait]
impl PassageIndex for FileIndex {
    async fn create_collection(
        &self,
        handle: &IndexHandle,
        passages: &[Passage],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        check_embeddings(passages, embeddings)?;
        let path = self.collection_path(handle)?;

        let file = CollectionFile {
            handle: handle.clone(),
            dimensions: embeddings.first().map(Vec::len).unwrap_or(0),
            entries: passages
                .iter()
                .cloned()
                .zip(embeddings.iter().cloned())
                .map(|(passage, vector)| CollectionEntry { passage, vector })
                .collect(),
        };

        tokio::fs::create_dir_all(&self.root).await?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec(&file)?).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(handle = %handle, entries = file.entries.len(), "collection written");
        Ok(())
    }

    async fn drop_collection(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
        let path = self.collection_path(handle)?;
        let _ = tokio::fs::remove_file(path.with_extension("json.tmp")).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn collection_exists(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
        let path = self.collection_path(handle)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn search(
        &self,
        handle: &IndexHandle,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, SearchError> {
        let path = self.collection_path(handle)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(SearchError::IndexNotFound(handle.to_string()));
            }
            Err(error) => return Err(error.into()),
        };

        let file: CollectionFile = serde_json::from_slice(&bytes)?;
        if file.dimensions != 0 && file.dimensions != query_vector.len() {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                file.dimensions
            )));
        }

        Ok(rank_passages(
            file.entries
                .iter()
                .map(|entry| (&entry.passage, entry.vector.as_slice())),
            query_vector,
            top_k,
        ))
    }
}
