use crate::store::BlobStore;
use crate::StoreError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Raw uploads on disk, one directory per user. Handles are paths relative to the root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, handle: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(handle);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if handle.is_empty() || escapes {
            return Err(StoreError::NotFound(format!("invalid blob handle: {handle}")));
        }
        Ok(self.root.join(relative))
    }
}

fn path_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, user_id: &str, name: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let user_dir = path_segment(user_id);
        let file_name = path_segment(name);
        if user_dir.is_empty() || file_name.is_empty() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot derive blob path from user {user_id:?} and name {name:?}"),
            )));
        }

        let handle = format!("{user_dir}/{file_name}");
        let target = self.resolve(&handle)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(handle)
    }

    async fn read(&self, handle: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(handle)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("blob {handle}")))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, handle: &str) -> Result<bool, StoreError> {
        let path = self.resolve(handle)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}
