use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::extractor::extract_page_texts;
use crate::fingerprint::fingerprint_stream;
use crate::index::IndexManager;
use crate::models::{Document, IndexHandle};
use crate::store::{BlobStore, DocumentStore};
use crate::{IngestError, StoreError};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const UPLOAD_EXTENSIONS: [&str; 2] = ["pdf", "txt"];

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                UPLOAD_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderUploadReport {
    pub uploaded: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub document_id: Uuid,
    pub index_removed: bool,
    /// Set when the index backend refused the delete; the record is soft-deleted anyway.
    pub index_error: Option<String>,
    pub blob_removed: bool,
}

/// Upload, processing and deletion of a user's documents.
pub struct DocumentService {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    index: Arc<IndexManager>,
    chunking: ChunkingConfig,
}

impl DocumentService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        index: Arc<IndexManager>,
    ) -> Self {
        Self {
            documents,
            blobs,
            index,
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Result<Self, IngestError> {
        chunking.validate()?;
        self.chunking = chunking;
        Ok(self)
    }

    /// Stores a new document for `user_id` without processing it.
    ///
    /// The record claims the `(user, fingerprint)` key before any bytes are written, so
    /// the loser of two concurrent identical uploads never touches the shared blob. Any
    /// later failure, or an ambiguous store error on the claim itself, removes the record.
    pub async fn upload<R>(
        &self,
        user_id: &str,
        original_name: &str,
        stream: &mut R,
    ) -> Result<Document, IngestError>
    where
        R: Read + Seek + Send,
    {
        if user_id.trim().is_empty() {
            return Err(IngestError::InvalidArgument("user id is empty".to_string()));
        }
        if original_name.trim().is_empty() {
            return Err(IngestError::InvalidArgument("file name is empty".to_string()));
        }

        let fingerprint = fingerprint_stream(stream)?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        stream.seek(SeekFrom::Start(0))?;

        if self
            .documents
            .find_by_fingerprint(user_id, &fingerprint)
            .await?
            .is_some()
        {
            return Err(IngestError::DuplicateContent {
                fingerprint: fingerprint.to_string(),
            });
        }

        let mut document = Document::new(user_id, original_name, fingerprint);
        match self.documents.create_document(&document).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(IngestError::DuplicateContent {
                    fingerprint: document.fingerprint.to_string(),
                });
            }
            Err(error) => {
                self.forget(&document).await;
                return Err(error.into());
            }
        }

        let blob_handle = match self
            .blobs
            .save(user_id, &document.blob_name(), &bytes)
            .await
        {
            Ok(handle) => handle,
            Err(error) => {
                self.forget(&document).await;
                return Err(error.into());
            }
        };
        if let Err(error) = self
            .documents
            .set_blob_handle(document.document_id, &blob_handle)
            .await
        {
            self.forget(&document).await;
            return Err(error.into());
        }
        document.blob_handle = Some(blob_handle);

        info!(
            document_id = %document.document_id,
            fingerprint = %document.fingerprint,
            bytes = bytes.len(),
            "document uploaded"
        );
        Ok(document)
    }

    async fn forget(&self, document: &Document) {
        if let Err(error) = self.documents.hard_delete(document.document_id).await {
            warn!(
                document_id = %document.document_id,
                error = %error,
                "could not remove record after failed upload"
            );
        }
    }

    pub async fn upload_file(&self, user_id: &str, path: &Path) -> Result<Document, IngestError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("path has no file name: {}", path.display()))
            })?;
        let mut file = File::open(path)?;
        self.upload(user_id, name, &mut file).await
    }

    /// Uploads and processes every supported file under `folder`, skipping failures.
    pub async fn upload_folder(
        &self,
        user_id: &str,
        folder: &Path,
    ) -> Result<FolderUploadReport, IngestError> {
        let files = discover_documents(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no supported files found in {}",
                folder.display()
            )));
        }

        let mut uploaded = Vec::new();
        let mut skipped = Vec::new();
        for path in files {
            let result = async {
                let document = self.upload_file(user_id, &path).await?;
                self.process_document(user_id, document.document_id).await
            }
            .await;

            match result {
                Ok(document) => uploaded.push(document),
                Err(error) => skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(FolderUploadReport { uploaded, skipped })
    }

    /// Extracts, chunks and indexes a stored document. Safe to re-run while the document
    /// is unprocessed; any failure leaves it unprocessed.
    pub async fn process_document(
        &self,
        user_id: &str,
        document_id: Uuid,
    ) -> Result<Document, IngestError> {
        let document = self.owned_document(user_id, document_id).await?;
        if document.processed {
            return Ok(document);
        }

        let blob_handle = document.blob_handle.clone().ok_or_else(|| {
            IngestError::InvalidArgument(format!("document {document_id} has no stored content"))
        })?;
        let bytes = self.blobs.read(&blob_handle).await?;

        let pages = tokio::task::spawn_blocking(move || extract_page_texts(&bytes))
            .await
            .map_err(|error| IngestError::PdfParse(format!("extraction task failed: {error}")))??;
        let passages = chunk_pages(
            document.document_id,
            &document.original_name,
            &pages,
            &self.chunking,
        )?;

        let handle = self.index.build(&document, &passages).await?;
        if let Err(error) = self.documents.mark_processed(document_id, &handle).await {
            self.discard_index(&handle).await;
            return Err(error.into());
        }

        info!(
            document_id = %document_id,
            handle = %handle,
            pages = pages.len(),
            passages = passages.len(),
            "document processed"
        );
        self.owned_document(user_id, document_id).await
    }

    async fn discard_index(&self, handle: &IndexHandle) {
        if let Err(error) = self.index.delete(handle).await {
            warn!(handle = %handle, error = %error, "could not discard index");
        }
    }

    /// Removes the index and the raw bytes, then soft-deletes the record. Index and blob
    /// failures are logged and reported but never stop the soft delete.
    pub async fn delete_document(
        &self,
        user_id: &str,
        document_id: Uuid,
    ) -> Result<DeletionReport, IngestError> {
        let document = self.owned_document(user_id, document_id).await?;

        let handle = document
            .index_handle
            .clone()
            .unwrap_or_else(|| IndexHandle::for_document(&document.user_id, document_id));
        let (index_removed, index_error) = match self.index.delete(&handle).await {
            Ok(removed) => (removed, None),
            Err(error) => {
                warn!(handle = %handle, error = %error, "index delete failed");
                (false, Some(error.to_string()))
            }
        };

        let blob_removed = match &document.blob_handle {
            Some(blob) => match self.blobs.delete(blob).await {
                Ok(removed) => removed,
                Err(error) => {
                    warn!(blob = %blob, error = %error, "blob delete failed");
                    false
                }
            },
            None => false,
        };

        self.documents.soft_delete(document_id).await?;
        info!(document_id = %document_id, index_removed, blob_removed, "document deleted");

        Ok(DeletionReport {
            document_id,
            index_removed,
            index_error,
            blob_removed,
        })
    }

    pub async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>, IngestError> {
        Ok(self.documents.list_documents(user_id).await?)
    }

    pub async fn get_document(&self, user_id: &str, document_id: Uuid) -> Result<Document, IngestError> {
        self.owned_document(user_id, document_id).await
    }

    async fn owned_document(&self, user_id: &str, document_id: Uuid) -> Result<Document, IngestError> {
        self.documents
            .get_document(document_id)
            .await?
            .filter(|document| document.is_owned_by(user_id))
            .ok_or_else(|| IngestError::DocumentNotFound(document_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{Fingerprint, Passage, ScoredPassage};
    use crate::stores::{FsBlobStore, MemoryIndex, SqliteStore};
    use crate::traits::PassageIndex;
    use crate::SearchError;
    use async_trait::async_trait;
    use std::fs;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    struct BrokenBlobs;

    #[async_trait]
    impl BlobStore for BrokenBlobs {
        async fn save(&self, _user_id: &str, _name: &str, _bytes: &[u8]) -> Result<String, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        async fn read(&self, handle: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::NotFound(handle.to_string()))
        }

        async fn delete(&self, _handle: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    /// Commits the first insert but reports it as failed, like a connection dropped
    /// after the write reached the database.
    struct LostAckDocuments {
        inner: Arc<SqliteStore>,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for LostAckDocuments {
        async fn create_document(&self, document: &Document) -> Result<(), StoreError> {
            self.inner.create_document(document).await?;
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("connection reset")));
            }
            Ok(())
        }

        async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>, StoreError> {
            self.inner.get_document(document_id).await
        }

        async fn find_by_fingerprint(
            &self,
            user_id: &str,
            fingerprint: &Fingerprint,
        ) -> Result<Option<Document>, StoreError> {
            self.inner.find_by_fingerprint(user_id, fingerprint).await
        }

        async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>, StoreError> {
            self.inner.list_documents(user_id).await
        }

        async fn set_blob_handle(&self, document_id: Uuid, blob_handle: &str) -> Result<(), StoreError> {
            self.inner.set_blob_handle(document_id, blob_handle).await
        }

        async fn mark_processed(
            &self,
            document_id: Uuid,
            index_handle: &IndexHandle,
        ) -> Result<(), StoreError> {
            self.inner.mark_processed(document_id, index_handle).await
        }

        async fn soft_delete(&self, document_id: Uuid) -> Result<(), StoreError> {
            self.inner.soft_delete(document_id).await
        }

        async fn hard_delete(&self, document_id: Uuid) -> Result<(), StoreError> {
            self.inner.hard_delete(document_id).await
        }
    }

    /// Index backend that can be told to refuse writes or drops.
    struct UnreliableIndex {
        inner: MemoryIndex,
        refuse_create: bool,
        refuse_drop: bool,
    }

    #[async_trait]
    impl PassageIndex for UnreliableIndex {
        async fn create_collection(
            &self,
            handle: &IndexHandle,
            passages: &[Passage],
            embeddings: &[Vec<f32>],
        ) -> Result<(), SearchError> {
            if self.refuse_create {
                return Err(SearchError::Request("collection create refused".to_string()));
            }
            self.inner.create_collection(handle, passages, embeddings).await
        }

        async fn drop_collection(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
            if self.refuse_drop {
                return Err(SearchError::Request("collection drop refused".to_string()));
            }
            self.inner.drop_collection(handle).await
        }

        async fn collection_exists(&self, handle: &IndexHandle) -> Result<bool, SearchError> {
            self.inner.collection_exists(handle).await
        }

        async fn search(
            &self,
            handle: &IndexHandle,
            query_vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<ScoredPassage>, SearchError> {
            self.inner.search(handle, query_vector, top_k).await
        }
    }

    struct Harness {
        store: Arc<SqliteStore>,
        index: Arc<MemoryIndex>,
        service: DocumentService,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let index = Arc::new(MemoryIndex::new());
        let service = service_over(store.clone(), index.clone(), &dir);
        Harness {
            store,
            index,
            service,
            _dir: dir,
        }
    }

    fn service_over(
        documents: Arc<dyn DocumentStore>,
        index: Arc<dyn PassageIndex>,
        dir: &tempfile::TempDir,
    ) -> DocumentService {
        let manager = Arc::new(IndexManager::new(
            index,
            Arc::new(CharacterNgramEmbedder::default()),
        ));
        DocumentService::new(
            documents,
            Arc::new(FsBlobStore::new(dir.path().join("blobs"))),
            manager,
        )
    }

    #[tokio::test]
    async fn duplicates_are_rejected_per_user_only() {
        let harness = harness().await;
        let content = b"Lease agreement between two parties.".to_vec();

        let first = harness
            .service
            .upload("alice", "lease.txt", &mut Cursor::new(content.clone()))
            .await
            .unwrap();
        assert_eq!(
            first.blob_handle.as_deref(),
            Some(format!("alice/{}.txt", first.fingerprint).as_str())
        );

        let again = harness
            .service
            .upload("alice", "copy.txt", &mut Cursor::new(content.clone()))
            .await;
        assert!(matches!(again, Err(IngestError::DuplicateContent { .. })));

        let other_user = harness
            .service
            .upload("bob", "lease.txt", &mut Cursor::new(content))
            .await
            .unwrap();
        assert_eq!(other_user.fingerprint, first.fingerprint);
    }

    #[tokio::test]
    async fn concurrent_identical_uploads_store_one_document() {
        let harness = harness().await;
        let content = b"Both tabs submitted the same lease.".to_vec();
        let mut left = Cursor::new(content.clone());
        let mut right = Cursor::new(content);

        let (first, second) = tokio::join!(
            harness.service.upload("alice", "lease.txt", &mut left),
            harness.service.upload("alice", "lease (1).txt", &mut right),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| matches!(outcome, Err(IngestError::DuplicateContent { .. })))
                .count(),
            1
        );

        let documents = harness.store.list_documents("alice").await.unwrap();
        assert_eq!(documents.len(), 1);
        assert!(documents[0].blob_handle.is_some());
    }

    #[tokio::test]
    async fn failed_blob_write_removes_the_record() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let manager = Arc::new(IndexManager::new(
            Arc::new(MemoryIndex::new()),
            Arc::new(CharacterNgramEmbedder::default()),
        ));
        let service = DocumentService::new(store.clone(), Arc::new(BrokenBlobs), manager);

        let result = service
            .upload("alice", "lease.txt", &mut Cursor::new(b"text".to_vec()))
            .await;
        assert!(matches!(result, Err(IngestError::Store(_))));
        assert!(store.list_documents("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_record_insert_can_be_retried() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let documents = Arc::new(LostAckDocuments {
            inner: store.clone(),
            failed_once: AtomicBool::new(false),
        });
        let service = service_over(documents, Arc::new(MemoryIndex::new()), &dir);
        let content = b"Notice of termination.".to_vec();

        let first = service
            .upload("alice", "notice.txt", &mut Cursor::new(content.clone()))
            .await;
        assert!(matches!(first, Err(IngestError::Store(StoreError::Io(_)))));
        assert!(store.list_documents("alice").await.unwrap().is_empty());

        let retry = service
            .upload("alice", "notice.txt", &mut Cursor::new(content))
            .await
            .unwrap();
        assert!(retry.blob_handle.is_some());

        let documents = store.list_documents("alice").await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].document_id, retry.document_id);
        assert_eq!(documents[0].blob_handle, retry.blob_handle);
    }

    #[tokio::test]
    async fn empty_extraction_leaves_document_unprocessed() {
        let harness = harness().await;
        let document = harness
            .service
            .upload("alice", "blank.txt", &mut Cursor::new(b"  \n\x0c \n".to_vec()))
            .await
            .unwrap();

        let result = harness
            .service
            .process_document("alice", document.document_id)
            .await;
        assert!(matches!(result, Err(IngestError::NoExtractableText(_))));
        assert_eq!(harness.index.collection_count(), 0);

        let stored = harness.service.get_document("alice", document.document_id).await.unwrap();
        assert!(!stored.processed);
        assert!(stored.index_handle.is_none());
    }

    #[tokio::test]
    async fn failed_index_build_leaves_document_unprocessed() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let index = Arc::new(UnreliableIndex {
            inner: MemoryIndex::new(),
            refuse_create: true,
            refuse_drop: false,
        });
        let service = service_over(store.clone(), index.clone(), &dir);

        let document = service
            .upload("alice", "lease.txt", &mut Cursor::new(b"The rent is due monthly.".to_vec()))
            .await
            .unwrap();
        let result = service.process_document("alice", document.document_id).await;
        assert!(matches!(result, Err(IngestError::IndexBuildFailed(_))));
        assert_eq!(index.inner.collection_count(), 0);

        let stored = service.get_document("alice", document.document_id).await.unwrap();
        assert!(!stored.processed);
        assert!(stored.index_handle.is_none());
    }

    #[tokio::test]
    async fn process_then_delete() {
        let harness = harness().await;
        let document = harness
            .service
            .upload(
                "alice",
                "lease.txt",
                &mut Cursor::new(b"The rent is due monthly.\x0cPets are not allowed.".to_vec()),
            )
            .await
            .unwrap();

        let processed = harness
            .service
            .process_document("alice", document.document_id)
            .await
            .unwrap();
        assert!(processed.processed);
        assert_eq!(
            processed.index_handle,
            Some(IndexHandle::for_document("alice", document.document_id))
        );
        assert_eq!(harness.index.collection_count(), 1);

        assert!(matches!(
            harness.service.process_document("bob", document.document_id).await,
            Err(IngestError::DocumentNotFound(_))
        ));

        let report = harness
            .service
            .delete_document("alice", document.document_id)
            .await
            .unwrap();
        assert!(report.index_removed);
        assert!(report.blob_removed);
        assert!(report.index_error.is_none());
        assert_eq!(harness.index.collection_count(), 0);

        assert!(harness.service.list_documents("alice").await.unwrap().is_empty());
        let record = harness
            .store
            .get_document(document.document_id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_deleted);
        assert!(record.deleted_at.is_some());

        let reupload = harness
            .service
            .upload(
                "alice",
                "lease.txt",
                &mut Cursor::new(b"The rent is due monthly.\x0cPets are not allowed.".to_vec()),
            )
            .await;
        assert!(reupload.is_ok());
    }

    #[tokio::test]
    async fn index_delete_failure_still_soft_deletes() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let index = Arc::new(UnreliableIndex {
            inner: MemoryIndex::new(),
            refuse_create: false,
            refuse_drop: true,
        });
        let service = service_over(store.clone(), index.clone(), &dir);

        let document = service
            .upload("alice", "lease.txt", &mut Cursor::new(b"Deposit is returned.".to_vec()))
            .await
            .unwrap();
        service.process_document("alice", document.document_id).await.unwrap();

        let report = service.delete_document("alice", document.document_id).await.unwrap();
        assert!(!report.index_removed);
        assert!(report
            .index_error
            .as_deref()
            .is_some_and(|error| error.contains("collection drop refused")));
        assert!(report.blob_removed);

        assert!(service.list_documents("alice").await.unwrap().is_empty());
        let record = store.get_document(document.document_id).await.unwrap().unwrap();
        assert!(record.is_deleted);
        assert_eq!(index.inner.collection_count(), 1);
    }

    #[tokio::test]
    async fn upload_rewinds_the_stream() {
        let harness = harness().await;
        let mut stream = Cursor::new(b"abc".to_vec());
        stream.set_position(2);
        harness.service.upload("alice", "a.txt", &mut stream).await.unwrap();
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn discovery_is_recursive_and_filters_extensions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("a.pdf"), b"%PDF-1.4\n%fake")?;
        fs::write(nested.join("b.TXT"), b"notes")?;
        fs::write(nested.join("c.docx"), b"ignored")?;

        let files = discover_documents(dir.path());
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn folder_upload_skips_unreadable_files() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness().await;
        let dir = tempdir()?;
        fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(dir.path().join("notes.txt"), b"Payment within thirty days.")?;

        let report = harness.service.upload_folder("alice", dir.path()).await?;
        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            report.skipped[0].path.file_name().and_then(|name| name.to_str()),
            Some("broken.pdf")
        );
        Ok(())
    }
}
