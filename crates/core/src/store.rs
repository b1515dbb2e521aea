//! Record stores the engine consumes. Implementations live in [`crate::stores`].

use crate::models::{
    ArtifactKind, Document, Fingerprint, GeneratedArtifact, IndexHandle, Message, NewMessage,
    Session,
};
use crate::StoreError;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fails with `StoreError::Conflict` when the user already has a live document with
    /// the same fingerprint.
    async fn create_document(&self, document: &Document) -> Result<(), StoreError>;

    async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>, StoreError>;

    async fn find_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Document>, StoreError>;

    /// Live documents of a user, newest upload first.
    async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>, StoreError>;

    async fn set_blob_handle(&self, document_id: Uuid, blob_handle: &str) -> Result<(), StoreError>;

    async fn mark_processed(
        &self,
        document_id: Uuid,
        index_handle: &IndexHandle,
    ) -> Result<(), StoreError>;

    async fn soft_delete(&self, document_id: Uuid) -> Result<(), StoreError>;

    async fn hard_delete(&self, document_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, user_id: &str, name: &str, bytes: &[u8]) -> Result<String, StoreError>;

    async fn read(&self, handle: &str) -> Result<Vec<u8>, StoreError>;

    /// Returns `false` when the blob was already gone.
    async fn delete(&self, handle: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn upsert_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Creates the session row together with its first message, atomically. Fails with
    /// `StoreError::Conflict` when the session already exists, leaving no message behind.
    async fn open_session(
        &self,
        session: &Session,
        first_message: NewMessage,
    ) -> Result<Message, StoreError>;

    /// Live sessions for one document, most recently updated first.
    async fn list_sessions(&self, user_id: &str, document_id: Uuid)
        -> Result<Vec<Session>, StoreError>;

    async fn soft_delete_session(&self, session_id: Uuid) -> Result<(), StoreError>;

    /// Appends atomically. The stored timestamp is strictly later than every earlier
    /// message of the session, so storage order and timestamp order agree.
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Live messages of a session in ascending timestamp order.
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>, StoreError>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn create_artifact(&self, artifact: &GeneratedArtifact) -> Result<(), StoreError>;

    async fn get_artifact(&self, artifact_id: Uuid) -> Result<Option<GeneratedArtifact>, StoreError>;

    /// Live artifacts of a user, newest first, optionally restricted to one kind.
    async fn list_artifacts(
        &self,
        user_id: &str,
        kind: Option<ArtifactKind>,
    ) -> Result<Vec<GeneratedArtifact>, StoreError>;

    async fn update_artifact(&self, artifact: &GeneratedArtifact) -> Result<(), StoreError>;

    async fn soft_delete_artifact(&self, artifact_id: Uuid) -> Result<(), StoreError>;
}
