use crate::config::AssistantConfig;
use crate::error::ConfigError;
use crate::generation::ArtifactService;
use crate::index::IndexManager;
use crate::ingest::DocumentService;
use crate::orchestrator::ConversationOrchestrator;
use crate::stores::{FsBlobStore, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The three services sharing one record store, blob directory and index backend.
pub struct Assistant {
    pub documents: DocumentService,
    pub conversations: ConversationOrchestrator,
    pub artifacts: ArtifactService,
}

impl Assistant {
    pub async fn open(config: &AssistantConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;

        let records = Arc::new(SqliteStore::connect(&config.storage.records_path()).await?);
        let blobs = Arc::new(FsBlobStore::new(config.storage.blobs_dir()));
        let index = Arc::new(
            IndexManager::new(config.build_index()?, config.build_embedder()?)
                .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs)),
        );
        let chat = config.build_chat_model()?;

        let documents = DocumentService::new(records.clone(), blobs, index.clone())
            .with_chunking(config.chunking_config())
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let mut conversations =
            ConversationOrchestrator::new(records.clone(), records.clone(), index, chat.clone())
                .with_settings(config.conversation_settings());
        if let Some(title_model) = config.build_title_model()? {
            conversations = conversations.with_title_model(title_model);
        }

        let artifacts = ArtifactService::new(chat, records)
            .with_model_timeout(Duration::from_secs(config.generation.timeout_secs))
            .with_temperature(config.generation.temperature);

        info!(
            data_dir = %config.storage.data_dir.display(),
            backend = ?config.retrieval.backend,
            "assistant ready"
        );
        Ok(Self {
            documents,
            conversations,
            artifacts,
        })
    }
}
