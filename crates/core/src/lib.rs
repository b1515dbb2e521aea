pub mod assistant;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
#[cfg(test)]
mod fake_http;
pub mod fingerprint;
pub mod generation;
pub mod history;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod store;
pub mod stores;
pub mod templates;
pub mod traits;

pub use assistant::Assistant;
pub use chunking::{chunk_pages, split_text, ChunkingConfig};
pub use config::{load_config, AssistantConfig, EmbeddingProvider, IndexBackend};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, OpenAiEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{AssistError, ConfigError, IngestError, SearchError, StoreError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageExtractor, PageText, PlainTextExtractor};
pub use fingerprint::{fingerprint_bytes, fingerprint_stream};
pub use generation::{title_case_label, ArtifactService, GenerationProfile, GenerationRequest};
pub use history::reconstruct_turns;
pub use index::{IndexManager, DEFAULT_TOP_K};
pub use ingest::{discover_documents, DeletionReport, DocumentService, FolderUploadReport, SkippedFile};
pub use llm::{with_deadline, ChatModelConfig, CompletionRequest, LanguageModel, OpenAiChatModel};
pub use models::{
    ArtifactKind, Document, FieldValues, Fingerprint, GeneratedArtifact, IndexHandle, Message,
    NewMessage, Passage, Role, ScoredPassage, Session, Turn,
};
pub use normalizer::{html_to_text, normalize_generation, DisclaimerRule, NormalizedBody, Repair};
pub use orchestrator::{AskOutcome, ConversationOrchestrator, ConversationSettings};
pub use store::{ArtifactStore, BlobStore, ConversationStore, DocumentStore};
pub use stores::{FileIndex, FsBlobStore, MemoryIndex, QdrantStore, SqliteStore};
pub use templates::{find_template, templates, FieldKind, FieldSpec, TemplateSpec};
pub use traits::PassageIndex;
