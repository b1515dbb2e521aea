use crate::chunking::ChunkingConfig;
use crate::embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, OpenAiEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use crate::error::ConfigError;
use crate::index::DEFAULT_TOP_K;
use crate::llm::{ChatModelConfig, LanguageModel, OpenAiChatModel};
use crate::orchestrator::{ConversationSettings, DEFAULT_FALLBACK_ANSWER, DEFAULT_SESSION_TITLE};
use crate::stores::{FileIndex, MemoryIndex, QdrantStore};
use crate::traits::PassageIndex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingSection,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "ModelConfig::chat")]
    pub chat: ModelConfig,
    #[serde(default = "ModelConfig::title")]
    pub title: ModelConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            chunking: ChunkingSection::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            chat: ModelConfig::chat(),
            title: ModelConfig::title(),
            generation: GenerationConfig::default(),
            messages: MessagesConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("docchat-data")
}

impl StorageConfig {
    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join("records.db")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingSection {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_pages_per_batch")]
    pub pages_per_batch: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            pages_per_batch: default_pages_per_batch(),
        }
    }
}

fn default_max_chars() -> usize {
    4_000
}
fn default_overlap_chars() -> usize {
    400
}
fn default_pages_per_batch() -> usize {
    100
}

impl From<&ChunkingSection> for ChunkingConfig {
    fn from(section: &ChunkingSection) -> Self {
        ChunkingConfig {
            max_chars: section.max_chars,
            overlap_chars: section.overlap_chars,
            pages_per_batch: section.pages_per_batch,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Memory,
    #[default]
    File,
    Qdrant,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub backend: IndexBackend,
    #[serde(default)]
    pub qdrant_url: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            backend: IndexBackend::default(),
            qdrant_url: None,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ngram,
    OpenAi,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_embedding_model(),
            base_url: default_openai_url(),
            api_key_env: default_openai_key_env(),
            dims: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    60
}

impl EmbeddingConfig {
    pub fn dimensions(&self) -> usize {
        match (self.provider, self.dims) {
            (_, Some(dims)) => dims,
            (EmbeddingProvider::Ngram, None) => DEFAULT_EMBEDDING_DIMENSIONS,
            (EmbeddingProvider::OpenAi, None) => 1536,
        }
    }
}

/// An OpenAI-compatible completion endpoint. A section given in the file replaces the
/// built-in one as a whole.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

impl ModelConfig {
    pub fn chat() -> Self {
        Self {
            enabled: true,
            base_url: default_openai_url(),
            model: "gpt-4.1-nano".to_string(),
            api_key_env: default_openai_key_env(),
            temperature: 0.7,
            max_tokens: None,
            timeout_secs: 60,
        }
    }

    pub fn title() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama3-8b-8192".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.3,
            max_tokens: Some(20),
            timeout_secs: 15,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn build(&self) -> Result<OpenAiChatModel, ConfigError> {
        OpenAiChatModel::new(ChatModelConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key(),
            model: self.model.clone(),
            timeout: self.timeout(),
        })
        .map_err(|error| ConfigError::Invalid(format!("model client {}: {error}", self.model)))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_generation_timeout_secs(),
            temperature: default_generation_temperature(),
        }
    }
}

fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_generation_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagesConfig {
    #[serde(default = "default_fallback_answer")]
    pub fallback_answer: String,
    #[serde(default = "default_session_title")]
    pub default_title: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            fallback_answer: default_fallback_answer(),
            default_title: default_session_title(),
        }
    }
}

fn default_fallback_answer() -> String {
    DEFAULT_FALLBACK_ANSWER.to_string()
}
fn default_session_title() -> String {
    DEFAULT_SESSION_TITLE.to_string()
}

pub fn load_config(path: &Path) -> Result<AssistantConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: AssistantConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl AssistantConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ChunkingConfig::from(&self.chunking)
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be >= 1".to_string()));
        }
        if self.retrieval.backend == IndexBackend::Qdrant {
            let endpoint = self.retrieval.qdrant_url.as_deref().ok_or_else(|| {
                ConfigError::Invalid("retrieval.qdrant_url is required for the qdrant backend".to_string())
            })?;
            Url::parse(endpoint)?;
        }

        if self.embedding.dimensions() == 0 {
            return Err(ConfigError::Invalid("embedding.dims must be > 0".to_string()));
        }
        if self.embedding.provider == EmbeddingProvider::OpenAi {
            Url::parse(&self.embedding.base_url)?;
            if self.embedding.batch_size == 0 {
                return Err(ConfigError::Invalid("embedding.batch_size must be > 0".to_string()));
            }
        }

        for (section, model) in [("chat", &self.chat), ("title", &self.title)] {
            if !model.enabled {
                continue;
            }
            Url::parse(&model.base_url)?;
            if model.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!("{section}.timeout_secs must be > 0")));
            }
        }
        if self.generation.timeout_secs == 0 {
            return Err(ConfigError::Invalid("generation.timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig::from(&self.chunking)
    }

    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            top_k: self.retrieval.top_k,
            fallback_answer: self.messages.fallback_answer.clone(),
            default_title: self.messages.default_title.clone(),
            answer_temperature: self.chat.temperature,
            answer_max_tokens: self.chat.max_tokens,
            title_temperature: self.title.temperature,
            title_max_tokens: self.title.max_tokens.unwrap_or(20),
            model_timeout: self.chat.timeout(),
            title_timeout: self.title.timeout(),
        }
    }

    pub fn build_embedder(&self) -> Result<Arc<dyn Embedder>, ConfigError> {
        let dimensions = self.embedding.dimensions();
        match self.embedding.provider {
            EmbeddingProvider::Ngram => Ok(Arc::new(CharacterNgramEmbedder { dimensions })),
            EmbeddingProvider::OpenAi => {
                let embedder = OpenAiEmbedder::new(OpenAiEmbedderConfig {
                    base_url: self.embedding.base_url.clone(),
                    api_key: std::env::var(&self.embedding.api_key_env).ok(),
                    model: self.embedding.model.clone(),
                    dimensions,
                    batch_size: self.embedding.batch_size,
                    timeout: Duration::from_secs(self.embedding.timeout_secs),
                })
                .map_err(|error| ConfigError::Invalid(format!("embedding client: {error}")))?;
                Ok(Arc::new(embedder))
            }
        }
    }

    pub fn build_index(&self) -> Result<Arc<dyn PassageIndex>, ConfigError> {
        Ok(match self.retrieval.backend {
            IndexBackend::Memory => Arc::new(MemoryIndex::new()),
            IndexBackend::File => Arc::new(FileIndex::new(self.storage.indexes_dir())),
            IndexBackend::Qdrant => {
                let endpoint = self.retrieval.qdrant_url.clone().ok_or_else(|| {
                    ConfigError::Invalid("retrieval.qdrant_url is not set".to_string())
                })?;
                Arc::new(QdrantStore::new(endpoint, self.embedding.dimensions()))
            }
        })
    }

    pub fn build_chat_model(&self) -> Result<Arc<dyn LanguageModel>, ConfigError> {
        if self.chat.api_key().is_none() {
            warn!(env = %self.chat.api_key_env, "chat model api key not set");
        }
        let model = self.chat.build()?;
        info!(model = model.model_name(), base_url = %self.chat.base_url, "chat model configured");
        Ok(Arc::new(model))
    }

    /// `None` when titles are disabled or no key is available; sessions then get the
    /// default title.
    pub fn build_title_model(&self) -> Result<Option<Arc<dyn LanguageModel>>, ConfigError> {
        if !self.title.enabled {
            return Ok(None);
        }
        if self.title.api_key().is_none() {
            warn!(env = %self.title.api_key_env, "title model api key not set, using default titles");
            return Ok(None);
        }
        let model = self.title.build()?;
        info!(model = model.model_name(), "title model configured");
        Ok(Some(Arc::new(model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: AssistantConfig = toml::from_str("").expect("empty config parses");
        config.validate().expect("defaults are valid");

        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.backend, IndexBackend::File);
        assert_eq!(config.chunking.max_chars, 4_000);
        assert_eq!(config.chunking.overlap_chars, 400);
        assert_eq!(config.chunking.pages_per_batch, 100);
        assert_eq!(config.title.model, "llama3-8b-8192");
        assert_eq!(config.title.max_tokens, Some(20));
        assert_eq!(config.embedding.dimensions(), DEFAULT_EMBEDDING_DIMENSIONS);
        assert_eq!(config.storage.records_path(), PathBuf::from("docchat-data/records.db"));
    }

    #[test]
    fn sections_override_defaults() {
        let config: AssistantConfig = toml::from_str(
            r#"
            [storage]
            data_dir = "/var/lib/docchat"

            [retrieval]
            top_k = 5
            backend = "qdrant"
            qdrant_url = "http://localhost:6333"

            [embedding]
            provider = "openai"
            dims = 256

            [messages]
            fallback_answer = "Not available."
            "#,
        )
        .expect("config parses");
        config.validate().expect("config is valid");

        assert_eq!(config.retrieval.backend, IndexBackend::Qdrant);
        assert_eq!(config.embedding.dimensions(), 256);
        assert_eq!(config.conversation_settings().top_k, 5);
        assert_eq!(config.conversation_settings().fallback_answer, "Not available.");
        assert_eq!(config.messages.default_title, DEFAULT_SESSION_TITLE);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let overlap: AssistantConfig =
            toml::from_str("[chunking]\nmax_chars = 100\noverlap_chars = 100\n").unwrap();
        assert!(matches!(overlap.validate(), Err(ConfigError::Invalid(_))));

        let no_url: AssistantConfig = toml::from_str("[retrieval]\nbackend = \"qdrant\"\n").unwrap();
        assert!(no_url.validate().is_err());

        let bad_url: AssistantConfig = toml::from_str(
            "[chat]\nbase_url = \"not a url\"\nmodel = \"m\"\napi_key_env = \"K\"\ntemperature = 0.5\ntimeout_secs = 5\n",
        )
        .unwrap();
        assert!(matches!(bad_url.validate(), Err(ConfigError::Url(_))));
    }

    #[test]
    fn disabled_title_model_builds_nothing() {
        let mut config = AssistantConfig::default();
        config.title = ModelConfig::title();
        config.title.enabled = false;
        assert!(config.build_title_model().unwrap().is_none());
    }
}
