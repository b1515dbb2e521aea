use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("document already uploaded (fingerprint {fingerprint})")]
    DuplicateContent { fingerprint: String },

    #[error("no extractable text in {0}")]
    NoExtractableText(String),

    #[error("index build failed: {0}")]
    IndexBuildFailed(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

impl SearchError {
    /// True when the failure came from an upstream model or embedding call.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            SearchError::EmbeddingUnavailable(_) | SearchError::ModelUnavailable(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unreadable record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum AssistError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("generated output was malformed: {0}")]
    MalformedGeneration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown {kind} template: {key}")]
    UnknownTemplate { kind: String, key: String },

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("could not open record store: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
