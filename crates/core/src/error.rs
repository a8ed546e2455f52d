use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("remote parse failed: {0}")]
    RemoteParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("ingestion task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyText,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding dimension {actual} does not match expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("store not available yet: {0}")]
    NotReady(String),

    #[error("collection does not exist: {0}")]
    UnknownCollection(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool input must be a single string, got {0}")]
    NonStringInput(String),

    #[error("tool input is empty")]
    EmptyInput,

    #[error("no tool named {0}")]
    UnknownTool(String),

    #[error("tool name registered twice: {0}")]
    DuplicateTool(String),

    #[error("tool failed: {0}")]
    Execution(String),

    #[error("tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("model returned an empty completion")]
    EmptyCompletion,
}

#[derive(Debug, Error)]
pub enum ParseServiceError {
    #[error("unknown tool: {0} (expected parse_pdf, summarize_pdf or search_pdf)")]
    UnknownTool(String),

    #[error("search_pdf requires a query")]
    MissingQuery,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}
