pub mod agent;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod model;
pub mod models;
pub mod parse_service;
pub mod pdf_tools;
pub mod store;
pub mod stores;
pub mod text;
pub mod tools;
pub mod traits;
pub mod upsert;
pub mod websearch;

pub use agent::{
    answer_query, AgentConfig, AgentLoop, AgentOutcome, AgentSession, AgentStep, Answer,
    AnswerRoute,
};
pub use chunking::{
    build_chunks, build_fact_chunks, build_page_chunks, chunk_id, chunk_sentences, ChunkingConfig,
};
pub use embeddings::{
    CachingEmbedder, CharacterNgramEmbedder, Embedder, OllamaEmbedder, RetryPolicy,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IngestError, ModelError, ParseServiceError, StoreError, ToolError};
pub use extractor::{
    build_extractor, DocumentExtractor, ExtractionStrategy, FallbackExtractor, LopdfExtractor,
    PageText, RemoteParseExtractor,
};
pub use ingest::{digest_file, discover_documents, Ingestor};
pub use model::{LanguageModel, OllamaModel};
pub use models::{
    BatchReport, Chunk, ChunkMetadata, Dataset, IngestionOptions, IngestionReport, SkippedDataset,
    TextMode,
};
pub use parse_service::{DebugInvocation, DebugTool, ParseServiceClient};
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use text::{estimate_tokens, normalize_text, split_sentences};
pub use tools::{Tool, ToolInput, ToolRegistry};
pub use traits::VectorStore;
pub use upsert::{UpsertEngine, UpsertReport};
pub use websearch::{TavilySearch, WebSearch};
