use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::chunking::ChunkingConfig;
use crate::error::IngestError;

/// A bounded span of source text with provenance and an estimated token cost.
///
/// Created by the chunker and consumed once by the upsert engine. `tokens` is
/// always the estimate of `content` as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub source: String,
    pub page: Option<u32>,
    pub index: u64,
    pub tokens: usize,
}

/// Provenance stored next to each vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub source: String,
    pub page: Option<u32>,
    pub chunk_index: u64,
    pub tokens: usize,
}

impl From<&Chunk> for ChunkMetadata {
    fn from(chunk: &Chunk) -> Self {
        Self {
            source: chunk.source.clone(),
            page: chunk.page,
            chunk_index: chunk.index,
            tokens: chunk.tokens,
        }
    }
}

/// How a non-PDF text file is segmented before sentence chunking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TextMode {
    /// Continuous prose: normalize the whole file once and chunk it.
    #[default]
    Prose,
    /// Short independent statements: split on blank lines and dash list
    /// markers first, then chunk each fact with the smaller fact budget.
    Facts,
}

/// One file bound to the topic (collection) it is ingested into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dataset {
    pub path: PathBuf,
    pub topic: String,
    pub text_mode: TextMode,
}

impl Dataset {
    pub fn new(path: impl Into<PathBuf>, topic: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            topic: topic.into(),
            text_mode: TextMode::Prose,
        }
    }

    pub fn facts(path: impl Into<PathBuf>, topic: impl Into<String>) -> Self {
        Self {
            text_mode: TextMode::Facts,
            ..Self::new(path, topic)
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub fact_max_tokens: usize,
    pub fact_overlap_tokens: usize,
    /// Upper bound on concurrent existence checks, shared by every dataset
    /// one ingestor processes.
    pub existence_check_pool: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            overlap_tokens: 60,
            fact_max_tokens: 80,
            fact_overlap_tokens: 0,
            existence_check_pool: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(4),
        }
    }
}

impl IngestionOptions {
    pub fn prose_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }

    pub fn fact_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens: self.fact_max_tokens,
            overlap_tokens: self.fact_overlap_tokens,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        self.prose_config().validate()?;
        self.fact_config().validate()?;
        if self.existence_check_pool == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "existence_check_pool must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub topic: String,
    pub source: String,
    pub checksum: String,
    pub chunk_count: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SkippedDataset {
    pub dataset: Dataset,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<IngestionReport>,
    pub skipped: Vec<SkippedDataset>,
}

impl BatchReport {
    pub fn inserted(&self) -> usize {
        self.reports.iter().map(|report| report.inserted).sum()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics = self
            .reports
            .iter()
            .map(|report| report.topic.clone())
            .collect::<Vec<_>>();
        topics.sort_unstable();
        topics.dedup();
        topics
    }
}
