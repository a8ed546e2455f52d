use crate::chunking::{build_chunks, build_fact_chunks, build_page_chunks};
use crate::embeddings::Embedder;
use crate::extractor::{read_text_file, DocumentExtractor};
use crate::models::{
    BatchReport, Chunk, Dataset, IngestionOptions, IngestionReport, SkippedDataset, TextMode,
};
use crate::store::CollectionSchema;
use crate::text::normalize_text;
use crate::traits::VectorStore;
use crate::upsert::UpsertEngine;
use crate::IngestError;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use walkdir::WalkDir;

const DOCUMENT_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// Recursively finds ingestible documents under `folder`, sorted by path,
/// each bound to a topic derived from its file stem.
pub fn discover_documents(folder: &Path) -> Vec<Dataset> {
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
                DOCUMENT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
        .into_iter()
        .filter_map(|path| {
            let topic = topic_from_path(&path)?;
            Some(Dataset::new(path, topic))
        })
        .collect()
}

/// `Cat Facts_v2.txt` becomes `cat-facts-v2`.
pub fn topic_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let topic = stem
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    (!topic.is_empty()).then_some(topic)
}

pub async fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn source_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })
}

/// Ingests datasets into per-topic collections. Cheap to clone; every
/// collaborator sits behind an `Arc`, and clones share one pool of
/// existence-check permits.
#[derive(Clone)]
pub struct Ingestor {
    extractor: Arc<dyn DocumentExtractor>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    options: IngestionOptions,
    existence_permits: Arc<Semaphore>,
}

impl Ingestor {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        options.validate()?;
        let existence_permits = Arc::new(Semaphore::new(options.existence_check_pool));
        Ok(Self {
            extractor,
            store,
            embedder,
            options,
            existence_permits,
        })
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store)
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub fn extractor(&self) -> Arc<dyn DocumentExtractor> {
        Arc::clone(&self.extractor)
    }

    fn schema(&self) -> CollectionSchema {
        CollectionSchema::for_chunks(self.embedder.dimensions())
    }

    async fn ensure_ready(&self) -> Result<(), IngestError> {
        self.store.ready().await.map_err(|error| {
            IngestError::StoreUnavailable(format!("{}: {error}", self.store.backend()))
        })
    }

    pub async fn chunk_dataset(&self, dataset: &Dataset) -> Result<Vec<Chunk>, IngestError> {
        let source = source_name(&dataset.path)?;

        if dataset.is_pdf() {
            let pages = self.extractor.extract_pages(&dataset.path).await?;
            return Ok(build_page_chunks(&source, &pages, self.options.prose_config()));
        }

        let raw = read_text_file(&dataset.path).await?;
        let chunks = match dataset.text_mode {
            TextMode::Prose => {
                build_chunks(&source, None, &normalize_text(&raw), self.options.prose_config())
            }
            TextMode::Facts => build_fact_chunks(&source, &raw, self.options.fact_config()),
        };
        Ok(chunks)
    }

    /// Chunk one dataset and upsert whatever the collection does not hold yet.
    /// Nothing is read or written unless the store reports ready.
    pub async fn ingest(&self, dataset: &Dataset) -> Result<IngestionReport, IngestError> {
        self.ensure_ready().await?;

        let checksum = digest_file(&dataset.path).await?;
        let chunks = self.chunk_dataset(dataset).await?;

        self.store
            .ensure_collection(&dataset.topic, &self.schema())
            .await?;

        let engine = UpsertEngine::with_permits(
            Arc::clone(&self.store),
            Arc::clone(&self.embedder),
            Arc::clone(&self.existence_permits),
        );
        let outcome = engine.upsert_chunks(&dataset.topic, &chunks).await?;

        let report = IngestionReport {
            topic: dataset.topic.clone(),
            source: source_name(&dataset.path)?,
            checksum,
            chunk_count: chunks.len(),
            inserted: outcome.inserted(),
            skipped: outcome.skipped,
            ingested_at: Utc::now(),
        };
        info!(
            topic = %report.topic,
            source = %report.source,
            chunks = report.chunk_count,
            inserted = report.inserted,
            skipped = report.skipped,
            "dataset ingested"
        );
        Ok(report)
    }

    /// Ingest every dataset concurrently. A dataset that fails is reported as
    /// skipped; only an unavailable store fails the whole batch.
    pub async fn ingest_all(&self, datasets: Vec<Dataset>) -> Result<BatchReport, IngestError> {
        if datasets.is_empty() {
            return Err(IngestError::InvalidArgument("no datasets to ingest".to_string()));
        }
        self.ensure_ready().await?;

        // Datasets sharing a topic run concurrently; create each collection
        // once up front so their tasks never race on creation.
        let topics = datasets
            .iter()
            .map(|dataset| dataset.topic.as_str())
            .collect::<BTreeSet<_>>();
        let schema = self.schema();
        for topic in topics {
            if let Err(error) = self.store.ensure_collection(topic, &schema).await {
                warn!(%topic, %error, "collection setup failed");
            }
        }

        let mut tasks = JoinSet::new();
        for (position, dataset) in datasets.into_iter().enumerate() {
            let ingestor = self.clone();
            tasks.spawn(async move {
                let result = ingestor.ingest(&dataset).await;
                (position, dataset, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.map_err(|error| IngestError::Task(error.to_string()))?);
        }
        outcomes.sort_by_key(|(position, _, _)| *position);

        let mut batch = BatchReport::default();
        for (_, dataset, result) in outcomes {
            match result {
                Ok(report) => batch.reports.push(report),
                Err(error @ IngestError::StoreUnavailable(_)) => return Err(error),
                Err(error) => {
                    warn!(
                        path = %dataset.path.display(),
                        topic = %dataset.topic,
                        %error,
                        "skipped dataset"
                    );
                    batch.skipped.push(SkippedDataset {
                        dataset,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(batch)
    }

    /// Drop the collection behind each topic so the next ingestion starts
    /// from nothing. Topics without a collection are ignored.
    pub async fn reset_topics<S: AsRef<str>>(&self, topics: &[S]) -> Result<(), IngestError> {
        self.ensure_ready().await?;

        let distinct = topics
            .iter()
            .map(|topic| topic.as_ref())
            .collect::<BTreeSet<&str>>();
        for topic in distinct {
            self.store.delete_collection(topic).await?;
            info!(%topic, "collection dropped");
        }
        Ok(())
    }
}
