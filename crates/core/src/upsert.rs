//! Deduplicating upsert: check every chunk id against the collection
//! concurrently, then embed and insert only the unseen chunks in one batch.

use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::Chunk;
use crate::store::VectorRecord;
use crate::traits::VectorStore;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub collection: String,
    pub total: usize,
    pub skipped: usize,
    pub inserted_ids: Vec<String>,
}

impl UpsertReport {
    pub fn inserted(&self) -> usize {
        self.inserted_ids.len()
    }
}

pub struct UpsertEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    permits: Arc<Semaphore>,
}

impl UpsertEngine {
    /// Engine with its own pool of `pool_size` concurrent existence checks.
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, pool_size: usize) -> Self {
        Self::with_permits(store, embedder, Arc::new(Semaphore::new(pool_size.max(1))))
    }

    /// Engine drawing on a pool shared with other engines, so the bound holds
    /// across concurrent ingestions against the same store.
    pub fn with_permits(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            store,
            embedder,
            permits,
        }
    }

    /// Existence flag per chunk, in input order. Every lookup resolves before
    /// this returns. A failed lookup counts as absent; the upsert overwrites.
    async fn check_existing(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<bool>, IngestError> {
        let mut lookups = JoinSet::new();

        for (position, id) in ids.iter().enumerate() {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|error| IngestError::Task(error.to_string()))?;
            let store = Arc::clone(&self.store);
            let collection = collection.to_string();
            let id = id.clone();

            lookups.spawn(async move {
                let _permit = permit;
                let exists = match store.exists(&collection, &id).await {
                    Ok(exists) => exists,
                    Err(error) => {
                        warn!(%collection, %id, %error, "existence check failed, treating as new");
                        false
                    }
                };
                (position, exists)
            });
        }

        let mut flags = vec![false; ids.len()];
        while let Some(joined) = lookups.join_next().await {
            let (position, exists) =
                joined.map_err(|error| IngestError::Task(error.to_string()))?;
            flags[position] = exists;
        }
        Ok(flags)
    }

    pub async fn upsert_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
    ) -> Result<UpsertReport, IngestError> {
        let ids = chunks.iter().map(Chunk::id).collect::<Vec<_>>();
        let flags = self.check_existing(collection, &ids).await?;

        let mut records = Vec::new();
        let mut skipped = 0;
        for ((chunk, id), exists) in chunks.iter().zip(&ids).zip(flags) {
            if exists {
                debug!(%collection, %id, "skipped duplicate chunk");
                skipped += 1;
                continue;
            }
            let vector = self.embedder.embed(&chunk.content).await?;
            records.push(VectorRecord::from_chunk(chunk, vector));
        }

        let inserted_ids = records
            .iter()
            .map(|record| record.id.clone())
            .collect::<Vec<_>>();
        if records.is_empty() {
            info!(%collection, skipped, "no new chunks to insert");
        } else {
            self.store.upsert(collection, &records).await?;
            info!(%collection, inserted = records.len(), skipped, "inserted new chunks");
        }

        Ok(UpsertReport {
            collection: collection.to_string(),
            total: chunks.len(),
            skipped,
            inserted_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::store::CollectionSchema;
    use crate::stores::InMemoryVectorStore;
    use crate::text::estimate_tokens;

    fn chunk(index: u64, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            source: "facts.txt".to_string(),
            page: None,
            index,
            tokens: estimate_tokens(content),
        }
    }

    async fn engine() -> (Arc<InMemoryVectorStore>, UpsertEngine) {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        store
            .ensure_collection("facts", &CollectionSchema::for_chunks(16))
            .await
            .unwrap();
        let engine = UpsertEngine::new(store.clone(), Arc::new(embedder), 2);
        (store, engine)
    }

    #[tokio::test]
    async fn second_upsert_of_same_chunks_inserts_nothing() {
        let (store, engine) = engine().await;
        let chunks = vec![
            chunk(0, "Cats purr."),
            chunk(1, "Cats sleep."),
            chunk(2, "Cats hunt."),
        ];

        let first = engine.upsert_chunks("facts", &chunks).await.unwrap();
        let ids_after_first = store.ids("facts");
        let second = engine.upsert_chunks("facts", &chunks).await.unwrap();

        assert_eq!(first.inserted(), 3);
        assert_eq!(second.inserted(), 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(store.ids("facts"), ids_after_first);
        assert_eq!(store.upserted_records(), 3);
        assert_eq!(store.exists_calls(), 6);
    }

    #[tokio::test]
    async fn only_unseen_chunks_are_inserted() {
        let (store, engine) = engine().await;
        engine
            .upsert_chunks("facts", &[chunk(0, "Cats purr.")])
            .await
            .unwrap();

        let report = engine
            .upsert_chunks("facts", &[chunk(0, "Cats purr."), chunk(1, "Cats climb.")])
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted_ids, vec![chunk(1, "Cats climb.").id()]);
        assert_eq!(store.ids("facts").len(), 2);
    }

    #[tokio::test]
    async fn failed_lookups_are_treated_as_new() {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .ensure_collection("facts", &CollectionSchema::for_chunks(16))
            .await
            .unwrap();
        let engine = UpsertEngine::new(
            store.clone(),
            Arc::new(CharacterNgramEmbedder { dimensions: 16 }),
            1,
        );

        // lookups against a missing collection fail; the batch upsert then fails too
        let result = engine
            .upsert_chunks("missing", &[chunk(0, "Cats purr.")])
            .await;
        assert!(matches!(result, Err(IngestError::Store(_))));
        assert_eq!(store.exists_calls(), 1);
    }
}
