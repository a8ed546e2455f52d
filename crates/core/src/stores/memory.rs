//! In-process [`VectorStore`] used for tests and single-run sessions.
//!
//! Brute-force cosine similarity over every record of a collection.

use crate::store::{CollectionSchema, StoreHit, VectorRecord};
use crate::traits::VectorStore;
use crate::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

struct Collection {
    schema: CollectionSchema,
    records: BTreeMap<String, VectorRecord>,
}

pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
    ready: AtomicBool,
    exists_calls: AtomicUsize,
    upserted_records: AtomicUsize,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(true),
            exists_calls: AtomicUsize::new(0),
            upserted_records: AtomicUsize::new(0),
        }
    }

    /// Simulate a store that never becomes ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    /// Total records received by `upsert`, duplicates included.
    pub fn upserted_records(&self) -> usize {
        self.upserted_records.load(Ordering::SeqCst)
    }

    pub fn ids(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .ok()
            .and_then(|collections| {
                collections
                    .get(collection)
                    .map(|found| found.records.keys().cloned().collect())
            })
            .unwrap_or_default()
    }

    pub fn schema(&self, collection: &str) -> Option<CollectionSchema> {
        let collections = self.collections.read().ok()?;
        collections.get(collection).map(|found| found.schema.clone())
    }

    fn poisoned() -> StoreError {
        StoreError::Request("in-memory store lock poisoned".to_string())
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        f64::from(dot / (mag_a * mag_b))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ready(&self) -> Result<(), StoreError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotReady("in-memory store marked unavailable".to_string()))
        }
    }

    async fn ensure_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        match collections.get(name) {
            Some(existing) if existing.schema.vector_size != schema.vector_size => {
                Err(StoreError::Request(format!(
                    "collection {name} has vector size {}, requested {}",
                    existing.schema.vector_size, schema.vector_size
                )))
            }
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        schema: schema.clone(),
                        records: BTreeMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        collections.remove(name);
        Ok(())
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        let found = collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        Ok(found.records.contains_key(id))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        let found = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        for record in records {
            if record.vector.len() != found.schema.vector_size {
                return Err(StoreError::Request(format!(
                    "embedding dimension {} != {}",
                    record.vector.len(),
                    found.schema.vector_size
                )));
            }
        }

        for record in records {
            found.records.insert(record.id.clone(), record.clone());
        }
        self.upserted_records.fetch_add(records.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        let found = collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let mut hits = found
            .records
            .values()
            .map(|record| StoreHit {
                id: record.id.clone(),
                score: cosine_sim(query_vector, &record.vector),
                content: record.content.clone(),
            })
            .collect::<Vec<_>>();
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(k);
        Ok(hits)
    }
}
