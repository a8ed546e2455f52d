use crate::store::{CollectionSchema, StoreHit, VectorRecord};
use crate::StoreError;
use async_trait::async_trait;

/// Vector database seen by ingestion and retrieval.
///
/// `upsert` must overwrite a record whose id already exists; ingestion relies
/// on that to stay idempotent when two runs race between `exists` and `upsert`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ready(&self) -> Result<(), StoreError>;

    async fn ensure_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError>;

    /// Removes a collection and every record in it. Missing collections are
    /// not an error.
    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<(), StoreError>;

    async fn similarity_search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, StoreError>;
}
