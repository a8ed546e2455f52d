use crate::store::{CollectionSchema, FieldKind, StoreHit, VectorRecord};
use crate::traits::VectorStore;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

/// Qdrant over its REST API. Point ids are the chunk UUIDs; Qdrant's point
/// upsert overwrites an existing id, so racing ingestions converge.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.endpoint, collection)
    }

    fn backend_error(details: impl Into<String>) -> StoreError {
        StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: details.into(),
        }
    }

    async fn create_payload_indexes(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError> {
        for field in &schema.fields {
            let field_schema = match field.kind {
                FieldKind::Keyword => "keyword",
                FieldKind::Integer => "integer",
                FieldKind::Text => continue,
            };

            let response = self
                .client
                .put(format!("{}/index?wait=true", self.collection_url(name)))
                .json(&json!({ "field_name": field.name, "field_schema": field_schema }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::backend_error(format!(
                    "payload index {} failed with {}",
                    field.name,
                    response.status()
                )));
            }
        }
        Ok(())
    }
}

/// Qdrant answers a create for an existing collection with 409; older
/// releases send 400 with an "already exists" message.
fn collection_already_exists(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || (status == StatusCode::BAD_REQUEST && body.contains("already exists"))
}

fn record_payload(record: &VectorRecord) -> Value {
    json!({
        "content": record.content,
        "source": record.metadata.source,
        "page": record.metadata.page,
        "chunk_index": record.metadata.chunk_index,
        "tokens": record.metadata.tokens,
    })
}

fn parse_hits(parsed: &Value) -> Vec<StoreHit> {
    parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|hit| StoreHit {
                    id: match hit.pointer("/id") {
                        Some(Value::String(id)) => id.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    },
                    score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
                    content: hit
                        .pointer("/payload/content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn ready(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(format!("{}/readyz", self.endpoint))
            .send()
            .await
            .map_err(|error| StoreError::NotReady(error.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::NotReady(format!(
                "qdrant readiness returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn ensure_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url(name)).send().await?;

        if response.status() == StatusCode::OK {
            let body: Value = response.json().await?;
            let size = body
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match size {
                Some(size) if size as usize != schema.vector_size => {
                    Err(StoreError::Request(format!(
                        "collection {name} has vector size {size}, requested {}",
                        schema.vector_size
                    )))
                }
                _ => Ok(()),
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(Self::backend_error(response.status().to_string()));
        }

        let response = self
            .client
            .put(self.collection_url(name))
            .json(&json!({
                "vectors": { "size": schema.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if collection_already_exists(status, &body) {
                debug!(collection = name, "collection created by a concurrent writer");
                return Ok(());
            }
            return Err(StoreError::Request(format!(
                "qdrant collection setup failed with {status}"
            )));
        }

        self.create_payload_indexes(name, schema).await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let response = self.client.delete(self.collection_url(name)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(Self::backend_error(status.to_string())),
        }
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .get(format!("{}/points/{}", self.collection_url(collection), id))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Self::backend_error(status.to_string())),
        }
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let points = records
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "vector": record.vector,
                    "payload": record_payload(record),
                })
            })
            .collect::<Vec<_>>();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(collection)))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status().to_string()));
        }

        Ok(())
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(collection)))
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        Ok(parse_hits(&parsed))
    }
}
