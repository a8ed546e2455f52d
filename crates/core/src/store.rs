use crate::chunking::chunk_id;
use crate::models::{Chunk, ChunkMetadata};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Keyword,
    Integer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
}

/// Payload layout of a knowledge collection: content plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionSchema {
    pub vector_size: usize,
    pub fields: Vec<SchemaField>,
}

impl CollectionSchema {
    pub fn for_chunks(vector_size: usize) -> Self {
        let field = |name: &str, kind| SchemaField {
            name: name.to_string(),
            kind,
        };
        Self {
            vector_size,
            fields: vec![
                field("content", FieldKind::Text),
                field("source", FieldKind::Keyword),
                field("page", FieldKind::Integer),
                field("chunk_index", FieldKind::Integer),
                field("tokens", FieldKind::Integer),
            ],
        }
    }
}

/// One row handed to [`VectorStore::upsert`](crate::traits::VectorStore::upsert).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl VectorRecord {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk_id(&chunk.source, chunk.page, chunk.index, &chunk.content),
            content: chunk.content.clone(),
            vector,
            metadata: ChunkMetadata::from(chunk),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub score: f64,
    pub content: String,
}
