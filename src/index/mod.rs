//! Managed index abstraction.
//!
//! The [`ManagedIndex`] trait is the boundary to the hosted search
//! service: record upserts during ingestion and extractive queries
//! during chat. Implementations:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`vertex::VertexSearchIndex`] | Vertex AI Search (Discovery Engine) + Cloud Storage REST APIs |
//! | [`memory::InMemoryIndex`] | In-process index for tests and dry runs |
//!
//! Implementations must be `Send + Sync`; the ingestion pipeline uploads
//! from several documents concurrently.

pub mod memory;
pub mod vertex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{SearchError, UploadError};
use crate::models::{Chunk, SearchQuery, SearchResult};

/// A chunk as written to the managed index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexRecord {
    pub id: String,
    pub document_id: String,
    pub source_file: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub content_hash: String,
    pub page: Option<u32>,
    pub text: String,
}

impl IndexRecord {
    pub fn from_chunk(chunk: &Chunk, total_chunks: usize, page: Option<u32>) -> Self {
        let source_file = std::path::Path::new(&chunk.document_id)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| chunk.document_id.clone());
        Self {
            id: chunk.record_id(),
            document_id: chunk.document_id.clone(),
            source_file,
            chunk_index: chunk.chunk_index,
            total_chunks,
            char_start: chunk.char_start,
            char_end: chunk.char_end,
            content_hash: chunk.hash.clone(),
            page,
            text: chunk.text.clone(),
        }
    }

    /// Metadata attached to the record, without the text body.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "source_file": self.source_file,
            "document_id": self.document_id,
            "chunk_index": self.chunk_index,
            "total_chunks": self.total_chunks,
            "char_start": self.char_start,
            "char_end": self.char_end,
            "content_hash": self.content_hash,
            "page": self.page,
        })
    }
}

/// Hosted document index.
#[async_trait]
pub trait ManagedIndex: Send + Sync {
    /// Create or overwrite the record with `record.id`.
    async fn upsert(&self, record: &IndexRecord) -> Result<(), UploadError>;

    /// Remove records of `document_id` whose chunk index is `>= from_index`.
    ///
    /// Called after a successful re-upload so a document that shrank
    /// leaves no stale chunks behind. Returns the number removed.
    async fn remove_stale(&self, document_id: &str, from_index: usize) -> Result<usize, UploadError>;

    /// Query the index, requesting extractive segments and answers.
    ///
    /// Results are returned in the service's relevance order.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError>;
}
