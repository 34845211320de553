//! Core data models for the ingestion and retrieval pipeline.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Maximum record id length accepted by the managed index.
const MAX_RECORD_ID_LEN: usize = 63;

/// A source file as read from disk, before parsing.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Path relative to the input root, or the path as given on the CLI.
    pub id: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Page (or section) boundary inside a parsed document, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageSpan {
    pub page: u32,
    pub char_start: usize,
    pub char_end: usize,
}

/// Text extracted from a [`SourceDocument`].
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub id: String,
    pub text: String,
    pub pages: Vec<PageSpan>,
}

impl ParsedDocument {
    /// Page containing the given character offset, if page spans are known.
    pub fn page_at(&self, char_offset: usize) -> Option<u32> {
        self.pages
            .iter()
            .find(|p| char_offset >= p.char_start && char_offset < p.char_end)
            .map(|p| p.page)
    }
}

/// A bounded passage of a parsed document.
///
/// Offsets are character (not byte) positions into the parent text;
/// `text` is exactly the parent's `char_start..char_end` span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub hash: String,
}

impl Chunk {
    /// Deterministic index record id for this chunk.
    pub fn record_id(&self) -> String {
        record_id(&self.document_id, self.chunk_index)
    }
}

/// Build the index record id for chunk `index` of `document_id`.
///
/// Ids are restricted to `[A-Za-z0-9_-]`, start with an alphanumeric and
/// are at most 63 characters. The readable stem is followed by a short
/// hash of the raw document id, so ids that sanitise or truncate to the
/// same stem (`docs/a.txt`, `docs_a.txt`) stay distinct.
pub fn record_id(document_id: &str, index: usize) -> String {
    let mut stem: String = document_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !stem.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        stem.insert(0, 'd');
    }
    let digest = format!("{:x}", Sha256::digest(document_id.as_bytes()));
    let suffix = format!("-{}_chunk_{}", &digest[..8], index);
    // The stem is ASCII, so truncating by bytes stays on a char boundary.
    stem.truncate(MAX_RECORD_ID_LEN.saturating_sub(suffix.len()));
    stem + &suffix
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionStatus {
    Succeeded,
    FailedToParse { kind: String, detail: String },
    FailedToUpload { detail: String },
    /// Not processed, e.g. a repeated document id.
    Skipped { reason: String },
}

/// Per-document result of an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub document_id: String,
    pub status: IngestionStatus,
    pub chunk_count: usize,
    /// Upload retries spent on this document, across all of its chunks.
    pub retries: u32,
}

impl IngestionResult {
    pub fn succeeded(&self) -> bool {
        self.status == IngestionStatus::Succeeded
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub chunks: usize,
}

impl IngestionSummary {
    pub fn from_results(results: &[IngestionResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.succeeded()).count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.status, IngestionStatus::Skipped { .. }))
            .count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded - skipped,
            skipped,
            chunks: results
                .iter()
                .filter(|r| r.succeeded())
                .map(|r| r.chunk_count)
                .sum(),
        }
    }
}

/// A query sent to the managed index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    /// Optional filter expression passed through to the index.
    pub filter: Option<String>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filter: None,
        }
    }
}

/// One ranked result from the managed index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Index record id.
    pub document: String,
    pub title: Option<String>,
    pub link: Option<String>,
    /// 1-based position in the service's relevance ordering.
    pub rank: usize,
    pub segments: Vec<String>,
    pub answers: Vec<String>,
    pub snippets: Vec<String>,
}
