//! In-process [`ManagedIndex`] for tests and dry runs.
//!
//! Records live in a `BTreeMap` behind a `RwLock`, keyed by record id, so
//! upserts overwrite exactly as the hosted index does. Search is a naive
//! term-overlap ranking; every stored chunk is returned whole as its
//! extractive segment and the best-matching sentence as its answer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{IndexRecord, ManagedIndex};
use crate::error::{SearchError, UploadError};
use crate::models::{SearchQuery, SearchResult};

/// In-memory index.
pub struct InMemoryIndex {
    records: RwLock<BTreeMap<String, IndexRecord>>,
    page_size: usize,
    upsert_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::with_page_size(5)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            upsert_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<IndexRecord> {
        self.read().get(id).cloned()
    }

    /// All records of one document, ordered by chunk index.
    pub fn records_for(&self, document_id: &str) -> Vec<IndexRecord> {
        let mut records: Vec<IndexRecord> = self
            .read()
            .values()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.chunk_index);
        records
    }

    /// Total `upsert` calls received, including overwrites.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, IndexRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, IndexRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn overlap(terms: &[String], text: &str) -> usize {
    let words = self::terms(text);
    terms.iter().filter(|t| words.contains(t)).count()
}

fn best_sentence(terms: &[String], text: &str) -> Option<String> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| (overlap(terms, s), s))
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score)
        .map(|(_, s)| s.to_string())
}

#[async_trait]
impl ManagedIndex for InMemoryIndex {
    async fn upsert(&self, record: &IndexRecord) -> Result<(), UploadError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.write().insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove_stale(&self, document_id: &str, from_index: usize) -> Result<usize, UploadError> {
        let mut records = self.write();
        let before = records.len();
        records.retain(|_, r| r.document_id != document_id || r.chunk_index < from_index);
        Ok(before - records.len())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let query_terms = terms(&query.text);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.read();
        let mut scored: Vec<(usize, &IndexRecord)> = records
            .values()
            .filter(|r| match &query.filter {
                Some(f) => r.source_file == *f || r.document_id == *f,
                None => true,
            })
            .map(|r| (overlap(&query_terms, &r.text), r))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable sort keeps id order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(self.page_size)
            .enumerate()
            .map(|(i, (_, r))| SearchResult {
                document: r.id.clone(),
                title: Some(r.source_file.clone()),
                link: None,
                rank: i + 1,
                segments: vec![r.text.clone()],
                answers: best_sentence(&query_terms, &r.text).into_iter().collect(),
                snippets: vec![r.text.chars().take(160).collect()],
            })
            .collect())
    }
}
