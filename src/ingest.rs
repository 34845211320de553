//! Ingestion pipeline: load → parse → chunk → upload.
//!
//! Documents are processed independently with bounded parallelism
//! (`ingest.concurrency`). A failure is recorded in that document's
//! [`IngestionResult`] and never stops the batch:
//!
//! - load and parse failures are deterministic and not retried;
//! - each chunk upload is retried under the configured [`RetryPolicy`]
//!   while the index reports the failure as transient.
//!
//! Record ids are derived from the document id and chunk index, so
//! re-ingesting a document overwrites its records. After all chunks are
//! written, records past the new chunk count are removed. If an upload
//! stops partway, every record of the document is removed instead, so the
//! index never holds a mix of old and new chunks.
//!
//! Repeated document ids are ingested once; later occurrences are
//! reported as skipped. Results are reported in input order. A JSONL manifest of every
//! uploaded chunk is written to `ingest.output_dir`.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::connector_fs::{self, SourceFile};
use crate::error::{ParseError, UploadError};
use crate::extract;
use crate::index::{IndexRecord, ManagedIndex};
use crate::models::{IngestionResult, IngestionStatus, IngestionSummary, ParsedDocument, SourceDocument};
use crate::retry::{retry, RetryPolicy};

/// File name of the chunk manifest inside `ingest.output_dir`.
pub const MANIFEST_FILE: &str = "processed_data.jsonl";

/// Outcome of one document, with the records that were written for it.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub result: IngestionResult,
    pub records: Vec<IndexRecord>,
}

/// Per-run pipeline settings bound to one index.
pub struct Pipeline<'a> {
    index: &'a dyn ManagedIndex,
    chunking: ChunkingConfig,
    retry: RetryPolicy,
    concurrency: usize,
    max_file_bytes: u64,
    dry_run: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(index: &'a dyn ManagedIndex, config: &Config) -> Self {
        Self {
            index,
            chunking: config.chunking,
            retry: config.ingest.retry.policy(),
            concurrency: config.ingest.concurrency.max(1),
            max_file_bytes: config.ingest.max_file_bytes,
            dry_run: false,
        }
    }

    /// Parse and chunk only; nothing is sent to the index.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Ingest documents already in memory.
    pub async fn ingest_documents(&self, documents: Vec<SourceDocument>) -> Vec<DocumentOutcome> {
        let mut seen = HashSet::new();
        let jobs: Vec<_> = documents
            .into_iter()
            .map(|doc| {
                let first = keep_first(&mut seen, &doc.id);
                async move {
                    if first {
                        self.process(doc).await
                    } else {
                        skipped(doc.id)
                    }
                }
            })
            .collect();
        self.run_all(jobs).await
    }

    /// Load and ingest files from disk.
    pub async fn ingest_files(&self, files: Vec<SourceFile>) -> Vec<DocumentOutcome> {
        let mut seen = HashSet::new();
        let jobs: Vec<_> = files
            .into_iter()
            .map(|file| {
                let first = keep_first(&mut seen, &file.id);
                async move {
                    if !first {
                        return skipped(file.id);
                    }
                    match connector_fs::load(&file, self.max_file_bytes) {
                        Ok(doc) => self.process(doc).await,
                        Err(e) => parse_failed(file.id, e),
                    }
                }
            })
            .collect();
        self.run_all(jobs).await
    }

    async fn run_all<F>(&self, jobs: Vec<F>) -> Vec<DocumentOutcome>
    where
        F: Future<Output = DocumentOutcome>,
    {
        let mut outcomes: Vec<(usize, DocumentOutcome)> = stream::iter(
            jobs.into_iter()
                .enumerate()
                .map(|(i, job)| async move { (i, job.await) }),
        )
        .buffer_unordered(self.concurrency)
        .collect()
        .await;
        outcomes.sort_by_key(|(i, _)| *i);
        outcomes.into_iter().map(|(_, o)| o).collect()
    }

    async fn process(&self, doc: SourceDocument) -> DocumentOutcome {
        let id = doc.id.clone();
        let parsed = match parse_blocking(doc).await {
            Ok(parsed) => parsed,
            Err(e) => return parse_failed(id, e),
        };

        let chunks = chunk_text(&parsed.id, &parsed.text, &self.chunking);
        if chunks.is_empty() {
            tracing::warn!(document = %id, "document has no extractable text");
        }
        let total = chunks.len();
        let records: Vec<IndexRecord> = chunks
            .iter()
            .map(|c| IndexRecord::from_chunk(c, total, parsed.page_at(c.char_start)))
            .collect();
        tracing::debug!(document = %id, chunks = total, "chunked document");

        if self.dry_run {
            return succeeded(id, records, 0);
        }

        let mut retries = 0;
        for record in &records {
            let out = retry(
                &self.retry,
                |_| self.index.upsert(record),
                |e: &UploadError| e.retryable,
            )
            .await;
            retries += out.retries;
            if let Err(e) = out.result {
                self.discard(&id).await;
                return upload_failed(id, total, retries, e);
            }
        }

        let out = retry(
            &self.retry,
            |_| self.index.remove_stale(&id, total),
            |e: &UploadError| e.retryable,
        )
        .await;
        retries += out.retries;
        if let Err(e) = out.result {
            return upload_failed(id, total, retries, e);
        }

        tracing::info!(document = %id, chunks = total, retries, "ingested document");
        succeeded(id, records, retries)
    }

    /// Best-effort removal of every record of a partially uploaded document.
    async fn discard(&self, id: &str) {
        let out = retry(
            &self.retry,
            |_| self.index.remove_stale(id, 0),
            |e: &UploadError| e.retryable,
        )
        .await;
        match out.result {
            Ok(removed) => tracing::warn!(document = %id, removed, "discarded partial upload"),
            Err(e) => tracing::error!(document = %id, error = %e, "failed to discard partial upload"),
        }
    }
}

fn keep_first(seen: &mut HashSet<String>, id: &str) -> bool {
    if seen.insert(id.to_string()) {
        true
    } else {
        tracing::warn!(document = %id, "duplicate document id skipped");
        false
    }
}

/// PDF extraction is CPU-bound; keep it off the async workers.
async fn parse_blocking(doc: SourceDocument) -> Result<ParsedDocument, ParseError> {
    tokio::task::spawn_blocking(move || extract::parse(&doc))
        .await
        .unwrap_or_else(|e| Err(ParseError::ParseFailure(format!("parser task failed: {}", e))))
}

fn succeeded(document_id: String, records: Vec<IndexRecord>, retries: u32) -> DocumentOutcome {
    DocumentOutcome {
        result: IngestionResult {
            document_id,
            status: IngestionStatus::Succeeded,
            chunk_count: records.len(),
            retries,
        },
        records,
    }
}

fn skipped(document_id: String) -> DocumentOutcome {
    DocumentOutcome {
        result: IngestionResult {
            document_id,
            status: IngestionStatus::Skipped {
                reason: "duplicate".to_string(),
            },
            chunk_count: 0,
            retries: 0,
        },
        records: Vec::new(),
    }
}

fn parse_failed(document_id: String, e: ParseError) -> DocumentOutcome {
    tracing::error!(document = %document_id, error = %e, "failed to parse document");
    let detail = match &e {
        ParseError::UnsupportedFormat(mime) => mime.clone(),
        ParseError::ParseFailure(detail) => detail.clone(),
        ParseError::Io { .. } => e.to_string(),
    };
    DocumentOutcome {
        result: IngestionResult {
            document_id,
            status: IngestionStatus::FailedToParse {
                kind: e.kind().to_string(),
                detail,
            },
            chunk_count: 0,
            retries: 0,
        },
        records: Vec::new(),
    }
}

fn upload_failed(document_id: String, chunks: usize, retries: u32, e: UploadError) -> DocumentOutcome {
    tracing::error!(document = %document_id, retries, error = %e, "failed to upload document");
    DocumentOutcome {
        result: IngestionResult {
            document_id,
            status: IngestionStatus::FailedToUpload { detail: e.message },
            chunk_count: chunks,
            retries,
        },
        records: Vec::new(),
    }
}

/// Status line printed for one document.
pub fn status_line(result: &IngestionResult) -> String {
    match &result.status {
        IngestionStatus::Succeeded => format!(
            "ok     {}  chunks={} retries={}",
            result.document_id, result.chunk_count, result.retries
        ),
        IngestionStatus::FailedToParse { kind, detail } => {
            format!("failed {}  {}: {}", result.document_id, kind, detail)
        }
        IngestionStatus::FailedToUpload { detail } => {
            format!("failed {}  UploadFailure: {}", result.document_id, detail)
        }
        IngestionStatus::Skipped { reason } => format!("skipped {}  {}", result.document_id, reason),
    }
}

/// Final summary line. Skipped inputs are only mentioned when there are any.
pub fn summary_line(summary: &IngestionSummary) -> String {
    let mut line = format!(
        "ingested {} documents: succeeded={} failed={} chunks={}",
        summary.total, summary.succeeded, summary.failed, summary.chunks
    );
    if summary.skipped > 0 {
        line.push_str(&format!(" skipped={}", summary.skipped));
    }
    line
}

#[derive(Serialize)]
struct ManifestLine<'a> {
    record_id: &'a str,
    document_id: &'a str,
    chunk_index: usize,
    total_chunks: usize,
    char_start: usize,
    char_end: usize,
    length: usize,
    page: Option<u32>,
    content_hash: &'a str,
    ingested_at: &'a str,
    text: &'a str,
}

/// Write one JSON line per uploaded chunk, replacing any previous manifest.
pub fn write_manifest(output_dir: &Path, outcomes: &[DocumentOutcome]) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let path = output_dir.join(MANIFEST_FILE);
    let file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);

    let now = chrono::Utc::now().to_rfc3339();
    for record in outcomes.iter().flat_map(|o| &o.records) {
        let line = ManifestLine {
            record_id: &record.id,
            document_id: &record.document_id,
            chunk_index: record.chunk_index,
            total_chunks: record.total_chunks,
            char_start: record.char_start,
            char_end: record.char_end,
            length: record.char_end - record.char_start,
            page: record.page,
            content_hash: &record.content_hash,
            ingested_at: &now,
            text: &record.text,
        };
        serde_json::to_writer(&mut writer, &line)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(path)
}

/// Results of an `ingest` run.
#[derive(Debug)]
pub struct IngestReport {
    pub results: Vec<IngestionResult>,
    pub summary: IngestionSummary,
    pub manifest: PathBuf,
}

/// Run ingestion for the given files (or the discovered input directory)
/// and print status lines and the summary.
pub async fn run_ingest(
    config: &Config,
    index: &dyn ManagedIndex,
    files: Option<Vec<SourceFile>>,
    dry_run: bool,
) -> Result<IngestReport> {
    let files = match files {
        Some(files) => files,
        None => connector_fs::discover(&config.ingest)?,
    };
    tracing::info!(documents = files.len(), dry_run, "starting ingestion");

    let outcomes = Pipeline::new(index, config)
        .dry_run(dry_run)
        .ingest_files(files)
        .await;

    for outcome in &outcomes {
        println!("{}", status_line(&outcome.result));
    }
    let manifest = write_manifest(&config.ingest.output_dir, &outcomes)?;
    let results: Vec<IngestionResult> = outcomes.into_iter().map(|o| o.result).collect();
    let summary = IngestionSummary::from_results(&results);
    println!("{}", summary_line(&summary));
    if dry_run {
        println!("dry run: nothing uploaded, manifest at {}", manifest.display());
    }

    Ok(IngestReport {
        results,
        summary,
        manifest,
    })
}
