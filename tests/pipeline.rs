//! Ingestion pipeline scenarios against the in-memory index.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use vertex_rag::config::{parse_config, Config};
use vertex_rag::error::{SearchError, UploadError};
use vertex_rag::extract::{parse, MIME_PDF, MIME_TEXT, MIME_UNKNOWN};
use vertex_rag::index::memory::InMemoryIndex;
use vertex_rag::index::{IndexRecord, ManagedIndex};
use vertex_rag::ingest::Pipeline;
use vertex_rag::models::{record_id, IngestionStatus, IngestionSummary, SearchQuery, SearchResult, SourceDocument};
use vertex_rag::retry::RetryPolicy;

fn config() -> Config {
    parse_config(
        r#"
[gcp]
project_id = "p"
location = "global"
data_store_id = "ds"
engine_id = "eng"
bucket_name = "bucket"
app_name = "pipeline-test"

[chunking]
max_chars = 120
overlap_chars = 20
"#,
        |_| None,
    )
    .unwrap()
}

fn doc(id: &str, mime: &str, bytes: &[u8]) -> SourceDocument {
    SourceDocument {
        id: id.to_string(),
        bytes: bytes.to_vec(),
        mime_type: mime.to_string(),
    }
}

fn text(id: &str, body: &str) -> SourceDocument {
    doc(id, MIME_TEXT, body.as_bytes())
}

fn corrupt_pdf(id: &str) -> SourceDocument {
    doc(id, MIME_PDF, b"%PDF-1.4\nthis is not really a pdf\n%%EOF")
}

/// Fails the first `fail_first` upserts, then delegates.
struct FlakyIndex {
    inner: InMemoryIndex,
    fail_first: usize,
    retryable: bool,
    attempts: AtomicUsize,
}

impl FlakyIndex {
    fn new(fail_first: usize, retryable: bool) -> Self {
        Self {
            inner: InMemoryIndex::new(),
            fail_first,
            retryable,
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ManagedIndex for FlakyIndex {
    async fn upsert(&self, record: &IndexRecord) -> Result<(), UploadError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(if self.retryable {
                UploadError::transient("request timed out")
            } else {
                UploadError::permanent("403 permission denied")
            });
        }
        self.inner.upsert(record).await
    }

    async fn remove_stale(&self, document_id: &str, from_index: usize) -> Result<usize, UploadError> {
        self.inner.remove_stale(document_id, from_index).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        self.inner.search(query).await
    }
}

/// Minimal valid PDF with one text line per page. Objects are written
/// first, then the xref table with their byte offsets so pdf-extract can
/// load it.
fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            (0..pages.len())
                .map(|i| format!("{} 0 R", 4 + 2 * i))
                .collect::<Vec<_>>()
                .join(" "),
            pages.len()
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];
    for (i, text) in pages.iter().enumerate() {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >>",
            5 + 2 * i
        ));
        let content = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", text);
        objects.push(format!(
            "<< /Length {} >> stream\n{}\nendstream",
            content.len(),
            content
        ));
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

/// Accepts `budget` upserts, then rejects every later one permanently.
struct FailAfter {
    inner: InMemoryIndex,
    budget: AtomicUsize,
}

#[async_trait]
impl ManagedIndex for FailAfter {
    async fn upsert(&self, record: &IndexRecord) -> Result<(), UploadError> {
        if self.budget.load(Ordering::SeqCst) == 0 {
            return Err(UploadError::permanent("403 permission denied"));
        }
        self.budget.fetch_sub(1, Ordering::SeqCst);
        self.inner.upsert(record).await
    }

    async fn remove_stale(&self, document_id: &str, from_index: usize) -> Result<usize, UploadError> {
        self.inner.remove_stale(document_id, from_index).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        self.inner.search(query).await
    }
}

/// Records which documents reached the upload step.
struct RecordingIndex {
    inner: InMemoryIndex,
    uploaded: Mutex<Vec<String>>,
}

#[async_trait]
impl ManagedIndex for RecordingIndex {
    async fn upsert(&self, record: &IndexRecord) -> Result<(), UploadError> {
        self.uploaded.lock().unwrap().push(record.document_id.clone());
        self.inner.upsert(record).await
    }

    async fn remove_stale(&self, document_id: &str, from_index: usize) -> Result<usize, UploadError> {
        self.inner.remove_stale(document_id, from_index).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        self.inner.search(query).await
    }
}

#[tokio::test]
async fn corrupt_document_in_the_middle_does_not_stop_the_batch() {
    let index = RecordingIndex {
        inner: InMemoryIndex::new(),
        uploaded: Mutex::new(Vec::new()),
    };
    let config = config();
    let outcomes = Pipeline::new(&index, &config)
        .ingest_documents(vec![
            text("one.txt", "The first document talks about installation."),
            corrupt_pdf("two.pdf"),
            text("three.txt", "The third document covers maintenance."),
        ])
        .await;

    let results: Vec<_> = outcomes.into_iter().map(|o| o.result).collect();
    assert!(results[0].succeeded());
    assert!(results[2].succeeded());
    match &results[1].status {
        IngestionStatus::FailedToParse { kind, .. } => assert_eq!(kind, "ParseFailure"),
        other => panic!("expected parse failure, got {:?}", other),
    }

    let uploaded = index.uploaded.lock().unwrap();
    assert!(!uploaded.iter().any(|d| d == "two.pdf"));
    assert!(uploaded.iter().any(|d| d == "one.txt"));
    assert!(uploaded.iter().any(|d| d == "three.txt"));

    let summary = IngestionSummary::from_results(&results);
    assert_eq!((summary.succeeded, summary.failed), (2, 1));
}

#[tokio::test]
async fn summary_counts_n_minus_k() {
    let index = InMemoryIndex::new();
    let config = config();
    let docs = vec![
        text("a.txt", "alpha"),
        corrupt_pdf("b.pdf"),
        text("c.txt", "gamma"),
        doc("d.pptx", MIME_UNKNOWN, b"PK\x03\x04"),
        text("e.txt", "epsilon"),
    ];
    let outcomes = Pipeline::new(&index, &config).ingest_documents(docs).await;
    let results: Vec<_> = outcomes.into_iter().map(|o| o.result).collect();
    let summary = IngestionSummary::from_results(&results);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.chunks, 3);
}

#[tokio::test]
async fn reingesting_is_idempotent() {
    let index = InMemoryIndex::new();
    let config = config();
    let body = "Section one explains setup in detail. ".repeat(8);
    let docs = || vec![text("guide.txt", &body), text("faq.txt", "Short FAQ.")];

    let first = Pipeline::new(&index, &config).ingest_documents(docs()).await;
    let chunks: usize = first.iter().map(|o| o.result.chunk_count).sum();
    assert!(chunks > 2);
    let records_after_first = index.len();

    for _ in 0..2 {
        let again = Pipeline::new(&index, &config).ingest_documents(docs()).await;
        assert!(again.iter().all(|o| o.result.succeeded()));
    }

    assert_eq!(index.len(), records_after_first);
    assert_eq!(index.len(), chunks);
    assert_eq!(index.upsert_calls(), 3 * chunks);
}

#[tokio::test]
async fn upload_timeout_then_success_counts_one_retry() {
    let index = FlakyIndex::new(1, true);
    let config = config();
    let outcomes = Pipeline::new(&index, &config)
        .with_retry(RetryPolicy::immediate(3))
        .ingest_documents(vec![text("manual.txt", "Warranty lasts 24 months.")])
        .await;

    let result = &outcomes[0].result;
    assert!(result.succeeded());
    assert_eq!(result.retries, 1);
    assert_eq!(index.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(index.inner.len(), 1);
}

#[tokio::test]
async fn exhausted_retries_mark_document_failed() {
    let index = FlakyIndex::new(10, true);
    let config = config();
    let outcomes = Pipeline::new(&index, &config)
        .with_retry(RetryPolicy::immediate(3))
        .ingest_documents(vec![text("a.txt", "alpha")])
        .await;

    let result = &outcomes[0].result;
    assert!(matches!(result.status, IngestionStatus::FailedToUpload { .. }));
    assert_eq!(result.retries, 2);
    assert_eq!(index.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_upload_error_is_not_retried() {
    let index = FlakyIndex::new(1, false);
    let config = config();
    let outcomes = Pipeline::new(&index, &config)
        .with_retry(RetryPolicy::immediate(5))
        .with_concurrency(1)
        .ingest_documents(vec![text("a.txt", "alpha"), text("b.txt", "beta")])
        .await;

    assert!(matches!(
        outcomes[0].result.status,
        IngestionStatus::FailedToUpload { .. }
    ));
    assert_eq!(outcomes[0].result.retries, 0);
    assert!(outcomes[1].result.succeeded());
}

#[tokio::test]
async fn chunk_records_carry_metadata() {
    let index = InMemoryIndex::new();
    let config = config();
    let body = "Paragraph one is here.\n\nParagraph two follows with more words in it. ".repeat(4);
    Pipeline::new(&index, &config)
        .ingest_documents(vec![text("docs/manual.txt", &body)])
        .await;

    let records = index.records_for("docs/manual.txt");
    assert!(records.len() > 1);
    for (i, r) in records.iter().enumerate() {
        assert_eq!(r.chunk_index, i);
        assert_eq!(r.total_chunks, records.len());
        assert_eq!(r.source_file, "manual.txt");
        assert_eq!(r.id, record_id("docs/manual.txt", i));
        assert!(r.id.starts_with("docs_manual_txt-"));
        assert_eq!(r.content_hash.len(), 64);
    }
}

#[tokio::test]
async fn ids_that_sanitise_alike_keep_separate_records() {
    let index = InMemoryIndex::new();
    let config = config();
    let outcomes = Pipeline::new(&index, &config)
        .ingest_documents(vec![
            text("docs/a.txt", "Slash document about installation."),
            text("docs_a.txt", "Underscore document about maintenance."),
        ])
        .await;
    assert!(outcomes.iter().all(|o| o.result.succeeded()));
    assert_eq!(index.len(), 2);

    let slash = index.records_for("docs/a.txt");
    let underscore = index.records_for("docs_a.txt");
    assert_eq!(slash.len(), 1);
    assert_eq!(underscore.len(), 1);
    assert_ne!(slash[0].id, underscore[0].id);

    // Re-ingesting one document leaves the other untouched.
    Pipeline::new(&index, &config)
        .ingest_documents(vec![text("docs_a.txt", "Short.")])
        .await;
    assert_eq!(index.records_for("docs/a.txt")[0].text, "Slash document about installation.");
    assert_eq!(index.records_for("docs_a.txt")[0].text, "Short.");
}

#[tokio::test]
async fn failed_reupload_leaves_no_mixed_versions() {
    let index = FailAfter {
        inner: InMemoryIndex::new(),
        budget: AtomicUsize::new(usize::MAX),
    };
    let config = config();
    let old = "Old release notes describe the previous firmware. ".repeat(10);
    let first = Pipeline::new(&index, &config)
        .ingest_documents(vec![text("notes.txt", &old)])
        .await;
    let old_chunks = first[0].result.chunk_count;
    assert!(old_chunks > 3);
    assert_eq!(index.inner.records_for("notes.txt").len(), old_chunks);

    index.budget.store(2, Ordering::SeqCst);
    let new = "New release notes describe the current firmware. ".repeat(10);
    let second = Pipeline::new(&index, &config)
        .with_retry(RetryPolicy::immediate(3))
        .ingest_documents(vec![text("notes.txt", &new)])
        .await;

    assert!(matches!(
        second[0].result.status,
        IngestionStatus::FailedToUpload { .. }
    ));
    assert!(second[0].records.is_empty());
    assert!(index.inner.records_for("notes.txt").is_empty());
    assert!(index.inner.is_empty());
}

#[test]
fn valid_pdf_is_parsed_page_by_page() {
    let bytes = pdf_with_pages(&[
        "Installation guide for product X. Unpack the device and connect the power cable first.",
        "The warranty period for product X is 24 months from the date of purchase.",
    ]);
    let parsed = parse(&doc("manuals/product-x.pdf", MIME_PDF, &bytes)).unwrap();

    let install = parsed.text.find("Installation guide").expect("page 1 text");
    let warranty = parsed.text.find("24 months").expect("page 2 text");
    assert!(install < warranty);

    assert_eq!(parsed.pages.len(), 2);
    assert_eq!(parsed.pages[0].page, 1);
    assert_eq!(parsed.pages[0].char_start, 0);
    assert_eq!(parsed.pages[1].page, 2);
    assert_eq!(parsed.pages[1].char_start, parsed.pages[0].char_end);
    assert_eq!(parsed.pages[1].char_end, parsed.text.chars().count());

    let char_at = |byte: usize| parsed.text[..byte].chars().count();
    assert_eq!(parsed.page_at(char_at(install)), Some(1));
    assert_eq!(parsed.page_at(char_at(warranty)), Some(2));
    assert_eq!(parsed.page_at(parsed.text.chars().count()), None);
}

#[tokio::test]
async fn pdf_chunks_carry_their_page() {
    let index = InMemoryIndex::new();
    let mut config = config();
    config.chunking.max_chars = 60;
    config.chunking.overlap_chars = 10;
    let bytes = pdf_with_pages(&[
        "Installation guide for product X. Unpack the device and connect the power cable first.",
        "The warranty period for product X is 24 months from the date of purchase.",
    ]);
    let outcomes = Pipeline::new(&index, &config)
        .ingest_documents(vec![doc("product-x.pdf", MIME_PDF, &bytes)])
        .await;
    assert!(outcomes[0].result.succeeded(), "{:?}", outcomes[0].result);

    let records = index.records_for("product-x.pdf");
    assert!(records.len() > 2);
    assert_eq!(records[0].page, Some(1));
    assert_eq!(records.last().unwrap().page, Some(2));
    for pair in records.windows(2) {
        assert!(pair[0].page <= pair[1].page);
    }
    assert!(records.iter().all(|r| r.page.is_some()));
}
