//! Document parser: turns [`SourceDocument`] bytes into plain text.
//!
//! Supported formats are detected from the file extension:
//!
//! | Extension | MIME type | Extraction |
//! |-----------|-----------|------------|
//! | `.pdf` | `application/pdf` | `pdf-extract`, one [`PageSpan`] per page |
//! | `.txt`, `.md` | `text/plain` | UTF-8, Latin-1 fallback |
//! | `.csv` | `text/csv` | one labelled block per record |
//! | `.eml` | `message/rfc822` | headers plus text/plain body parts |
//!
//! Reading order of the source is preserved. Parsing has no side effects.

use std::path::Path;

use crate::error::ParseError;
use crate::models::{PageSpan, ParsedDocument, SourceDocument};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_EMAIL: &str = "message/rfc822";

/// Fallback MIME type for extensions the parser does not know.
pub const MIME_UNKNOWN: &str = "application/octet-stream";

/// Map a file path to the MIME type the parser will use for it.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "txt" | "md" => MIME_TEXT,
        "csv" => MIME_CSV,
        "eml" => MIME_EMAIL,
        _ => MIME_UNKNOWN,
    }
}

/// Parse a source document into text.
pub fn parse(doc: &SourceDocument) -> Result<ParsedDocument, ParseError> {
    let name = Path::new(&doc.id)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| doc.id.clone());

    let (text, pages) = match doc.mime_type.as_str() {
        MIME_PDF => extract_pdf(&doc.bytes)?,
        MIME_TEXT => (decode_text(&doc.bytes, &doc.id), Vec::new()),
        MIME_CSV => (extract_csv(&doc.bytes, &name)?, Vec::new()),
        MIME_EMAIL => (extract_email(&doc.bytes, &name)?, Vec::new()),
        other => return Err(ParseError::UnsupportedFormat(other.to_string())),
    };

    tracing::debug!(document = %doc.id, chars = text.chars().count(), pages = pages.len(), "parsed document");
    Ok(ParsedDocument {
        id: doc.id.clone(),
        text,
        pages,
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<(String, Vec<PageSpan>), ParseError> {
    // pdf-extract panics on some malformed inputs.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ParseError::ParseFailure("PDF extraction panicked".to_string()))?
        .map_err(|e| ParseError::ParseFailure(format!("PDF extraction failed: {}", e)))?;

    let mut text = String::new();
    let mut spans = Vec::with_capacity(pages.len());
    let mut offset = 0usize;
    for (i, page) in pages.iter().enumerate() {
        text.push_str(page);
        text.push('\n');
        let len = page.chars().count() + 1;
        spans.push(PageSpan {
            page: i as u32 + 1,
            char_start: offset,
            char_end: offset + len,
        });
        offset += len;
    }
    Ok((text, spans))
}

fn decode_text(bytes: &[u8], id: &str) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            tracing::warn!(document = %id, "not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

fn extract_csv(bytes: &[u8], name: &str) -> Result<String, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::ParseFailure(format!("CSV header: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record.map_err(|e| ParseError::ParseFailure(format!("CSV record: {}", e)))?);
    }

    let mut lines = vec![
        format!("CSV File: {}", name),
        format!("Columns: {}", headers.join(", ")),
        format!("Total Records: {}\n", records.len()),
    ];
    for (idx, record) in records.iter().enumerate() {
        lines.push(format!("--- Record {} ---", idx + 1));
        for (col, header) in headers.iter().enumerate() {
            let value = record.get(col).map(str::trim).unwrap_or("");
            let value = if value.is_empty() { "N/A" } else { value };
            lines.push(format!("{}: {}", header, value));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

fn extract_email(bytes: &[u8], name: &str) -> Result<String, ParseError> {
    let message = mail_parser::MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| ParseError::ParseFailure("not an RFC 822 message".to_string()))?;

    let header = |h: &str| {
        message
            .header_raw(h)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "N/A".to_string())
    };

    let mut body_parts = Vec::new();
    let mut pos = 0;
    while let Some(part) = message.body_text(pos) {
        body_parts.push(part.into_owned());
        pos += 1;
    }
    let body = if body_parts.is_empty() {
        "No body content".to_string()
    } else {
        body_parts.join("\n")
    };

    Ok([
        format!("Email: {}", name),
        format!("From: {}", header("From")),
        format!("To: {}", header("To")),
        format!("Subject: {}", header("Subject")),
        format!("Date: {}", header("Date")),
        String::new(),
        "Body:".to_string(),
        body,
    ]
    .join("\n"))
}
