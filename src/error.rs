//! Error taxonomy for ingestion, retrieval, and the reasoning backend.
//!
//! Per-document errors ([`ParseError`], [`UploadError`]) are recorded in
//! the ingestion summary and never abort a batch. Query-time errors
//! ([`SearchError`], [`ModelError`]) are caught at the agent boundary.
//! [`ConfigError`] is the only class that is fatal, and only at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn a source document into text. Never retried.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ParseError {
    /// Short label used in status lines and the manifest.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::UnsupportedFormat(_) => "UnsupportedFormat",
            ParseError::ParseFailure(_) | ParseError::Io { .. } => "ParseFailure",
        }
    }
}

/// Failure to write a record to the managed index.
#[derive(Debug, Error)]
#[error("upload failure: {message}")]
pub struct UploadError {
    /// Transient failures (timeouts, 429, 5xx) are retried by the pipeline.
    pub retryable: bool,
    pub message: String,
}

impl UploadError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Failure of a query against the managed index.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("invalid search configuration: {0}")]
    InvalidConfiguration(String),
}

/// Failure of a reasoning step.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model rejected request: {0}")]
    Rejected(String),

    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Unavailable(_))
    }
}

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
