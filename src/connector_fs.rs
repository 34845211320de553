//! Filesystem source discovery.
//!
//! Walks `ingest.input_dir`, keeps files matching the include globs and
//! not matching the exclude globs (plus `.git`), and returns them sorted
//! by relative path. Explicit CLI file lists bypass the walk.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::error::ParseError;
use crate::extract::mime_for_path;
use crate::models::SourceDocument;

/// A file selected for ingestion, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Document identifier: path relative to the input root, or as given.
    pub id: String,
    pub path: PathBuf,
}

/// Find source files under the configured input directory.
pub fn discover(config: &IngestConfig) -> Result<Vec<SourceFile>> {
    let root = &config.input_dir;
    if !root.is_dir() {
        bail!("input directory does not exist: {}", root.display());
    }

    let include = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel = relative.to_string_lossy().replace('\\', "/");
        if exclude.is_match(&rel) || !include.is_match(&rel) {
            continue;
        }
        files.push(SourceFile {
            id: rel,
            path: path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::info!(root = %root.display(), files = files.len(), "discovered source files");
    Ok(files)
}

/// Turn explicit paths into source files.
///
/// Ids drop a leading `./`, so `./a.txt` and `a.txt` name the same
/// document; the pipeline reports the repeat as skipped.
pub fn from_paths(paths: &[PathBuf]) -> Vec<SourceFile> {
    paths
        .iter()
        .map(|p| SourceFile {
            id: p.to_string_lossy().trim_start_matches("./").to_string(),
            path: p.clone(),
        })
        .collect()
}

/// Read a source file into memory.
///
/// Files larger than `max_bytes` are rejected without being read.
pub fn load(file: &SourceFile, max_bytes: u64) -> Result<SourceDocument, ParseError> {
    let io_err = |source| ParseError::Io {
        path: file.path.clone(),
        source,
    };
    let size = std::fs::metadata(&file.path).map_err(io_err)?.len();
    if size > max_bytes {
        return Err(ParseError::ParseFailure(format!(
            "file is {} bytes, limit is {}",
            size, max_bytes
        )));
    }
    let bytes = std::fs::read(&file.path).map_err(io_err)?;
    Ok(SourceDocument {
        id: file.id.clone(),
        mime_type: mime_for_path(Path::new(&file.path)).to_string(),
        bytes,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}
