//! Search client: a pass-through over [`ManagedIndex::search`].
//!
//! Adds a hard timeout (surfaced as `ServiceUnavailable`), query
//! validation and logging. No caching or re-ranking happens here; result
//! order is the service's relevance order.

use std::sync::Arc;
use std::time::Duration;

use crate::error::SearchError;
use crate::index::ManagedIndex;
use crate::models::{SearchQuery, SearchResult};

#[derive(Clone)]
pub struct SearchClient {
    index: Arc<dyn ManagedIndex>,
    timeout: Duration,
}

impl SearchClient {
    pub fn new(index: Arc<dyn ManagedIndex>, timeout: Duration) -> Self {
        Self { index, timeout }
    }

    /// Run a query against the managed index.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        if query.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let results = tokio::time::timeout(self.timeout, self.index.search(query))
            .await
            .map_err(|_| {
                SearchError::ServiceUnavailable(format!(
                    "search timed out after {}s",
                    self.timeout.as_secs_f32()
                ))
            })?;

        match &results {
            Ok(r) => tracing::info!(query = %query.text, results = r.len(), "search completed"),
            Err(e) => tracing::warn!(query = %query.text, error = %e, "search failed"),
        }
        results
    }
}

/// Render results as the context block handed to the reasoning step.
///
/// Extractive segments are preferred; snippets are used only for results
/// that carry no segments.
pub fn format_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No relevant documents found.".to_string();
    }

    let mut out = String::new();
    for r in results {
        let label = r.title.as_deref().unwrap_or(&r.document);
        out.push_str(&format!("[{}] {}\n", r.rank, label));
        for answer in &r.answers {
            out.push_str(&format!("Answer: {}\n", answer));
        }
        let passages = if r.segments.is_empty() {
            &r.snippets
        } else {
            &r.segments
        };
        for p in passages {
            out.push_str(p.trim());
            out.push('\n');
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}
