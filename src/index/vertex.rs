//! Vertex AI Search (Discovery Engine) backend.
//!
//! # Upload
//!
//! Each record's text is written to `gs://<bucket>/chunks/<id>.txt`, then
//! upserted as a data-store document:
//!
//! ```text
//! PATCH {base}/v1/projects/{p}/locations/{l}/collections/default_collection/
//!       dataStores/{ds}/branches/default_branch/documents/{id}?allowMissing=true
//! ```
//!
//! # Query
//!
//! Queries go to the configured serving config, under the engine (the
//! enterprise-tier resource that unlocks extractive content) or directly
//! under the data store. Extractive answers and segments are always
//! requested; snippets are requested too as a fallback for display.
//!
//! # Error mapping
//!
//! - HTTP 429 or 5xx, timeouts, transport errors → transient
//!   (`UploadError::transient`, `SearchError::ServiceUnavailable`)
//! - Other HTTP 4xx → permanent
//!   (`UploadError::permanent`, `SearchError::InvalidConfiguration`)

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{IndexRecord, ManagedIndex};
use crate::auth::TokenSource;
use crate::config::{Config, SearchResource};
use crate::error::{SearchError, UploadError};
use crate::models::{SearchQuery, SearchResult};

const STORAGE_BASE: &str = "https://storage.googleapis.com";

/// Managed index backed by Vertex AI Search and Cloud Storage.
pub struct VertexSearchIndex {
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    discovery_base: String,
    storage_base: String,
    collection: String,
    data_store_id: String,
    serving_config: String,
    bucket: String,
    page_size: u32,
    max_answers: u32,
    max_segments: u32,
}

impl VertexSearchIndex {
    pub fn new(config: &Config, tokens: Arc<TokenSource>) -> anyhow::Result<Self> {
        let gcp = &config.gcp;
        let client = reqwest::Client::builder()
            .timeout(config.search.timeout())
            .user_agent(gcp.app_name.clone())
            .build()?;

        let collection = format!(
            "projects/{}/locations/{}/collections/default_collection",
            gcp.project_id, gcp.location
        );
        let serving_config = match config.search.resource {
            SearchResource::DataStore => format!(
                "{}/dataStores/{}/servingConfigs/{}",
                collection, gcp.data_store_id, config.search.serving_config
            ),
            SearchResource::Engine => format!(
                "{}/engines/{}/servingConfigs/{}",
                collection, gcp.engine_id, config.search.serving_config
            ),
        };

        Ok(Self {
            client,
            tokens,
            discovery_base: config
                .search
                .endpoint
                .clone()
                .unwrap_or_else(|| discovery_host(&gcp.location)),
            storage_base: config
                .storage
                .endpoint
                .clone()
                .unwrap_or_else(|| STORAGE_BASE.to_string()),
            collection,
            data_store_id: gcp.data_store_id.clone(),
            serving_config,
            bucket: gcp.bucket_name.clone(),
            page_size: config.search.page_size,
            max_answers: config.search.max_extractive_answers,
            max_segments: config.search.max_extractive_segments,
        })
    }

    /// Resource path of the serving config queried by [`ManagedIndex::search`].
    pub fn serving_config(&self) -> &str {
        &self.serving_config
    }

    fn document_url(&self, id: &str) -> String {
        format!(
            "{}/v1/{}/dataStores/{}/branches/default_branch/documents/{}",
            self.discovery_base, self.collection, self.data_store_id, id
        )
    }

    async fn upload_token(&self) -> Result<String, UploadError> {
        self.tokens
            .token()
            .await
            .map_err(|e| UploadError::permanent(format!("auth: {:#}", e)))
    }

    async fn put_object(&self, token: &str, record: &IndexRecord) -> Result<String, UploadError> {
        let object = format!("chunks/{}.txt", record.id);
        let resp = self
            .client
            .post(format!(
                "{}/upload/storage/v1/b/{}/o",
                self.storage_base, self.bucket
            ))
            .query(&[("uploadType", "media"), ("name", object.as_str())])
            .bearer_auth(token)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(record.text.clone())
            .send()
            .await
            .map_err(|e| UploadError::transient(format!("storage request: {}", e)))?;
        check_upload(resp, "storage").await?;
        Ok(format!("gs://{}/{}", self.bucket, object))
    }
}

/// Default Discovery Engine host for a location.
pub fn discovery_host(location: &str) -> String {
    if location == "global" {
        "https://discoveryengine.googleapis.com".to_string()
    } else {
        format!("https://{}-discoveryengine.googleapis.com", location)
    }
}

async fn check_upload(resp: reqwest::Response, what: &str) -> Result<(), UploadError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", what, status, body);
    if is_transient(status) {
        Err(UploadError::transient(message))
    } else {
        Err(UploadError::permanent(message))
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl ManagedIndex for VertexSearchIndex {
    async fn upsert(&self, record: &IndexRecord) -> Result<(), UploadError> {
        let token = self.upload_token().await?;
        let gcs_uri = self.put_object(&token, record).await?;

        let mut struct_data = record.metadata();
        struct_data["gcs_uri"] = json!(gcs_uri);
        let body = json!({
            "id": record.id,
            "structData": struct_data,
            "content": {
                "mimeType": "text/plain",
                "rawBytes": base64::engine::general_purpose::STANDARD.encode(record.text.as_bytes()),
            },
        });

        let resp = self
            .client
            .patch(self.document_url(&record.id))
            .query(&[("allowMissing", "true")])
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::transient(format!("discovery engine request: {}", e)))?;
        check_upload(resp, "discovery engine").await?;
        tracing::debug!(record = %record.id, "upserted record");
        Ok(())
    }

    async fn remove_stale(&self, document_id: &str, from_index: usize) -> Result<usize, UploadError> {
        let token = self.upload_token().await?;
        let mut removed = 0;
        // Stale records are contiguous from `from_index`; stop at the first gap.
        for index in from_index.. {
            let id = crate::models::record_id(document_id, index);
            let resp = self
                .client
                .delete(self.document_url(&id))
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| UploadError::transient(format!("delete request: {}", e)))?;
            if resp.status() == StatusCode::NOT_FOUND {
                break;
            }
            check_upload(resp, "discovery engine").await?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(document = %document_id, removed, "removed stale records");
        }
        Ok(removed)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| SearchError::InvalidConfiguration(format!("auth: {:#}", e)))?;

        let mut body = json!({
            "query": query.text,
            "pageSize": self.page_size,
            "contentSearchSpec": {
                "snippetSpec": { "returnSnippet": true },
                "extractiveContentSpec": {
                    "maxExtractiveAnswerCount": self.max_answers,
                    "maxExtractiveSegmentCount": self.max_segments,
                },
            },
        });
        if let Some(filter) = &query.filter {
            body["filter"] = json!(filter);
        }

        let resp = self
            .client
            .post(format!(
                "{}/v1/{}:search",
                self.discovery_base, self.serving_config
            ))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let what = if e.is_timeout() { "timed out" } else { "request failed" };
                SearchError::ServiceUnavailable(format!("search {}: {}", what, e))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = format!("search API error {}: {}", status, text);
            return Err(if is_transient(status) {
                SearchError::ServiceUnavailable(message)
            } else {
                SearchError::InvalidConfiguration(message)
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| SearchError::ServiceUnavailable(format!("invalid search response: {}", e)))?;
        Ok(parse_search_response(&json))
    }
}

/// Parse a Discovery Engine `:search` response.
///
/// A response with no matches omits `results` entirely.
pub fn parse_search_response(json: &Value) -> Vec<SearchResult> {
    let Some(results) = json.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };

    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let doc = result.get("document").unwrap_or(&Value::Null);
            let derived = doc.get("derivedStructData").unwrap_or(&Value::Null);
            let id = doc
                .get("id")
                .or_else(|| result.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let link = derived
                .get("link")
                .and_then(Value::as_str)
                .or_else(|| {
                    doc.get("structData")
                        .and_then(|s| s.get("gcs_uri"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string);

            SearchResult {
                document: id,
                title: derived
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                link,
                rank: i + 1,
                segments: string_list(derived, "extractive_segments", "content"),
                answers: string_list(derived, "extractive_answers", "content"),
                snippets: string_list(derived, "snippets", "snippet"),
            }
        })
        .collect()
}

fn string_list(obj: &Value, list: &str, field: &str) -> Vec<String> {
    obj.get(list)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(field).and_then(Value::as_str))
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
