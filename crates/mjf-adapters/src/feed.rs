use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use mjf_core::{json_i64, OfferId};
use mjf_storage::{FetchError, HttpFetcher};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use crate::ListingSource;

const SOURCE_ID: &str = "feed";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("feed at {url} returned {found} instead of an array")]
    NotAnArray { url: String, found: &'static str },
}

impl FeedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Fetch(err) if err.is_transient())
    }
}

/// Ids of every record carrying an integer `id`.
pub fn active_ids(records: &[JsonValue]) -> BTreeSet<OfferId> {
    records.iter().filter_map(|r| json_i64(r, &["id"])).collect()
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[derive(Debug, Clone)]
pub struct FeedClient {
    http: Arc<HttpFetcher>,
    endpoint: String,
}

impl FeedClient {
    pub fn new(http: Arc<HttpFetcher>, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ListingSource for FeedClient {
    async fn fetch_listing(&self) -> Result<Vec<JsonValue>, FeedError> {
        let body = self.http.fetch_json(SOURCE_ID, &self.endpoint).await?;
        match body {
            JsonValue::Array(records) => {
                info!(url = %self.endpoint, records = records.len(), "fetched offer listing");
                Ok(records)
            }
            other => Err(FeedError::NotAnArray {
                url: self.endpoint.clone(),
                found: json_kind(&other),
            }),
        }
    }
}
