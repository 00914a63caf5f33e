//! The detail endpoint embeds the site's build id in its path. The id changes on every
//! deploy, so it is cached, persisted and re-scraped from a known page once it goes stale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use mjf_storage::{FetchError, HttpFetcher, OfferStore, StoreError};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const BUILD_ID_STATE_KEY: &str = "build_id_hash";

const SOURCE_ID: &str = "build-id-page";

static BUILD_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""buildId"\s*:\s*"([^"]+)""#).ok());

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no build id found in page {url}")]
    PatternNotFound { url: String },
    #[error("could not persist build id: {0}")]
    Persist(#[from] StoreError),
}

#[async_trait]
pub trait IdentifierResolver: Send + Sync {
    /// Cached token, possibly empty.
    async fn current(&self) -> String;

    /// Re-scrape the token. Concurrent callers share a single scrape.
    async fn refresh(&self) -> Result<String, RefreshError>;

    async fn persist(&self, token: &str) -> Result<(), RefreshError>;
}

/// Pulls `buildId` out of a Next.js page: the `__NEXT_DATA__` script first, then the raw text.
pub fn extract_build_id(html: &str) -> Option<String> {
    from_next_data(html).or_else(|| {
        BUILD_ID_RE
            .as_ref()?
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn from_next_data(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
    let script = document.select(&selector).next()?;
    let text: String = script.text().collect();
    let data: JsonValue = serde_json::from_str(text.trim()).ok()?;
    data.get("buildId")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

pub struct BuildIdResolver {
    http: Arc<HttpFetcher>,
    page_url: String,
    store: OfferStore,
    token: RwLock<String>,
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl BuildIdResolver {
    /// Cached token starts as the persisted value, else `seed`, else empty.
    pub async fn load(
        http: Arc<HttpFetcher>,
        page_url: impl Into<String>,
        store: OfferStore,
        seed: Option<String>,
    ) -> Result<Self, StoreError> {
        let persisted = store.get_state(BUILD_ID_STATE_KEY).await?;
        let token = persisted
            .or(seed)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        debug!(token = %token, "build id loaded");
        Ok(Self {
            http,
            page_url: page_url.into(),
            store,
            token: RwLock::new(token),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        })
    }

    async fn scrape(&self) -> Result<String, RefreshError> {
        let html = self.http.fetch_text(SOURCE_ID, &self.page_url).await?;
        extract_build_id(&html).ok_or_else(|| RefreshError::PatternNotFound {
            url: self.page_url.clone(),
        })
    }
}

#[async_trait]
impl IdentifierResolver for BuildIdResolver {
    async fn current(&self) -> String {
        self.token.read().await.clone()
    }

    async fn refresh(&self) -> Result<String, RefreshError> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            // another caller refreshed while we waited
            return Ok(self.current().await);
        }

        let fresh = match self.scrape().await {
            Ok(token) => token,
            Err(err) => {
                warn!(url = %self.page_url, error = %err, "build id refresh failed");
                return Err(err);
            }
        };

        let previous = self.current().await;
        if fresh == previous {
            debug!(token = %fresh, "build id unchanged");
        } else {
            self.persist(&fresh).await?;
            *self.token.write().await = fresh.clone();
            info!(old = %previous, new = %fresh, "build id refreshed");
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(fresh)
    }

    async fn persist(&self, token: &str) -> Result<(), RefreshError> {
        self.store.put_state(BUILD_ID_STATE_KEY, token).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use axum::{extract::State, response::Html as HtmlBody, routing::get, Router};
    use mjf_storage::{BackoffPolicy, HttpClientConfig};
    use tokio::net::TcpListener;

    const PAGE: &str = r#"<html><head></head><body>
        <script id="__NEXT_DATA__" type="application/json">{"props":{},"buildId":"fresh-build","isFallback":false}</script>
        </body></html>"#;

    async fn spawn_page(hits: Arc<AtomicUsize>, body: &'static str) -> String {
        let router = Router::new()
            .route(
                "/jobs",
                get(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    HtmlBody(body)
                }),
            )
            .with_state(hits);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/jobs")
    }

    fn http() -> Arc<HttpFetcher> {
        Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(5),
                user_agent: None,
                backoff: BackoffPolicy {
                    max_retries: 0,
                    ..Default::default()
                },
            })
            .unwrap(),
        )
    }

    async fn store() -> OfferStore {
        let store = OfferStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[test]
    fn build_id_comes_from_next_data_script() {
        assert_eq!(extract_build_id(PAGE).as_deref(), Some("fresh-build"));
    }

    #[test]
    fn build_id_falls_back_to_raw_text() {
        let page = r#"<script>self.__next_f.push({"buildId" : "raw-123"})</script>"#;
        assert_eq!(extract_build_id(page).as_deref(), Some("raw-123"));
        assert_eq!(extract_build_id("<html>nothing here</html>"), None);
    }

    #[tokio::test]
    async fn persisted_token_wins_over_seed() {
        let store = store().await;
        store.put_state(BUILD_ID_STATE_KEY, "persisted").await.unwrap();
        let resolver = BuildIdResolver::load(http(), "http://unused", store, Some("seed".into()))
            .await
            .unwrap();
        assert_eq!(resolver.current().await, "persisted");
    }

    #[tokio::test]
    async fn refresh_persists_new_token() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_page(hits.clone(), PAGE).await;
        let store = store().await;
        let resolver = BuildIdResolver::load(http(), url, store.clone(), Some("stale".into()))
            .await
            .unwrap();

        assert_eq!(resolver.refresh().await.unwrap(), "fresh-build");
        assert_eq!(resolver.current().await, "fresh-build");
        assert_eq!(
            store.get_state(BUILD_ID_STATE_KEY).await.unwrap().as_deref(),
            Some("fresh-build")
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_scrape() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_page(hits.clone(), PAGE).await;
        let resolver = Arc::new(
            BuildIdResolver::load(http(), url, store().await, None)
                .await
                .unwrap(),
        );

        let (a, b) = tokio::join!(resolver.refresh(), resolver.refresh());
        assert_eq!(a.unwrap(), "fresh-build");
        assert_eq!(b.unwrap(), "fresh-build");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_pattern_keeps_cached_token() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_page(hits, "<html><body>maintenance</body></html>").await;
        let resolver = BuildIdResolver::load(http(), url, store().await, Some("seed".into()))
            .await
            .unwrap();

        let err = resolver.refresh().await.unwrap_err();
        assert!(matches!(err, RefreshError::PatternNotFound { .. }));
        assert_eq!(resolver.current().await, "seed");
    }
}
