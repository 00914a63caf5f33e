use std::sync::Arc;

use async_trait::async_trait;
use mjf_core::{json_at, OfferId};
use mjf_storage::{FetchError, HttpFetcher};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{DetailSource, IdentifierResolver, RefreshError};

const SOURCE_ID: &str = "detail";

#[derive(Debug, Error)]
pub enum DetailError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("offer {offer_id}: detail payload has no pageProps.offer object")]
    MissingOffer { offer_id: OfferId },
    #[error("offer {offer_id}: detail payload is marked notFound")]
    NotFound { offer_id: OfferId },
    #[error("offer {offer_id}: build id refresh failed: {source}")]
    Refresh {
        offer_id: OfferId,
        #[source]
        source: RefreshError,
    },
}

/// Fill the detail URL template.
///
/// `{token}` is the build id (`{build_id}` and `${BUILD_ID_HASH}` are accepted too),
/// `{offer_id}` the numeric id and `{slug}` (or `{offer_slug}`) the offer slug.
pub fn detail_url(pattern: &str, token: &str, offer_id: OfferId, slug: &str) -> String {
    let id = offer_id.to_string();
    pattern
        .replace("${BUILD_ID_HASH}", token)
        .replace("{build_id}", token)
        .replace("{token}", token)
        .replace("{offer_id}", &id)
        .replace("{offer_slug}", slug)
        .replace("{slug}", slug)
}

pub struct DetailFetcher {
    http: Arc<HttpFetcher>,
    resolver: Arc<dyn IdentifierResolver>,
    pattern: String,
}

impl DetailFetcher {
    pub fn new(
        http: Arc<HttpFetcher>,
        resolver: Arc<dyn IdentifierResolver>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            http,
            resolver,
            pattern: pattern.into(),
        }
    }

    async fn refresh(&self, offer_id: OfferId) -> Result<String, DetailError> {
        self.resolver
            .refresh()
            .await
            .map_err(|source| DetailError::Refresh { offer_id, source })
    }

    async fn attempt(&self, token: &str, offer_id: OfferId, slug: &str) -> Result<JsonValue, DetailError> {
        let url = detail_url(&self.pattern, token, offer_id, slug);
        debug!(offer_id, url = %url, "fetching offer detail");
        let body = self.http.fetch_json(SOURCE_ID, &url).await?;
        offer_envelope(body, offer_id)
    }
}

/// Strip the `pageProps.offer` envelope, rejecting payloads that are not an offer.
fn offer_envelope(mut body: JsonValue, offer_id: OfferId) -> Result<JsonValue, DetailError> {
    let not_found = json_at(&body, &["pageProps", "notFound"])
        .or_else(|| body.get("notFound"))
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    if not_found {
        return Err(DetailError::NotFound { offer_id });
    }
    match body.pointer_mut("/pageProps/offer").map(JsonValue::take) {
        Some(offer @ JsonValue::Object(_)) => Ok(offer),
        _ => Err(DetailError::MissingOffer { offer_id }),
    }
}

#[async_trait]
impl DetailSource for DetailFetcher {
    /// One refresh per call at most: up front when no token is cached, otherwise
    /// after the first failure, followed by a single retry.
    async fn fetch_detail(&self, offer_id: OfferId, slug: &str) -> Result<JsonValue, DetailError> {
        let mut token = self.resolver.current().await;
        let refreshed_up_front = token.is_empty();
        if refreshed_up_front {
            token = self.refresh(offer_id).await?;
        }

        match self.attempt(&token, offer_id, slug).await {
            Ok(offer) => Ok(offer),
            Err(err) if refreshed_up_front => Err(err),
            Err(err) => {
                warn!(offer_id, error = %err, "detail fetch failed, refreshing build id");
                let token = self.refresh(offer_id).await?;
                self.attempt(&token, offer_id, slug).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::{
        extract::{Path, State},
        http::StatusCode,
        response::{Html, IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use mjf_storage::{BackoffPolicy, HttpClientConfig, OfferStore};
    use serde_json::json;
    use tokio::net::TcpListener;

    use crate::BuildIdResolver;

    #[derive(Clone, Default)]
    struct Site {
        detail_hits: Arc<AtomicUsize>,
        page_hits: Arc<AtomicUsize>,
    }

    async fn detail_handler(
        State(site): State<Site>,
        Path((token, offer_id, file)): Path<(String, i64, String)>,
    ) -> Response {
        site.detail_hits.fetch_add(1, Ordering::SeqCst);
        if token != "live" {
            return StatusCode::NOT_FOUND.into_response();
        }
        if offer_id == 404 {
            return Json(json!({"pageProps": {"notFound": true}})).into_response();
        }
        let slug = file.trim_end_matches(".json");
        Json(json!({"pageProps": {"offer": {"id": offer_id, "slug": slug}}})).into_response()
    }

    async fn page_handler(State(site): State<Site>) -> Html<&'static str> {
        site.page_hits.fetch_add(1, Ordering::SeqCst);
        Html(r#"<script id="__NEXT_DATA__" type="application/json">{"buildId":"live"}</script>"#)
    }

    async fn spawn(site: Site) -> String {
        let router = Router::new()
            .route("/_next/data/{token}/offers/{offer_id}/{file}", get(detail_handler))
            .route("/jobs", get(page_handler))
            .with_state(site);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn fetcher(base: &str, seed: Option<&str>) -> DetailFetcher {
        let http = Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(5),
                user_agent: None,
                backoff: BackoffPolicy {
                    max_retries: 2,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(2),
                },
            })
            .unwrap(),
        );
        let store = OfferStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let resolver = BuildIdResolver::load(
            http.clone(),
            format!("{base}/jobs"),
            store,
            seed.map(str::to_string),
        )
        .await
        .unwrap();
        DetailFetcher::new(
            http,
            Arc::new(resolver),
            format!("{base}/_next/data/{{token}}/offers/{{offer_id}}/{{slug}}.json"),
        )
    }

    #[test]
    fn url_template_accepts_legacy_placeholders() {
        let url = detail_url(
            "https://x/_next/data/${BUILD_ID_HASH}/es/job-offers/{offer_id}/{offer_slug}.json",
            "abc",
            7,
            "rust-dev",
        );
        assert_eq!(url, "https://x/_next/data/abc/es/job-offers/7/rust-dev.json");
        assert_eq!(detail_url("/{token}/{offer_id}/{slug}", "t", 1, "s"), "/t/1/s");
    }

    #[tokio::test]
    async fn stale_token_heals_with_one_refresh() {
        let site = Site::default();
        let base = spawn(site.clone()).await;
        let fetcher = fetcher(&base, Some("stale")).await;

        let offer = fetcher.fetch_detail(1, "backend").await.unwrap();
        assert_eq!(offer["slug"], "backend");
        assert_eq!(site.page_hits.load(Ordering::SeqCst), 1);
        assert_eq!(site.detail_hits.load(Ordering::SeqCst), 2);

        fetcher.fetch_detail(2, "frontend").await.unwrap();
        assert_eq!(site.page_hits.load(Ordering::SeqCst), 1);
        assert_eq!(site.detail_hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_token_is_resolved_before_first_request() {
        let site = Site::default();
        let base = spawn(site.clone()).await;
        let fetcher = fetcher(&base, None).await;

        fetcher.fetch_detail(3, "data").await.unwrap();
        assert_eq!(site.page_hits.load(Ordering::SeqCst), 1);
        assert_eq!(site.detail_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_failure_is_terminal() {
        let site = Site::default();
        let base = spawn(site.clone()).await;
        let fetcher = fetcher(&base, Some("live")).await;

        let err = fetcher.fetch_detail(404, "gone").await.unwrap_err();
        assert!(matches!(err, DetailError::NotFound { offer_id: 404 }));
        assert_eq!(site.page_hits.load(Ordering::SeqCst), 1);
        assert_eq!(site.detail_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn envelope_without_offer_is_rejected() {
        let err = offer_envelope(json!({"pageProps": {"offer": null}}), 9).unwrap_err();
        assert!(matches!(err, DetailError::MissingOffer { offer_id: 9 }));
        let ok = offer_envelope(json!({"pageProps": {"offer": {"id": 9}}}), 9).unwrap();
        assert_eq!(ok, json!({"id": 9}));
    }
}
