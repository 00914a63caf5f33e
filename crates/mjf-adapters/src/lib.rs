//! Outbound adapters: the listing feed, the build-id resolver and the per-offer detail endpoint.

use std::collections::BTreeSet;

use async_trait::async_trait;
use mjf_core::OfferId;
use serde_json::Value as JsonValue;

pub mod decode;
pub mod detail;
pub mod feed;
pub mod resolver;

pub use decode::{decode_enrichment, DecodedDetail, SkillsPath};
pub use detail::{detail_url, DetailError, DetailFetcher};
pub use feed::{active_ids, FeedClient, FeedError};
pub use resolver::{extract_build_id, BuildIdResolver, IdentifierResolver, RefreshError, BUILD_ID_STATE_KEY};

pub const CRATE_NAME: &str = "mjf-adapters";

/// Source of raw listing records.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listing(&self) -> Result<Vec<JsonValue>, FeedError>;

    async fn fetch_active_ids(&self) -> Result<BTreeSet<OfferId>, FeedError> {
        Ok(active_ids(&self.fetch_listing().await?))
    }
}

/// Source of per-offer detail envelopes (the `pageProps.offer` object).
#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_detail(&self, offer_id: OfferId, slug: &str) -> Result<JsonValue, DetailError>;
}
