use std::collections::BTreeMap;
use std::sync::Arc;

use mjf_adapters::{decode_enrichment, DetailSource};
use mjf_storage::{OfferStore, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub attempted: usize,
    pub processed: usize,
    pub failed: usize,
    pub without_section: usize,
    /// Matched decoder path -> offers decoded through it.
    pub matched_paths: BTreeMap<String, usize>,
}

pub struct EnrichmentExtractor {
    store: OfferStore,
    details: Arc<dyn DetailSource>,
}

impl EnrichmentExtractor {
    pub fn new(store: OfferStore, details: Arc<dyn DetailSource>) -> Self {
        Self { store, details }
    }

    /// Enrich up to `limit` pending offers. Offers whose detail fetch or write
    /// fails stay pending for a later cycle.
    pub async fn process_pending(&self, limit: usize) -> Result<EnrichmentSummary, StoreError> {
        let pending = self.store.pending_enrichment(limit).await?;
        let mut summary = EnrichmentSummary {
            attempted: pending.len(),
            ..Default::default()
        };

        for offer in pending {
            let envelope = match self.details.fetch_detail(offer.offer_id, &offer.slug).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(offer_id = offer.offer_id, error = %err, "detail fetch failed");
                    summary.failed += 1;
                    continue;
                }
            };

            let decoded = decode_enrichment(&envelope);
            match decoded.path {
                Some(path) => {
                    debug!(offer_id = offer.offer_id, path = %path, "skills section found");
                    *summary.matched_paths.entry(path.as_str().to_string()).or_default() += 1;
                }
                None => {
                    info!(offer_id = offer.offer_id, "no skills section in detail payload");
                    summary.without_section += 1;
                }
            }

            match self
                .store
                .complete_enrichment(offer.offer_id, decoded.enrichment.as_ref())
                .await
            {
                Ok(true) => summary.processed += 1,
                Ok(false) => warn!(offer_id = offer.offer_id, "offer vanished before enrichment"),
                Err(err) => {
                    warn!(offer_id = offer.offer_id, error = %err, "failed to store enrichment");
                    summary.failed += 1;
                }
            }
        }

        info!(
            attempted = summary.attempted,
            processed = summary.processed,
            failed = summary.failed,
            "enrichment pass finished"
        );
        Ok(summary)
    }
}
