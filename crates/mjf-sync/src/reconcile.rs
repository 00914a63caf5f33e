use std::collections::BTreeSet;

use chrono::Utc;
use mjf_core::{OfferId, OfferListing};
use mjf_storage::{OfferStore, StoreError, UpsertOutcome};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::notify::Notifier;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub new_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub new_offer_ids: Vec<OfferId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub active_ids: usize,
    pub stale: usize,
    pub retracted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    store: OfferStore,
}

impl Reconciler {
    pub fn new(store: OfferStore) -> Self {
        Self { store }
    }

    /// Upsert every parseable record in one transaction.
    ///
    /// Records that fail to parse or write are logged and counted as skipped.
    pub async fn reconcile(&self, raw_offers: &[JsonValue]) -> Result<ReconcileSummary, StoreError> {
        let mut summary = ReconcileSummary::default();
        let mut batch = self.store.begin_upsert_batch(Utc::now()).await?;

        for raw in raw_offers {
            let listing = match OfferListing::from_json(raw) {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(error = %err, "skipping listing record");
                    summary.skipped_count += 1;
                    continue;
                }
            };

            match batch.upsert(&listing).await {
                Ok(UpsertOutcome::Inserted) => {
                    summary.new_count += 1;
                    summary.new_offer_ids.push(listing.offer_id);
                }
                Ok(UpsertOutcome::Updated) => summary.updated_count += 1,
                Err(err) => {
                    warn!(offer_id = listing.offer_id, error = %err, "failed to store offer");
                    summary.skipped_count += 1;
                }
            }
        }

        batch.commit().await?;
        info!(
            new = summary.new_count,
            updated = summary.updated_count,
            skipped = summary.skipped_count,
            "reconciled listing"
        );
        Ok(summary)
    }

    /// Retract channel messages for offers that dropped out of the feed.
    ///
    /// Only `notification_ref` is cleared; `notified` stays set and rows are kept.
    pub async fn clear_stale_notifications(
        &self,
        active_ids: &BTreeSet<OfferId>,
        notifier: &dyn Notifier,
    ) -> Result<CleanupSummary, StoreError> {
        let mut summary = CleanupSummary {
            active_ids: active_ids.len(),
            ..Default::default()
        };
        if active_ids.is_empty() {
            warn!("active offer set is empty, leaving notifications alone");
            return Ok(summary);
        }

        for (offer_id, notification_ref) in self.store.notification_refs().await? {
            if active_ids.contains(&offer_id) {
                continue;
            }
            summary.stale += 1;
            match notifier.retract(&notification_ref).await {
                Ok(()) => {
                    self.store.clear_notification_ref(offer_id).await?;
                    summary.retracted += 1;
                    debug!(offer_id, "retracted notification");
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(offer_id, error = %err, "could not retract notification");
                }
            }
        }

        info!(
            stale = summary.stale,
            retracted = summary.retracted,
            failed = summary.failed,
            "notification cleanup finished"
        );
        Ok(summary)
    }
}
