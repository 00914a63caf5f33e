use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mjf_adapters::{BuildIdResolver, DetailFetcher, DetailSource, FeedClient, ListingSource};
use mjf_storage::{HttpFetcher, OfferStore};
use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::enrich::{EnrichmentExtractor, EnrichmentSummary};
use crate::notify::{DiscordNotifier, Dispatcher, Notifier};
use crate::reconcile::{CleanupSummary, Reconciler, ReconcileSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetch,
    Reconcile,
    Enrich,
    Notify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    Failed { phase: Phase, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub reconcile: ReconcileSummary,
    pub enrichment: EnrichmentSummary,
    pub notified: usize,
    pub notifications_enabled: bool,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn begin(notifications_enabled: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            fetched: 0,
            reconcile: ReconcileSummary::default(),
            enrichment: EnrichmentSummary::default(),
            notified: 0,
            notifications_enabled,
            outcome: CycleOutcome::Completed,
        }
    }

    fn fail(mut self, phase: Phase, err: impl std::fmt::Display) -> Self {
        error!(run_id = %self.run_id, ?phase, error = %err, "cycle phase failed");
        self.outcome = CycleOutcome::Failed {
            phase,
            message: err.to_string(),
        };
        self.finished_at = Utc::now();
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Completed
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CycleLimits {
    pub max_items_per_cycle: usize,
    pub notify_batch_size: usize,
    pub notify_delay: Duration,
}

impl CycleLimits {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_items_per_cycle: config.max_items_per_cycle,
            notify_batch_size: config.notify_batch_size,
            notify_delay: config.notify_delay(),
        }
    }
}

/// Feed -> reconcile -> enrich -> notify, plus the notification cleanup path.
pub struct Pipeline {
    store: OfferStore,
    listing: Arc<dyn ListingSource>,
    reconciler: Reconciler,
    extractor: EnrichmentExtractor,
    notifier: Option<Arc<dyn Notifier>>,
    dispatcher: Option<Dispatcher>,
    limits: CycleLimits,
}

impl Pipeline {
    pub fn new(
        store: OfferStore,
        listing: Arc<dyn ListingSource>,
        details: Arc<dyn DetailSource>,
        notifier: Option<Arc<dyn Notifier>>,
        offer_url_pattern: &str,
        limits: CycleLimits,
    ) -> Self {
        let dispatcher = notifier
            .clone()
            .map(|n| Dispatcher::new(store.clone(), n, offer_url_pattern));
        Self {
            reconciler: Reconciler::new(store.clone()),
            extractor: EnrichmentExtractor::new(store.clone(), details),
            store,
            listing,
            notifier,
            dispatcher,
            limits,
        }
    }

    /// Connect and migrate the store, then wire the HTTP adapters from configuration.
    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let store = OfferStore::connect(&config.database_url)
            .await
            .with_context(|| format!("opening database {}", config.database_url))?;
        store.migrate().await.context("applying migrations")?;

        let http = Arc::new(
            HttpFetcher::new(config.http_client_config())?.with_audit(Arc::new(store.clone())),
        );
        let resolver = BuildIdResolver::load(
            http.clone(),
            config.build_id_page_url.clone(),
            store.clone(),
            config.build_id_seed.clone(),
        )
        .await
        .context("loading build id")?;

        let listing = Arc::new(FeedClient::new(http.clone(), config.feed_url.clone()));
        let details = Arc::new(DetailFetcher::new(
            http,
            Arc::new(resolver),
            config.detail_pattern.clone(),
        ));

        let notifier: Option<Arc<dyn Notifier>> = match config.active_webhook() {
            Some(url) => Some(Arc::new(
                DiscordNotifier::new(url, config.http_client_config().timeout)
                    .context("building webhook client")?,
            )),
            None => {
                info!("notifications disabled");
                None
            }
        };

        Ok(Self::new(
            store,
            listing,
            details,
            notifier,
            &config.offer_url_pattern,
            CycleLimits::from_config(config),
        ))
    }

    pub fn store(&self) -> &OfferStore {
        &self.store
    }

    /// Run one full cycle. Phase failures end the cycle and are reported, never raised.
    pub async fn run_cycle(&self) -> CycleReport {
        let report = CycleReport::begin(self.dispatcher.is_some());
        let span = info_span!("cycle", run_id = %report.run_id);
        self.cycle(report).instrument(span).await
    }

    async fn cycle(&self, mut report: CycleReport) -> CycleReport {
        info!("cycle started");

        let raw = match self.listing.fetch_listing().await {
            Ok(raw) => raw,
            Err(err) => return report.fail(Phase::Fetch, err),
        };
        report.fetched = raw.len();

        report.reconcile = match self.reconciler.reconcile(&raw).await {
            Ok(summary) => summary,
            Err(err) => return report.fail(Phase::Reconcile, err),
        };

        report.enrichment = match self.extractor.process_pending(self.limits.max_items_per_cycle).await {
            Ok(summary) => summary,
            Err(err) => return report.fail(Phase::Enrich, err),
        };

        if let Some(dispatcher) = &self.dispatcher {
            report.notified = match dispatcher
                .dispatch_pending(self.limits.notify_batch_size, self.limits.notify_delay)
                .await
            {
                Ok(sent) => sent,
                Err(err) => return report.fail(Phase::Notify, err),
            };
        } else {
            debug!("notification phase skipped");
        }

        report.finished_at = Utc::now();
        info!(
            fetched = report.fetched,
            new = report.reconcile.new_count,
            enriched = report.enrichment.processed,
            notified = report.notified,
            "cycle finished"
        );
        report
    }

    /// Retract messages for offers no longer in the feed.
    pub async fn run_cleanup(&self) -> Result<CleanupSummary> {
        let Some(notifier) = &self.notifier else {
            info!("notifications disabled, nothing to clean up");
            return Ok(CleanupSummary::default());
        };
        let active = self
            .listing
            .fetch_active_ids()
            .await
            .context("fetching active offer ids")?;
        let summary = self
            .reconciler
            .clear_stale_notifications(&active, notifier.as_ref())
            .await
            .context("clearing stale notifications")?;
        Ok(summary)
    }
}
