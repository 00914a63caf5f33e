//! Sync pipeline: reconcile the feed, enrich new offers, notify, on a schedule.

pub mod config;
pub mod enrich;
pub mod notify;
pub mod pipeline;
pub mod reconcile;
pub mod scheduler;

pub use config::SyncConfig;
pub use enrich::{EnrichmentExtractor, EnrichmentSummary};
pub use notify::{render_offer, DiscordNotifier, Dispatcher, Notifier, NotifyError, WebhookMessage};
pub use pipeline::{CycleLimits, CycleOutcome, CycleReport, Phase, Pipeline};
pub use reconcile::{CleanupSummary, ReconcileSummary, Reconciler};
pub use scheduler::{CleanupReport, Scheduler, SchedulerState, StatusHandle, StatusSnapshot};

pub const CRATE_NAME: &str = "mjf-sync";
