use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::pipeline::{CycleReport, Pipeline};
use crate::reconcile::CleanupSummary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
    Sleeping,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CleanupSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub state: SchedulerState,
    pub cycles_run: u64,
    pub ticks_skipped: u64,
    pub last_report: Option<CycleReport>,
    pub last_cleanup: Option<CleanupReport>,
}

/// Shared, read-mostly view of the scheduler for the status surface.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusHandle {
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    async fn set_state(&self, state: SchedulerState) {
        self.inner.write().await.state = state;
    }

    async fn record_cycle(&self, report: CycleReport) {
        let mut status = self.inner.write().await;
        status.cycles_run += 1;
        status.last_report = Some(report);
        status.state = SchedulerState::Sleeping;
    }

    async fn record_skip(&self) {
        self.inner.write().await.ticks_skipped += 1;
    }

    async fn record_cleanup(&self, report: CleanupReport) {
        self.inner.write().await.last_cleanup = Some(report);
    }
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    status: StatusHandle,
    cycle_lock: Mutex<()>,
    interval: Duration,
    cleanup_cron: String,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration, cleanup_cron: impl Into<String>) -> Self {
        Self {
            pipeline,
            status: StatusHandle::default(),
            cycle_lock: Mutex::new(()),
            interval,
            cleanup_cron: cleanup_cron.into(),
        }
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Run one cycle unless one is already in flight; an overlapping tick is dropped.
    pub async fn tick(&self) -> Option<CycleReport> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!("previous cycle still running, skipping tick");
            self.status.record_skip().await;
            return None;
        };

        self.status.set_state(SchedulerState::Running).await;
        let report = self.pipeline.run_cycle().await;
        self.status.record_cycle(report.clone()).await;
        Some(report)
    }

    /// Daily cleanup. Waits for a running cycle instead of skipping.
    pub async fn cleanup(&self) -> CleanupReport {
        let _guard = self.cycle_lock.lock().await;
        let report = match self.pipeline.run_cleanup().await {
            Ok(summary) => CleanupReport {
                finished_at: Utc::now(),
                summary: Some(summary),
                error: None,
            },
            Err(err) => {
                let message = format!("{err:#}");
                error!(error = %message, "notification cleanup failed");
                CleanupReport {
                    finished_at: Utc::now(),
                    summary: None,
                    error: Some(message),
                }
            }
        };
        self.status.record_cleanup(report.clone()).await;
        report
    }

    /// Run the startup cycle, then hand the interval and cleanup jobs to a cron scheduler.
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler> {
        self.tick().await;

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let cycle_self = self.clone();
        let cycle_job = Job::new_repeated_async(self.interval, move |_uuid, _l| {
            let scheduler = cycle_self.clone();
            Box::pin(async move {
                scheduler.tick().await;
            })
        })
        .context("creating interval job")?;
        sched.add(cycle_job).await.context("adding interval job")?;

        let cleanup_self = self.clone();
        let cleanup_job = Job::new_async(self.cleanup_cron.as_str(), move |_uuid, _l| {
            let scheduler = cleanup_self.clone();
            Box::pin(async move {
                scheduler.cleanup().await;
            })
        })
        .with_context(|| format!("creating cleanup job for cron {}", self.cleanup_cron))?;
        sched.add(cleanup_job).await.context("adding cleanup job")?;

        sched.start().await.context("starting scheduler")?;
        info!(
            interval_secs = self.interval.as_secs(),
            cleanup_cron = %self.cleanup_cron,
            "scheduler started"
        );
        Ok(sched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::harness;
    use serde_json::json;

    fn scheduler(pipeline: Pipeline) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            Arc::new(pipeline),
            Duration::from_secs(3600),
            "0 0 4 * * *",
        ))
    }

    #[tokio::test]
    async fn tick_records_report_and_sleeps() {
        let h = harness().await;
        h.feed.set(vec![json!({"id": 1})]);
        let scheduler = scheduler(h.pipeline);
        let status = scheduler.status();
        assert_eq!(status.snapshot().await.state, SchedulerState::Idle);

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.reconcile.new_count, 1);

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.state, SchedulerState::Sleeping);
        assert_eq!(snapshot.cycles_run, 1);
        assert_eq!(snapshot.last_report.unwrap().run_id, report.run_id);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let h = harness().await;
        h.feed.set(vec![]);
        let scheduler = scheduler(h.pipeline);

        let guard = scheduler.cycle_lock.lock().await;
        assert!(scheduler.tick().await.is_none());
        drop(guard);

        let snapshot = scheduler.status().snapshot().await;
        assert_eq!(snapshot.ticks_skipped, 1);
        assert_eq!(snapshot.cycles_run, 0);
        assert!(scheduler.tick().await.is_some());
    }

    #[tokio::test]
    async fn failed_cycle_still_returns_to_sleeping() {
        let h = harness().await;
        h.feed.fail();
        let scheduler = scheduler(h.pipeline);

        let report = scheduler.tick().await.unwrap();
        assert!(!report.is_success());
        assert_eq!(scheduler.status().snapshot().await.state, SchedulerState::Sleeping);
    }

    #[tokio::test]
    async fn cleanup_report_is_kept() {
        let h = harness().await;
        h.feed.set(vec![json!({"id": 1})]);
        let scheduler = scheduler(h.pipeline);

        let report = scheduler.cleanup().await;
        assert!(report.error.is_none());
        assert!(scheduler.status().snapshot().await.last_cleanup.is_some());
    }
}
