//! SQLite persistence for offers, enrichment rows, the fetch audit log and app state.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mjf_core::{
    FetchAttempt, LanguageRequirement, Offer, OfferEnrichment, OfferId, OfferListing, PendingOffer,
    Skill, SkillCategory,
};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Acquire, FromRow, Sqlite, Transaction};
use thiserror::Error;
use tracing::{debug, error};

use crate::FetchAudit;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt row for offer {offer_id}: {reason}")]
    CorruptRow { offer_id: OfferId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub offers: i64,
    pub pending_enrichment: i64,
    pub pending_notification: i64,
    pub fetch_attempts: i64,
}

#[derive(Debug, FromRow)]
struct OfferRow {
    offer_id: i64,
    position: String,
    company_name: String,
    company_logo_url: Option<String>,
    salary_from: Option<i64>,
    salary_to: Option<i64>,
    remote_percentage: Option<i64>,
    locations: String,
    slug: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    notified: bool,
    enriched: bool,
    notification_ref: Option<String>,
}

impl TryFrom<OfferRow> for Offer {
    type Error = StoreError;

    fn try_from(row: OfferRow) -> Result<Self, Self::Error> {
        let locations: Vec<String> =
            serde_json::from_str(&row.locations).map_err(|e| StoreError::CorruptRow {
                offer_id: row.offer_id,
                reason: format!("locations column: {e}"),
            })?;
        Ok(Offer {
            listing: OfferListing {
                offer_id: row.offer_id,
                position: row.position,
                company_name: row.company_name,
                company_logo_url: row.company_logo_url,
                salary_from: row.salary_from,
                salary_to: row.salary_to,
                remote_percentage: row.remote_percentage,
                locations,
                slug: row.slug,
            },
            first_seen: row.first_seen,
            last_seen: row.last_seen,
            notified: row.notified,
            enriched: row.enriched,
            notification_ref: row.notification_ref,
        })
    }
}

#[derive(Debug, FromRow)]
struct SkillRow {
    offer_id: i64,
    category: String,
    name: String,
    icon: Option<String>,
    level: Option<i64>,
    description: Option<String>,
}

const OFFER_COLUMNS: &str = "offer_id, position, company_name, company_logo_url, salary_from, \
     salary_to, remote_percentage, locations, slug, first_seen, last_seen, notified, enriched, \
     notification_ref";

async fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| StoreError::CreateDir {
            path: parent.display().to_string(),
            source,
        })
}

#[derive(Debug, Clone)]
pub struct OfferStore {
    pool: SqlitePool,
}

impl OfferStore {
    /// Open (creating if needed) the database at `database_url`, e.g. `sqlite://data/history.db`.
    ///
    /// Missing parent directories of a file-backed database are created first.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?;
        if !database_url.contains(":memory:") && !database_url.contains("mode=memory") {
            ensure_parent_dir(options.get_filename()).await?;
        }
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(15));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        ensure_parent_dir(path.as_ref()).await?;
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(15));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database. The connection is never recycled,
    /// otherwise the data would vanish with it.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Apply the ordered, versioned migrations under `migrations/`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Start a reconcile batch. Nothing is visible to other readers until [`UpsertBatch::commit`].
    pub async fn begin_upsert_batch(&self, seen_at: DateTime<Utc>) -> Result<UpsertBatch, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(UpsertBatch { tx, seen_at })
    }

    pub async fn get_offer(&self, offer_id: OfferId) -> Result<Option<Offer>, StoreError> {
        let row: Option<OfferRow> =
            sqlx::query_as(&format!("SELECT {OFFER_COLUMNS} FROM offers WHERE offer_id = ?"))
                .bind(offer_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Offer::try_from).transpose()
    }

    pub async fn offer_ids(&self) -> Result<Vec<OfferId>, StoreError> {
        Ok(sqlx::query_scalar("SELECT offer_id FROM offers ORDER BY offer_id")
            .fetch_all(&self.pool)
            .await?)
    }

    /// Offers still waiting for a completed enrichment attempt, oldest sighting first.
    pub async fn pending_enrichment(&self, limit: usize) -> Result<Vec<PendingOffer>, StoreError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT offer_id, slug FROM offers WHERE enriched = 0 \
             ORDER BY first_seen ASC, offer_id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(offer_id, slug)| PendingOffer { offer_id, slug })
            .collect())
    }

    /// Replace skills + languages (when `enrichment` is given) and set `enriched`, atomically.
    ///
    /// Returns `false` when the offer does not exist.
    pub async fn complete_enrichment(
        &self,
        offer_id: OfferId,
        enrichment: Option<&OfferEnrichment>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE offers SET enriched = 1 WHERE offer_id = ?")
            .bind(offer_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(enrichment) = enrichment {
            sqlx::query("DELETE FROM offer_skills WHERE offer_id = ?")
                .bind(offer_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM offer_languages WHERE offer_id = ?")
                .bind(offer_id)
                .execute(&mut *tx)
                .await?;

            for skill in &enrichment.skills {
                sqlx::query(
                    "INSERT INTO offer_skills (offer_id, category, name, icon, level, description) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(offer_id)
                .bind(skill.category.as_str())
                .bind(&skill.name)
                .bind(&skill.icon)
                .bind(skill.level)
                .bind(&skill.description)
                .execute(&mut *tx)
                .await?;
            }

            for language in &enrichment.languages {
                sqlx::query(
                    "INSERT INTO offer_languages (offer_id, language_name, language_level) VALUES (?, ?, ?)",
                )
                .bind(offer_id)
                .bind(&language.name)
                .bind(&language.level)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn enrichment_for(&self, offer_id: OfferId) -> Result<OfferEnrichment, StoreError> {
        let skill_rows: Vec<SkillRow> = sqlx::query_as(
            "SELECT offer_id, category, name, icon, level, description FROM offer_skills \
             WHERE offer_id = ? \
             ORDER BY CASE category WHEN 'must' THEN 0 WHEN 'nice' THEN 1 ELSE 2 END, id",
        )
        .bind(offer_id)
        .fetch_all(&self.pool)
        .await?;

        let mut skills = Vec::with_capacity(skill_rows.len());
        for row in skill_rows {
            let category = SkillCategory::from_str(&row.category).map_err(|reason| {
                StoreError::CorruptRow {
                    offer_id: row.offer_id,
                    reason,
                }
            })?;
            skills.push(Skill {
                category,
                name: row.name,
                icon: row.icon,
                level: row.level,
                description: row.description,
            });
        }

        let languages = sqlx::query_as::<_, (String, String)>(
            "SELECT language_name, language_level FROM offer_languages WHERE offer_id = ? ORDER BY id",
        )
        .bind(offer_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(name, level)| LanguageRequirement { name, level })
        .collect();

        Ok(OfferEnrichment { skills, languages })
    }

    /// Offers eligible for notification: enriched and not yet notified.
    ///
    /// Never-attempted offers come first, most recently seen first. Offers whose
    /// send failed follow, least recently attempted first.
    pub async fn pending_notifications(&self, limit: usize) -> Result<Vec<Offer>, StoreError> {
        let rows: Vec<OfferRow> = sqlx::query_as(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE enriched = 1 AND notified = 0 \
             ORDER BY last_notify_attempt IS NOT NULL, last_notify_attempt ASC, \
                      last_seen DESC, offer_id ASC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Offer::try_from).collect()
    }

    /// Flip `notified` for one offer after a confirmed send.
    ///
    /// Returns `false` if the offer was already notified (or does not exist).
    pub async fn mark_notified(
        &self,
        offer_id: OfferId,
        notification_ref: Option<&str>,
    ) -> Result<bool, StoreError> {
        let affected = sqlx::query(
            "UPDATE offers SET notified = 1, notification_ref = ? WHERE offer_id = ? AND notified = 0",
        )
        .bind(notification_ref)
        .bind(offer_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    /// Stamp a failed send so the offer yields its queue slot to others.
    pub async fn record_notify_failure(&self, offer_id: OfferId) -> Result<(), StoreError> {
        sqlx::query("UPDATE offers SET last_notify_attempt = ? WHERE offer_id = ? AND notified = 0")
            .bind(Utc::now())
            .bind(offer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn notification_refs(&self) -> Result<Vec<(OfferId, String)>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT offer_id, notification_ref FROM offers \
             WHERE notification_ref IS NOT NULL ORDER BY offer_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn clear_notification_ref(&self, offer_id: OfferId) -> Result<(), StoreError> {
        sqlx::query("UPDATE offers SET notification_ref = NULL WHERE offer_id = ?")
            .bind(offer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_fetch_attempt(&self, attempt: &FetchAttempt) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO fetch_attempts (timestamp, endpoint, status_code, response_size, error) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(attempt.timestamp)
        .bind(&attempt.endpoint)
        .bind(attempt.status_code.map(i64::from))
        .bind(attempt.response_size.map(|s| s as i64))
        .bind(&attempt.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn put_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_state (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read-only snapshot used by the status surface.
    pub async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let (offers, pending_enrichment, pending_notification): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
                    COALESCE(SUM(CASE WHEN enriched = 0 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN enriched = 1 AND notified = 0 THEN 1 ELSE 0 END), 0) \
             FROM offers",
        )
        .fetch_one(&self.pool)
        .await?;
        let fetch_attempts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fetch_attempts")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreCounts {
            offers,
            pending_enrichment,
            pending_notification,
            fetch_attempts,
        })
    }
}

#[async_trait]
impl FetchAudit for OfferStore {
    async fn record(&self, attempt: FetchAttempt) {
        if let Err(err) = self.record_fetch_attempt(&attempt).await {
            error!(endpoint = %attempt.endpoint, error = %err, "failed to record fetch attempt");
        }
    }
}

/// One reconcile transaction. Each upsert runs in its own savepoint so a failing
/// record rolls back alone while the rest of the batch still commits.
pub struct UpsertBatch {
    tx: Transaction<'static, Sqlite>,
    seen_at: DateTime<Utc>,
}

impl UpsertBatch {
    pub async fn upsert(&mut self, listing: &OfferListing) -> Result<UpsertOutcome, StoreError> {
        let seen_at = self.seen_at;
        let mut savepoint = Acquire::begin(&mut self.tx).await?;

        let locations = serde_json::to_string(&listing.locations).map_err(|e| StoreError::CorruptRow {
            offer_id: listing.offer_id,
            reason: format!("locations encode: {e}"),
        })?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT offer_id FROM offers WHERE offer_id = ?")
            .bind(listing.offer_id)
            .fetch_optional(&mut *savepoint)
            .await?;

        let outcome = if exists.is_some() {
            sqlx::query(
                "UPDATE offers SET position = ?, company_name = ?, company_logo_url = ?, \
                 salary_from = ?, salary_to = ?, remote_percentage = ?, locations = ?, slug = ?, \
                 last_seen = ? WHERE offer_id = ?",
            )
            .bind(&listing.position)
            .bind(&listing.company_name)
            .bind(&listing.company_logo_url)
            .bind(listing.salary_from)
            .bind(listing.salary_to)
            .bind(listing.remote_percentage)
            .bind(&locations)
            .bind(&listing.slug)
            .bind(seen_at)
            .bind(listing.offer_id)
            .execute(&mut *savepoint)
            .await?;
            UpsertOutcome::Updated
        } else {
            sqlx::query(
                "INSERT INTO offers (offer_id, position, company_name, company_logo_url, salary_from, \
                 salary_to, remote_percentage, locations, slug, first_seen, last_seen, notified, enriched) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0)",
            )
            .bind(listing.offer_id)
            .bind(&listing.position)
            .bind(&listing.company_name)
            .bind(&listing.company_logo_url)
            .bind(listing.salary_from)
            .bind(listing.salary_to)
            .bind(listing.remote_percentage)
            .bind(&locations)
            .bind(&listing.slug)
            .bind(seen_at)
            .bind(seen_at)
            .execute(&mut *savepoint)
            .await?;
            UpsertOutcome::Inserted
        };

        savepoint.commit().await?;
        debug!(offer_id = listing.offer_id, ?outcome, "upserted offer");
        Ok(outcome)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> OfferStore {
        let store = OfferStore::in_memory().await.expect("in-memory store");
        store.migrate().await.expect("migrate");
        store
    }

    fn listing(offer_id: OfferId, salary_from: Option<i64>) -> OfferListing {
        OfferListing {
            offer_id,
            position: format!("Engineer {offer_id}"),
            company_name: "Acme".into(),
            company_logo_url: None,
            salary_from,
            salary_to: None,
            remote_percentage: Some(100),
            locations: vec!["Madrid".into()],
            slug: format!("engineer-{offer_id}"),
        }
    }

    async fn upsert_all(store: &OfferStore, listings: &[OfferListing]) -> Vec<UpsertOutcome> {
        let mut batch = store.begin_upsert_batch(Utc::now()).await.unwrap();
        let mut outcomes = Vec::new();
        for l in listings {
            outcomes.push(batch.upsert(l).await.unwrap());
        }
        batch.commit().await.unwrap();
        outcomes
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_without_touching_flags() {
        let store = store().await;
        let outcomes = upsert_all(&store, &[listing(1, Some(30_000))]).await;
        assert_eq!(outcomes, vec![UpsertOutcome::Inserted]);

        store.complete_enrichment(1, None).await.unwrap();
        assert!(store.mark_notified(1, Some("msg-1")).await.unwrap());

        let outcomes = upsert_all(&store, &[listing(1, Some(45_000))]).await;
        assert_eq!(outcomes, vec![UpsertOutcome::Updated]);

        let offer = store.get_offer(1).await.unwrap().unwrap();
        assert_eq!(offer.listing.salary_from, Some(45_000));
        assert!(offer.enriched);
        assert!(offer.notified);
        assert_eq!(offer.notification_ref.as_deref(), Some("msg-1"));
        assert_eq!(offer.listing.locations, vec!["Madrid".to_string()]);
    }

    #[tokio::test]
    async fn rolled_back_batch_leaves_store_unchanged() {
        let store = store().await;
        let mut batch = store.begin_upsert_batch(Utc::now()).await.unwrap();
        batch.upsert(&listing(1, None)).await.unwrap();
        batch.upsert(&listing(2, None)).await.unwrap();
        batch.rollback().await.unwrap();

        assert!(store.offer_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enrichment_replaces_previous_rows() {
        let store = store().await;
        upsert_all(&store, &[listing(5, None)]).await;

        let first = OfferEnrichment {
            skills: vec![Skill {
                category: SkillCategory::Nice,
                name: "Go".into(),
                icon: None,
                level: Some(2),
                description: None,
            }],
            languages: vec![LanguageRequirement {
                name: "English".into(),
                level: "B2".into(),
            }],
        };
        assert!(store.complete_enrichment(5, Some(&first)).await.unwrap());

        let second = OfferEnrichment {
            skills: vec![Skill {
                category: SkillCategory::Must,
                name: "Rust".into(),
                icon: Some("rust.svg".into()),
                level: Some(3),
                description: Some("async".into()),
            }],
            languages: vec![],
        };
        assert!(store.complete_enrichment(5, Some(&second)).await.unwrap());

        let stored = store.enrichment_for(5).await.unwrap();
        assert_eq!(stored, second);
    }

    #[tokio::test]
    async fn enrichment_of_unknown_offer_is_reported() {
        let store = store().await;
        assert!(!store.complete_enrichment(404, None).await.unwrap());
    }

    #[tokio::test]
    async fn notification_queue_requires_enrichment_and_marks_once() {
        let store = store().await;
        upsert_all(&store, &[listing(1, None), listing(2, None)]).await;
        store.complete_enrichment(1, None).await.unwrap();

        let pending = store.pending_notifications(10).await.unwrap();
        assert_eq!(pending.iter().map(Offer::offer_id).collect::<Vec<_>>(), vec![1]);

        assert!(store.mark_notified(1, None).await.unwrap());
        assert!(!store.mark_notified(1, None).await.unwrap());
        assert!(store.pending_notifications(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_sends_move_to_back_of_notification_queue() {
        let store = store().await;
        upsert_all(&store, &[listing(1, None), listing(2, None), listing(3, None)]).await;
        for id in [1, 2, 3] {
            store.complete_enrichment(id, None).await.unwrap();
        }

        store.record_notify_failure(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.record_notify_failure(2).await.unwrap();

        let pending = store.pending_notifications(10).await.unwrap();
        assert_eq!(pending.iter().map(Offer::offer_id).collect::<Vec<_>>(), vec![3, 1, 2]);
        let first_two = store.pending_notifications(2).await.unwrap();
        assert_eq!(first_two.iter().map(Offer::offer_id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[tokio::test]
    async fn flag_reset_is_rejected_by_schema() {
        let store = store().await;
        upsert_all(&store, &[listing(1, None)]).await;
        store.complete_enrichment(1, None).await.unwrap();

        let result = sqlx::query("UPDATE offers SET enriched = 0 WHERE offer_id = 1")
            .execute(store.pool())
            .await;
        assert!(result.is_err());
        assert!(store.get_offer(1).await.unwrap().unwrap().enriched);
    }

    #[tokio::test]
    async fn counts_reflect_queue_state() {
        let store = store().await;
        upsert_all(&store, &[listing(1, None), listing(2, None), listing(3, None)]).await;
        store.complete_enrichment(2, None).await.unwrap();
        store.complete_enrichment(3, None).await.unwrap();
        store.mark_notified(3, None).await.unwrap();
        store
            .record_fetch_attempt(&FetchAttempt {
                timestamp: Utc::now(),
                endpoint: "https://feed".into(),
                status_code: Some(200),
                response_size: Some(12),
                error: None,
            })
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(
            counts,
            StoreCounts {
                offers: 3,
                pending_enrichment: 1,
                pending_notification: 1,
                fetch_attempts: 1,
            }
        );
    }

    #[tokio::test]
    async fn connect_creates_missing_data_directory() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("data").join("history.db");
        let url = format!("sqlite://{}", db_path.display());

        let store = OfferStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();
        store.ping().await.unwrap();
        assert!(db_path.exists());

        let nested = dir.path().join("a").join("b").join("history.db");
        let store = OfferStore::open_path(&nested).await.unwrap();
        store.migrate().await.unwrap();
        assert!(nested.exists());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("history.db");

        let store = OfferStore::open_path(&path).await.unwrap();
        store.migrate().await.unwrap();
        store.put_state("build_id", "abc").await.unwrap();
        store.put_state("build_id", "def").await.unwrap();
        store.pool().close().await;

        let reopened = OfferStore::open_path(&path).await.unwrap();
        reopened.migrate().await.unwrap();
        assert_eq!(reopened.get_state("build_id").await.unwrap().as_deref(), Some("def"));
        assert_eq!(reopened.get_state("missing").await.unwrap(), None);
    }
}
