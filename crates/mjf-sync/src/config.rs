use std::time::Duration;

use mjf_storage::{BackoffPolicy, HttpClientConfig};

pub const DEFAULT_FEED_URL: &str =
    "https://www.getmanfred.com/api/v2/public/offers?lang=ES&onlyActive=true";
pub const DEFAULT_DETAIL_PATTERN: &str =
    "https://www.getmanfred.com/_next/data/{build_id}/es/job-offers/{offer_id}/{offer_slug}.json";
pub const DEFAULT_BUILD_ID_PAGE: &str = "https://www.getmanfred.com/es/job-offers";
pub const DEFAULT_OFFER_URL_PATTERN: &str = "https://www.getmanfred.com/es/job-offers/{offer_id}/{slug}";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub feed_url: String,
    pub detail_pattern: String,
    pub build_id_page_url: String,
    /// Initial build id, used only when none has been persisted yet.
    pub build_id_seed: Option<String>,
    pub offer_url_pattern: String,
    pub max_retries: usize,
    pub retry_backoff_secs: f64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub fetch_interval_secs: u64,
    pub max_items_per_cycle: usize,
    pub notify_batch_size: usize,
    pub notify_delay_ms: u64,
    pub discord_webhook_url: Option<String>,
    pub notifications_enabled: bool,
    pub cleanup_cron: String,
    pub status_bind: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let string_or = |key: &str, default: &str| text(key).unwrap_or_else(|| default.to_string());
        let parsed_or = |key: &str, default: u64| text(key).and_then(|v| v.parse().ok()).unwrap_or(default);

        Self {
            database_url: string_or("DATABASE_URL", "sqlite://data/history.db"),
            feed_url: string_or("EXTERNAL_ENDPOINT_URL", DEFAULT_FEED_URL),
            detail_pattern: string_or("DETAIL_ENDPOINT_PATTERN", DEFAULT_DETAIL_PATTERN),
            build_id_page_url: string_or("BUILD_ID_PAGE_URL", DEFAULT_BUILD_ID_PAGE),
            build_id_seed: text("BUILD_ID_HASH"),
            offer_url_pattern: string_or("OFFER_URL_PATTERN", DEFAULT_OFFER_URL_PATTERN),
            max_retries: parsed_or("MAX_RETRIES", 3) as usize,
            retry_backoff_secs: text("RETRY_BACKOFF")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
            http_timeout_secs: parsed_or("MJF_HTTP_TIMEOUT_SECS", 15),
            user_agent: string_or("MJF_USER_AGENT", "mjf-bot/0.1"),
            fetch_interval_secs: parsed_or("FETCH_INTERVAL", 3600).max(1),
            max_items_per_cycle: parsed_or("MAX_ITEMS_PER_CYCLE", 50) as usize,
            notify_batch_size: parsed_or("NOTIFY_BATCH_SIZE", 5) as usize,
            notify_delay_ms: parsed_or("NOTIFY_DELAY_MS", 1000),
            discord_webhook_url: text("DISCORD_WEBHOOK_URL"),
            notifications_enabled: text("NOTIFICATIONS_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
                .unwrap_or(true),
            cleanup_cron: string_or("CLEANUP_CRON", "0 0 4 * * *"),
            status_bind: string_or("STATUS_BIND", "0.0.0.0:8080"),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy::from_factor(self.max_retries, self.retry_backoff_secs),
        }
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    pub fn notify_delay(&self) -> Duration {
        Duration::from_millis(self.notify_delay_ms)
    }

    /// Webhook present and not switched off.
    pub fn active_webhook(&self) -> Option<&str> {
        if self.notifications_enabled {
            self.discord_webhook_url.as_deref()
        } else {
            None
        }
    }
}
