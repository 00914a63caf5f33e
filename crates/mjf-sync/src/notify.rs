//! Outbound notifications: Discord-style webhook rendering, sending and batch dispatch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mjf_core::{Offer, OfferEnrichment, Skill, SkillCategory};
use mjf_storage::{OfferStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const EMBED_COLOR: u32 = 5_814_783;
pub const FIELD_VALUE_LIMIT: usize = 1024;
pub const TITLE_LIMIT: usize = 256;
const FOOTER_TEXT: &str = "Via Manfred Job Fetcher";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(reqwest::Error),
    #[error("webhook returned status {status}: {body}")]
    Status { status: u16, body: String },
}

// The webhook URL carries its token, so it never reaches error text or logs.
impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Request(err.without_url())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub content: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub color: u32,
    pub timestamp: String,
    pub footer: EmbedFooter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Delivery channel for rendered offers.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns the channel's message id when it reports one.
    async fn send(&self, message: &WebhookMessage) -> Result<Option<String>, NotifyError>;

    async fn retract(&self, notification_ref: &str) -> Result<(), NotifyError>;
}

/// `40000` -> `40.000`
pub fn format_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

pub fn salary_text(from: Option<i64>, to: Option<i64>) -> Option<String> {
    let from = from.filter(|v| *v > 0);
    let to = to.filter(|v| *v > 0);
    match (from, to) {
        (Some(f), Some(t)) => Some(format!("{}€ - {}€", format_thousands(f), format_thousands(t))),
        (Some(f), None) => Some(format!("From {}€", format_thousands(f))),
        (None, Some(t)) => Some(format!("Up to {}€", format_thousands(t))),
        (None, None) => None,
    }
}

fn truncate_to(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let mut out: String = value.chars().take(limit - 3).collect();
    out.push_str("...");
    out
}

pub fn truncate_field(value: &str) -> String {
    truncate_to(value, FIELD_VALUE_LIMIT)
}

pub fn offer_url(pattern: &str, offer: &Offer) -> String {
    pattern
        .replace("{offer_id}", &offer.offer_id().to_string())
        .replace("{slug}", &offer.listing.slug)
}

fn skill_lines<'a>(skills: impl Iterator<Item = &'a Skill>) -> Option<String> {
    let lines: Vec<String> = skills
        .map(|skill| match skill.level.filter(|l| *l > 0) {
            Some(level) => format!("• {} ({})", skill.name, "★".repeat(level.min(10) as usize)),
            None => format!("• {}", skill.name),
        })
        .collect();
    (!lines.is_empty()).then(|| truncate_field(&lines.join("\n")))
}

fn category_heading(category: SkillCategory) -> &'static str {
    match category {
        SkillCategory::Must => "🔒 Must Have Skills",
        SkillCategory::Nice => "✨ Nice to Have Skills",
        SkillCategory::Extra => "📚 Extra Skills",
    }
}

pub fn render_offer(
    offer: &Offer,
    enrichment: &OfferEnrichment,
    offer_url_pattern: &str,
    now: DateTime<Utc>,
) -> WebhookMessage {
    let listing = &offer.listing;
    let mut fields = Vec::new();

    let mut info = Vec::new();
    if let Some(salary) = salary_text(listing.salary_from, listing.salary_to) {
        info.push(format!("💰 **Salary:** {salary}"));
    }
    if let Some(remote) = listing.remote_percentage {
        info.push(format!("🏠 **Remote:** {remote}% Remote"));
    }
    if !listing.locations.is_empty() {
        info.push(format!("📍 **Location:** {}", listing.locations.join(", ")));
    }
    if !info.is_empty() {
        fields.push(EmbedField {
            name: "Overview".into(),
            value: truncate_field(&info.join("\n")),
            inline: false,
        });
    }

    for category in SkillCategory::ALL {
        if let Some(value) = skill_lines(enrichment.skills_in(category)) {
            fields.push(EmbedField {
                name: category_heading(category).into(),
                value,
                inline: false,
            });
        }
    }

    if !enrichment.languages.is_empty() {
        let value = enrichment
            .languages
            .iter()
            .map(|l| {
                if l.level.is_empty() {
                    format!("• {}", l.name)
                } else {
                    format!("• {} ({})", l.name, l.level)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        fields.push(EmbedField {
            name: "🗣️ Languages".into(),
            value: truncate_field(&value),
            inline: false,
        });
    }

    WebhookMessage {
        content: String::new(),
        embeds: vec![Embed {
            title: truncate_to(
                &format!("{} @ {}", listing.position, listing.company_name),
                TITLE_LIMIT,
            ),
            url: offer_url(offer_url_pattern, offer),
            color: EMBED_COLOR,
            timestamp: now.to_rfc3339(),
            footer: EmbedFooter {
                text: FOOTER_TEXT.into(),
            },
            thumbnail: listing
                .company_logo_url
                .clone()
                .map(|url| EmbedImage { url }),
            fields,
        }],
    }
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }

    fn split_url(&self) -> (&str, Option<&str>) {
        match self.webhook_url.split_once('?') {
            Some((base, query)) => (base.trim_end_matches('/'), Some(query)),
            None => (self.webhook_url.trim_end_matches('/'), None),
        }
    }

    fn send_url(&self) -> String {
        match self.split_url() {
            (base, Some(query)) => format!("{base}?{query}&wait=true"),
            (base, None) => format!("{base}?wait=true"),
        }
    }

    fn message_url(&self, message_id: &str) -> String {
        match self.split_url() {
            (base, Some(query)) => format!("{base}/messages/{message_id}?{query}"),
            (base, None) => format!("{base}/messages/{message_id}"),
        }
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, NotifyError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(NotifyError::Status {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, message: &WebhookMessage) -> Result<Option<String>, NotifyError> {
        let resp = self.client.post(self.send_url()).json(message).send().await?;
        let resp = ensure_success(resp).await?;
        // 204 or an unexpected body still counts as delivered
        let id = resp.json::<SentMessage>().await.ok().and_then(|m| m.id);
        Ok(id)
    }

    async fn retract(&self, notification_ref: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .delete(self.message_url(notification_ref))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(notification_ref, "message already gone");
            return Ok(());
        }
        ensure_success(resp).await?;
        Ok(())
    }
}

pub struct Dispatcher {
    store: OfferStore,
    notifier: Arc<dyn Notifier>,
    offer_url_pattern: String,
}

impl Dispatcher {
    pub fn new(store: OfferStore, notifier: Arc<dyn Notifier>, offer_url_pattern: impl Into<String>) -> Self {
        Self {
            store,
            notifier,
            offer_url_pattern: offer_url_pattern.into(),
        }
    }

    /// Send eligible offers from the store. Offers that failed before wait behind fresh ones.
    pub async fn dispatch_pending(&self, batch_size: usize, delay: Duration) -> Result<usize, StoreError> {
        let offers = self.store.pending_notifications(batch_size).await?;
        if offers.is_empty() {
            debug!("no offers waiting for notification");
            return Ok(0);
        }
        self.send_batch(&offers, batch_size, delay).await
    }

    /// Sends up to `batch_size` offers sequentially, pausing `delay` between sends.
    ///
    /// Each offer is marked notified right after its send is confirmed. A failed
    /// send leaves the offer unnotified, stamps the attempt and the batch moves on.
    pub async fn send_batch(
        &self,
        offers: &[Offer],
        batch_size: usize,
        delay: Duration,
    ) -> Result<usize, StoreError> {
        let eligible: Vec<&Offer> = offers
            .iter()
            .filter(|o| o.enriched && !o.notified)
            .take(batch_size)
            .collect();

        info!(candidates = offers.len(), batch = eligible.len(), "sending notifications");
        let mut sent = 0;
        for (index, offer) in eligible.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let offer_id = offer.offer_id();
            let enrichment = self.store.enrichment_for(offer_id).await?;
            let message = render_offer(offer, &enrichment, &self.offer_url_pattern, Utc::now());

            match self.notifier.send(&message).await {
                Ok(notification_ref) => {
                    if self.store.mark_notified(offer_id, notification_ref.as_deref()).await? {
                        sent += 1;
                        info!(offer_id, "notification sent");
                    } else {
                        warn!(offer_id, "offer was already marked notified");
                    }
                }
                Err(err) => {
                    error!(offer_id, error = %err, "notification failed");
                    self.store.record_notify_failure(offer_id).await?;
                }
            }
        }

        info!(sent, attempted = eligible.len(), "notification batch finished");
        Ok(sent)
    }
}
