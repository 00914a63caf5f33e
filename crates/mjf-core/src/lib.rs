//! Core domain model for the Manfred job fetcher.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "mjf-core";

/// Externally-assigned offer identifier.
pub type OfferId = i64;

pub const DEFAULT_POSITION: &str = "Unknown Position";
pub const DEFAULT_COMPANY: &str = "Unknown Company";

/// Walks an object path, returning `None` as soon as a segment is missing.
pub fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

pub fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

/// Integer at `path`. Whole-valued floats are accepted since the feed is not strict about it.
pub fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    as_integer(json_at(value, path)?)
}

fn as_integer(value: &JsonValue) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingParseError {
    #[error("listing record is not a JSON object")]
    NotAnObject,
    #[error("listing record has no integer id")]
    MissingId,
    #[error("offer {offer_id}: field `{field}` is malformed")]
    InvalidField { offer_id: OfferId, field: &'static str },
}

/// Descriptive fields of one feed record, as the Reconciler stores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferListing {
    pub offer_id: OfferId,
    pub position: String,
    pub company_name: String,
    pub company_logo_url: Option<String>,
    pub salary_from: Option<i64>,
    pub salary_to: Option<i64>,
    pub remote_percentage: Option<i64>,
    pub locations: Vec<String>,
    pub slug: String,
}

impl OfferListing {
    pub fn from_json(value: &JsonValue) -> Result<Self, ListingParseError> {
        if !value.is_object() {
            return Err(ListingParseError::NotAnObject);
        }
        let offer_id = value
            .get("id")
            .and_then(as_integer)
            .ok_or(ListingParseError::MissingId)?;

        let optional_int = |field: &'static str| -> Result<Option<i64>, ListingParseError> {
            match value.get(field) {
                None | Some(JsonValue::Null) => Ok(None),
                Some(v) => as_integer(v)
                    .map(Some)
                    .ok_or(ListingParseError::InvalidField { offer_id, field }),
            }
        };

        let locations = match value.get("locations") {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    JsonValue::String(s) => text_or_none(s),
                    JsonValue::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(JsonValue::String(s)) => text_or_none(s).into_iter().collect(),
            Some(_) => {
                return Err(ListingParseError::InvalidField {
                    offer_id,
                    field: "locations",
                })
            }
        };

        Ok(Self {
            offer_id,
            position: json_str(value, &["position"])
                .and_then(text_or_none)
                .unwrap_or_else(|| DEFAULT_POSITION.to_string()),
            company_name: json_str(value, &["company", "name"])
                .and_then(text_or_none)
                .unwrap_or_else(|| DEFAULT_COMPANY.to_string()),
            company_logo_url: json_str(value, &["company", "logoDark", "url"]).and_then(text_or_none),
            salary_from: optional_int("salaryFrom")?,
            salary_to: optional_int("salaryTo")?,
            remote_percentage: optional_int("remotePercentage")?,
            locations,
            slug: json_str(value, &["slug"])
                .and_then(text_or_none)
                .unwrap_or_else(|| format!("job-{offer_id}")),
        })
    }
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Persisted offer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub listing: OfferListing,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub notified: bool,
    pub enriched: bool,
    pub notification_ref: Option<String>,
}

impl Offer {
    pub fn offer_id(&self) -> OfferId {
        self.listing.offer_id
    }
}

/// Minimal projection needed to fetch an offer's detail payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffer {
    pub offer_id: OfferId,
    pub slug: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillCategory {
    Must,
    Nice,
    Extra,
}

impl SkillCategory {
    pub const ALL: [SkillCategory; 3] = [SkillCategory::Must, SkillCategory::Nice, SkillCategory::Extra];

    pub fn as_str(self) -> &'static str {
        match self {
            SkillCategory::Must => "must",
            SkillCategory::Nice => "nice",
            SkillCategory::Extra => "extra",
        }
    }
}

impl fmt::Display for SkillCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "must" => Ok(SkillCategory::Must),
            "nice" => Ok(SkillCategory::Nice),
            "extra" => Ok(SkillCategory::Extra),
            other => Err(format!("unknown skill category `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub category: SkillCategory,
    pub name: String,
    pub icon: Option<String>,
    pub level: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageRequirement {
    pub name: String,
    pub level: String,
}

/// Normalized enrichment data that replaces an offer's skills and languages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferEnrichment {
    pub skills: Vec<Skill>,
    pub languages: Vec<LanguageRequirement>,
}

impl OfferEnrichment {
    pub fn skills_in(&self, category: SkillCategory) -> impl Iterator<Item = &Skill> {
        self.skills.iter().filter(move |s| s.category == category)
    }
}

/// One row of the outbound HTTP audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub status_code: Option<u16>,
    pub response_size: Option<usize>,
    pub error: Option<String>,
}
