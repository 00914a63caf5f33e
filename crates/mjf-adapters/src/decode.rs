//! Variant decoder for the skills section of an offer detail envelope.
//!
//! The section has moved around between site releases, so a fixed list of
//! locations is tried in priority order and the one that matched is reported.

use std::collections::HashSet;
use std::fmt;

use mjf_core::{json_at, json_i64, LanguageRequirement, OfferEnrichment, Skill, SkillCategory};
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SkillsPath {
    #[serde(rename = "skillsSectionData")]
    SkillsSectionData,
    #[serde(rename = "content.skills")]
    ContentSkills,
    #[serde(rename = "skills")]
    TopLevelSkills,
}

impl SkillsPath {
    pub const PRIORITY: [SkillsPath; 3] = [
        SkillsPath::SkillsSectionData,
        SkillsPath::ContentSkills,
        SkillsPath::TopLevelSkills,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SkillsPath::SkillsSectionData => "skillsSectionData",
            SkillsPath::ContentSkills => "content.skills",
            SkillsPath::TopLevelSkills => "skills",
        }
    }

    fn segments(self) -> &'static [&'static str] {
        match self {
            SkillsPath::SkillsSectionData => &["skillsSectionData"],
            SkillsPath::ContentSkills => &["content", "skills"],
            SkillsPath::TopLevelSkills => &["skills"],
        }
    }

    fn locate(self, offer: &JsonValue) -> Option<&JsonValue> {
        let section = json_at(offer, self.segments())?;
        if !section.is_object() {
            return None;
        }
        match self {
            SkillsPath::TopLevelSkills if !has_category_lists(section) => None,
            _ => Some(section),
        }
    }
}

impl fmt::Display for SkillsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDetail {
    /// `None` when no known location held a skills section.
    pub path: Option<SkillsPath>,
    pub enrichment: Option<OfferEnrichment>,
}

fn has_category_lists(section: &JsonValue) -> bool {
    SkillCategory::ALL
        .iter()
        .any(|c| section.get(c.as_str()).is_some())
}

pub fn decode_enrichment(offer: &JsonValue) -> DecodedDetail {
    let Some((path, section)) = SkillsPath::PRIORITY
        .iter()
        .find_map(|path| path.locate(offer).map(|section| (*path, section)))
    else {
        return DecodedDetail {
            path: None,
            enrichment: None,
        };
    };

    DecodedDetail {
        path: Some(path),
        enrichment: Some(OfferEnrichment {
            skills: decode_skills(section),
            languages: decode_languages(section),
        }),
    }
}

fn decode_skills(section: &JsonValue) -> Vec<Skill> {
    let lists = match section.get("skills") {
        Some(nested) if nested.is_object() => nested,
        _ if has_category_lists(section) => section,
        _ => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut skills = Vec::new();
    for category in SkillCategory::ALL {
        let Some(entries) = lists.get(category.as_str()).and_then(JsonValue::as_array) else {
            continue;
        };
        for entry in entries {
            let Some(name) = non_empty(entry, "skill").or_else(|| non_empty(entry, "name")) else {
                continue;
            };
            if !seen.insert((category, name.clone())) {
                continue;
            }
            skills.push(Skill {
                category,
                name,
                icon: non_empty(entry, "icon"),
                level: json_i64(entry, &["level"]),
                description: non_empty(entry, "desc"),
            });
        }
    }
    skills
}

fn decode_languages(section: &JsonValue) -> Vec<LanguageRequirement> {
    let entries = section
        .get("minLanguages")
        .and_then(JsonValue::as_array)
        .or_else(|| section.get("languages").and_then(JsonValue::as_array));
    let Some(entries) = entries else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            Some(LanguageRequirement {
                name: non_empty(entry, "name")?,
                level: non_empty(entry, "level").unwrap_or_default(),
            })
        })
        .collect()
}

fn non_empty(entry: &JsonValue, key: &str) -> Option<String> {
    let value = entry.get(key)?;
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
