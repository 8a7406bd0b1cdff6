//! Update-fragment contract and tolerant analysis normalization.
//!
//! Fragments are partial by construction: absence means "no news", never
//! "clear this field". Analysis payloads arrive from a model-backed
//! collaborator and are normalized leniently; a malformed field is dropped,
//! the rest of the payload survives.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Where a fragment came from. Diagnostics only; merge precedence is purely
/// by timestamp.
pub enum FragmentSource {
    Push,
    Pull,
    CachedSnapshot,
}

impl FragmentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::CachedSnapshot => "cached_snapshot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Positive,
    #[default]
    Neutral,
    Negative,
}

/// One analyzed look at a conversation, attached to an interaction record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub medical_history: Option<String>,
    #[serde(default)]
    pub health_complaints: Vec<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub barriers: Vec<String>,
    #[serde(default)]
    pub urgency: Option<UrgencyLevel>,
    #[serde(default)]
    pub emotion: Emotion,
    #[serde(default)]
    pub captured_at_ms: u64,
}

/// Partial view over a user's detail fields. `None`/empty means "no news".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetailPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub health_complaints: Vec<String>,
    #[serde(default)]
    pub barriers: Vec<String>,
    #[serde(default)]
    pub first_interaction_at_ms: Option<u64>,
    #[serde(default)]
    pub last_interaction_at_ms: Option<u64>,
}

impl DetailPatch {
    /// Detail-shaped projection of an analysis snapshot, used when a push
    /// producer only has the analysis to offer.
    pub fn from_analysis(analysis: &AnalysisSnapshot) -> Self {
        Self {
            name: analysis.name.clone(),
            age: analysis.age,
            gender: analysis.gender,
            location: analysis.location.clone(),
            health_complaints: analysis.health_complaints.clone(),
            barriers: analysis.barriers.clone(),
            first_interaction_at_ms: None,
            last_interaction_at_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightFragment {
    pub source: FragmentSource,
    pub user_id: String,
    pub received_at_ms: u64,
    #[serde(default)]
    pub details: DetailPatch,
    #[serde(default)]
    pub analysis: Option<AnalysisSnapshot>,
}

impl InsightFragment {
    pub fn new(source: FragmentSource, user_id: &str, received_at_ms: u64) -> Self {
        Self {
            source,
            user_id: user_id.to_string(),
            received_at_ms,
            details: DetailPatch::default(),
            analysis: None,
        }
    }
}

pub fn parse_rfc3339_to_unix_ms(raw: &str) -> Option<u64> {
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}

/// Normalizes a raw analysis document into an [`AnalysisSnapshot`].
///
/// The upstream analyzer answers with loosely-shaped JSON, historically in a
/// mix of English and Indonesian field names and enum spellings. Every field
/// is normalized independently; anything unrecognized is dropped rather than
/// failing the document. `fallback_captured_at_ms` is used when the payload
/// carries no parseable timestamp.
pub fn normalize_analysis_value(raw: &Value, fallback_captured_at_ms: u64) -> AnalysisSnapshot {
    let Some(fields) = raw.as_object() else {
        return AnalysisSnapshot {
            captured_at_ms: fallback_captured_at_ms,
            ..AnalysisSnapshot::default()
        };
    };

    let captured_at_ms = aliased_field(fields, &["timestamp", "captured_at"])
        .and_then(|value| match value {
            Value::String(text) => parse_rfc3339_to_unix_ms(text),
            Value::Number(number) => number.as_u64(),
            _ => None,
        })
        .unwrap_or(fallback_captured_at_ms);

    AnalysisSnapshot {
        name: string_field(fields, &["name", "nama"]),
        age: age_field(fields, &["age", "usia"]),
        gender: aliased_field(fields, &["gender", "jenis_kelamin"]).and_then(parse_gender_value),
        location: string_field(fields, &["location", "lokasi"]),
        medical_history: string_field(fields, &["medical_history", "riwayat_penyakit"]),
        health_complaints: list_field(fields, &["health_complaints", "jenis_keluhan"]),
        symptoms: list_field(fields, &["symptoms", "gejala"]),
        barriers: list_field(fields, &["conversion_barriers", "barriers", "hambatan"]),
        urgency: aliased_field(fields, &["urgency_level", "tingkat_urgensi"])
            .and_then(parse_urgency_value),
        emotion: aliased_field(fields, &["emotion", "emosi"])
            .and_then(parse_emotion_value)
            .unwrap_or_default(),
        captured_at_ms,
    }
}

fn aliased_field<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| fields.get(*alias))
}

fn string_field(fields: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    let value = aliased_field(fields, aliases)?;
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

fn age_field(fields: &Map<String, Value>, aliases: &[&str]) -> Option<u32> {
    let value = aliased_field(fields, aliases)?;
    match value {
        Value::Number(number) => number.as_u64().and_then(|raw| u32::try_from(raw).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// Coerces string-or-array inputs to a list of non-empty strings.
fn list_field(fields: &Map<String, Value>, aliases: &[&str]) -> Vec<String> {
    let Some(value) = aliased_field(fields, aliases) else {
        return Vec::new();
    };
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
        Value::Array(rows) => rows
            .iter()
            .filter_map(|row| match row {
                Value::String(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                }
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_gender_value(value: &Value) -> Option<Gender> {
    let raw = value.as_str()?.trim().to_ascii_lowercase();
    match raw.as_str() {
        "male" | "laki" | "laki-laki" | "pria" => Some(Gender::Male),
        "female" | "perempuan" | "wanita" => Some(Gender::Female),
        _ => None,
    }
}

fn parse_urgency_value(value: &Value) -> Option<UrgencyLevel> {
    let raw = value.as_str()?.trim().to_ascii_lowercase();
    match raw.as_str() {
        "low" | "rendah" => Some(UrgencyLevel::Low),
        "medium" | "sedang" => Some(UrgencyLevel::Medium),
        "high" | "tinggi" => Some(UrgencyLevel::High),
        _ => None,
    }
}

fn parse_emotion_value(value: &Value) -> Option<Emotion> {
    let raw = value.as_str()?.trim().to_ascii_lowercase();
    match raw.as_str() {
        "positive" | "positif" => Some(Emotion::Positive),
        "neutral" | "netral" => Some(Emotion::Neutral),
        "negative" | "negatif" => Some(Emotion::Negative),
        _ => None,
    }
}
