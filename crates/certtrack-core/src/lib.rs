use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub mod analytics;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod keys;
pub mod reminders;
pub mod status;
pub mod update;
pub mod validation;

pub use analytics::AnalyticsSummary;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use dashboard::{DashboardStats, ExpirationBucket, ExpirationBuckets, UpcomingExpiration};
pub use reminders::{LateReminderPolicy, ReminderDisposition, ReminderScheduler};
pub use status::StatusResolver;
pub use update::CertificationUpdate;
pub use validation::{NewCertification, ValidationError};

/// Category assigned when a submission leaves it blank.
pub const DEFAULT_CATEGORY: &str = "uncategorized";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CertificationStatus {
    Active,
    Expiring,
    Expired,
    Renewed,
}

impl Default for CertificationStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl CertificationStatus {
    pub const ALL: [CertificationStatus; 4] = [
        CertificationStatus::Active,
        CertificationStatus::Expiring,
        CertificationStatus::Expired,
        CertificationStatus::Renewed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CertificationStatus::Active => "active",
            CertificationStatus::Expiring => "expiring",
            CertificationStatus::Expired => "expired",
            CertificationStatus::Renewed => "renewed",
        }
    }

    /// Not yet expired and not superseded by a renewal.
    pub fn is_in_force(&self) -> bool {
        matches!(
            self,
            CertificationStatus::Active | CertificationStatus::Expiring
        )
    }
}

impl fmt::Display for CertificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificationStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "active" => Ok(CertificationStatus::Active),
            "expiring" | "expiring-soon" | "expiring_soon" => Ok(CertificationStatus::Expiring),
            "expired" => Ok(CertificationStatus::Expired),
            "renewed" => Ok(CertificationStatus::Renewed),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

/// Administrative status that wins over the date-derived one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StatusOverride {
    Renewed,
}

impl StatusOverride {
    pub fn as_status(&self) -> CertificationStatus {
        match self {
            StatusOverride::Renewed => CertificationStatus::Renewed,
        }
    }
}

impl FromStr for StatusOverride {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "renewed" => Ok(StatusOverride::Renewed),
            other => Err(format!("Unknown status override: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificationRecord {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub provider: String,
    pub category: String,
    pub issue_date: NaiveDate,
    pub expiration_date: NaiveDate,
    /// Last evaluation of the status resolver; refreshed by the sweep.
    #[serde(default)]
    pub status: CertificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_override: Option<StatusOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default)]
    pub reminders_sent: u32,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CertificationRecord {
    pub fn cost_or_zero(&self) -> f64 {
        self.cost.unwrap_or(0.0)
    }

    /// Negative once the expiration date has passed.
    pub fn days_until_expiration(&self, today: NaiveDate) -> i64 {
        (self.expiration_date - today).num_days()
    }

    pub fn is_renewed(&self) -> bool {
        self.status_override == Some(StatusOverride::Renewed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderEvent {
    pub certification_id: String,
    pub owner: String,
    pub days_before_expiration: u32,
    pub scheduled_for: NaiveDate,
    #[serde(default)]
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl ReminderEvent {
    pub fn is_due(&self, today: NaiveDate) -> bool {
        !self.sent && self.scheduled_for <= today
    }

    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.sent = true;
        self.sent_at = Some(at);
    }
}

/// Recipient details used when rendering reminder notices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

/// Accepts either a list of strings or a comma separated string.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    let mut tags = BTreeSet::new();
    match val {
        serde_json::Value::Null => {}
        serde_json::Value::String(s) => {
            tags.extend(normalize_tags(s.split(',')));
        }
        serde_json::Value::Array(items) => {
            for item in items {
                match item {
                    serde_json::Value::String(s) => tags.extend(normalize_tags([s.as_str()])),
                    _ => return Err(serde::de::Error::custom("expected string tag")),
                }
            }
        }
        _ => {
            return Err(serde::de::Error::custom(
                "expected list of strings or comma separated tags",
            ))
        }
    }
    Ok(tags)
}

pub fn normalize_tags<'a>(raw: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    raw.into_iter()
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
