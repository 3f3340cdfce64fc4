use crate::keys::KEY_SEPARATOR;
use crate::{normalize_tags, CertificationRecord, CertificationStatus, DEFAULT_CATEGORY};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidIdentifier { field: &'static str, reason: String },
    #[error("issue date {issue_date} is after expiration date {expiration_date}")]
    IssueAfterExpiration {
        issue_date: NaiveDate,
        expiration_date: NaiveDate,
    },
    #[error("cost cannot be negative: {0}")]
    NegativeCost(f64),
    #[error("cost must be a finite number")]
    NonFiniteCost,
    #[error("reminder offsets cannot be empty")]
    EmptyReminderOffsets,
    #[error("duplicate reminder offset: {0} days")]
    DuplicateReminderOffset(u32),
}

/// Submission payload for a new certification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewCertification {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub category: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub document_url: Option<String>,
}

impl NewCertification {
    /// Builds the record with `status` left at its default; the caller
    /// resolves it against the clock.
    pub fn into_record(
        self,
        owner: &str,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<CertificationRecord, ValidationError> {
        validate_identifier("owner", owner)?;
        validate_identifier("id", id)?;
        let name = required_text("name", &self.name)?;
        let provider = required_text("provider", &self.provider)?;
        let issue_date = self.issue_date.ok_or(ValidationError::MissingField("issueDate"))?;
        let expiration_date = self
            .expiration_date
            .ok_or(ValidationError::MissingField("expirationDate"))?;

        let record = CertificationRecord {
            id: id.to_string(),
            owner: owner.to_string(),
            name,
            provider,
            category: normalize_category(self.category.as_deref()),
            issue_date,
            expiration_date,
            status: CertificationStatus::default(),
            status_override: None,
            cost: self.cost,
            reminders_sent: 0,
            tags: normalize_tags(self.tags.iter().map(String::as_str)),
            document_url: self
                .document_url
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            created_at: now,
            updated_at: now,
        };
        validate_record(&record)?;
        Ok(record)
    }
}

/// Checks the invariants every stored record must satisfy.
pub fn validate_record(record: &CertificationRecord) -> Result<(), ValidationError> {
    validate_identifier("owner", &record.owner)?;
    validate_identifier("id", &record.id)?;
    required_text("name", &record.name)?;
    required_text("provider", &record.provider)?;
    if record.issue_date > record.expiration_date {
        return Err(ValidationError::IssueAfterExpiration {
            issue_date: record.issue_date,
            expiration_date: record.expiration_date,
        });
    }
    validate_cost(record.cost)
}

pub fn validate_cost(cost: Option<f64>) -> Result<(), ValidationError> {
    match cost {
        Some(value) if !value.is_finite() => Err(ValidationError::NonFiniteCost),
        Some(value) if value < 0.0 => Err(ValidationError::NegativeCost(value)),
        _ => Ok(()),
    }
}

/// Identifiers end up inside composite keys, so the separator is reserved.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(ValidationError::InvalidIdentifier {
            field,
            reason: format!("must not contain '{KEY_SEPARATOR}'"),
        });
    }
    if value.trim() != value {
        return Err(ValidationError::InvalidIdentifier {
            field,
            reason: "must not have leading or trailing whitespace".to_string(),
        });
    }
    Ok(())
}

pub fn validate_reminder_offsets(offsets: &[u32]) -> Result<(), ValidationError> {
    if offsets.is_empty() {
        return Err(ValidationError::EmptyReminderOffsets);
    }
    let mut seen = BTreeSet::new();
    for offset in offsets {
        if !seen.insert(*offset) {
            return Err(ValidationError::DuplicateReminderOffset(*offset));
        }
    }
    Ok(())
}

pub fn normalize_category(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|category| !category.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string()
}

fn required_text(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(trimmed.to_string())
}
