use crate::validation::{normalize_category, validate_record, ValidationError};
use crate::{normalize_tags, CertificationRecord, StatusOverride};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of mutations a stored certification accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "camelCase")]
pub enum CertificationUpdate {
    SetName(String),
    SetProvider(String),
    SetCategory(Option<String>),
    SetIssueDate(NaiveDate),
    SetExpirationDate(NaiveDate),
    SetCost(Option<f64>),
    SetTags(Vec<String>),
    SetDocumentUrl(Option<String>),
    SetStatusOverride(Option<StatusOverride>),
}

impl CertificationUpdate {
    /// Whether the stored reminder set must be rebuilt after this update.
    pub fn requires_reminder_regeneration(&self) -> bool {
        match self {
            CertificationUpdate::SetExpirationDate(_) => true,
            CertificationUpdate::SetStatusOverride(_) => true,
            CertificationUpdate::SetName(_)
            | CertificationUpdate::SetProvider(_)
            | CertificationUpdate::SetCategory(_)
            | CertificationUpdate::SetIssueDate(_)
            | CertificationUpdate::SetCost(_)
            | CertificationUpdate::SetTags(_)
            | CertificationUpdate::SetDocumentUrl(_) => false,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            CertificationUpdate::SetName(_) => "name",
            CertificationUpdate::SetProvider(_) => "provider",
            CertificationUpdate::SetCategory(_) => "category",
            CertificationUpdate::SetIssueDate(_) => "issueDate",
            CertificationUpdate::SetExpirationDate(_) => "expirationDate",
            CertificationUpdate::SetCost(_) => "cost",
            CertificationUpdate::SetTags(_) => "tags",
            CertificationUpdate::SetDocumentUrl(_) => "documentUrl",
            CertificationUpdate::SetStatusOverride(_) => "statusOverride",
        }
    }

    fn apply_to(self, record: &mut CertificationRecord) {
        match self {
            CertificationUpdate::SetName(name) => record.name = name.trim().to_string(),
            CertificationUpdate::SetProvider(provider) => {
                record.provider = provider.trim().to_string()
            }
            CertificationUpdate::SetCategory(category) => {
                record.category = normalize_category(category.as_deref())
            }
            CertificationUpdate::SetIssueDate(date) => record.issue_date = date,
            CertificationUpdate::SetExpirationDate(date) => record.expiration_date = date,
            CertificationUpdate::SetCost(cost) => record.cost = cost,
            CertificationUpdate::SetTags(tags) => {
                record.tags = normalize_tags(tags.iter().map(String::as_str))
            }
            CertificationUpdate::SetDocumentUrl(url) => {
                record.document_url = url
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
            }
            CertificationUpdate::SetStatusOverride(status_override) => {
                record.status_override = status_override
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdate {
    pub record: CertificationRecord,
    pub regenerate_reminders: bool,
}

/// Applies the batch to a copy and validates the result as a whole, so an
/// intermediate state (e.g. moving both dates) never has to be valid.
pub fn apply_updates(
    record: &CertificationRecord,
    updates: Vec<CertificationUpdate>,
    now: DateTime<Utc>,
) -> Result<AppliedUpdate, ValidationError> {
    let mut updated = record.clone();
    let mut regenerate_reminders = false;
    for update in updates {
        regenerate_reminders |= update.requires_reminder_regeneration();
        update.apply_to(&mut updated);
    }
    validate_record(&updated)?;
    updated.updated_at = now;
    Ok(AppliedUpdate {
        record: updated,
        regenerate_reminders,
    })
}
