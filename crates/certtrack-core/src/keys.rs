//! Composite keys for the single-table layout.
//!
//! Every item lives under its owner's partition (`USER#<owner>`) and is told
//! apart by a kind-specific sort-key prefix. Certifications additionally
//! project into two secondary indexes, one by status and one by category,
//! both sorted by expiration date so "expiring before D" is a range scan.

use crate::{CertificationRecord, CertificationStatus, ReminderEvent};
use chrono::NaiveDate;

pub const KEY_SEPARATOR: char = '#';

pub const USER_PREFIX: &str = "USER#";
pub const CERTIFICATION_PREFIX: &str = "CERT#";
pub const REMINDER_PREFIX: &str = "REMINDER#";
pub const ANALYTICS_PREFIX: &str = "ANALYTICS#";
pub const PROFILE_SORT_KEY: &str = "PROFILE#";
pub const EXPIRATION_PREFIX: &str = "EXP#";

/// Sparse index partition holding reminders that have not been delivered.
pub const UNSENT_REMINDERS_PARTITION: &str = "REMINDER#UNSENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Certification,
    Reminder,
    Analytics,
    Profile,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Certification => "certification",
            EntityKind::Reminder => "reminder",
            EntityKind::Analytics => "analytics",
            EntityKind::Profile => "profile",
        }
    }

    pub fn sort_key_prefix(&self) -> &'static str {
        match self {
            EntityKind::Certification => CERTIFICATION_PREFIX,
            EntityKind::Reminder => REMINDER_PREFIX,
            EntityKind::Analytics => ANALYTICS_PREFIX,
            EntityKind::Profile => PROFILE_SORT_KEY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub pk: String,
    pub sk: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificationKeys {
    pub primary: ItemKey,
    pub by_status: IndexKey,
    pub by_category: IndexKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderKeys {
    pub primary: ItemKey,
    /// Present only while the reminder is unsent.
    pub due: Option<IndexKey>,
}

pub fn user_partition(owner: &str) -> String {
    format!("{USER_PREFIX}{owner}")
}

pub fn certification_sort_key(certification_id: &str) -> String {
    format!("{CERTIFICATION_PREFIX}{certification_id}")
}

pub fn certification_key(owner: &str, certification_id: &str) -> ItemKey {
    ItemKey {
        pk: user_partition(owner),
        sk: certification_sort_key(certification_id),
    }
}

/// Format: `EXP#<yyyy-mm-dd>#CERT#<id>`
pub fn expiration_sort_key(expiration_date: NaiveDate, certification_id: &str) -> String {
    format!(
        "{EXPIRATION_PREFIX}{}#{CERTIFICATION_PREFIX}{certification_id}",
        expiration_date.format("%Y-%m-%d")
    )
}

/// Exclusive upper bound for index sort keys of records expiring before `date`.
pub fn expiring_before_bound(date: NaiveDate) -> String {
    format!("{EXPIRATION_PREFIX}{}", date.format("%Y-%m-%d"))
}

/// Format: `USER#<owner>#STATUS#<status>`
pub fn status_index_partition(owner: &str, status: CertificationStatus) -> String {
    format!("{}#STATUS#{}", user_partition(owner), status.as_str())
}

/// Format: `USER#<owner>#CATEGORY#<category>`
pub fn category_index_partition(owner: &str, category: &str) -> String {
    format!("{}#CATEGORY#{category}", user_partition(owner))
}

pub fn certification_keys(record: &CertificationRecord) -> CertificationKeys {
    let index_sort_key = expiration_sort_key(record.expiration_date, &record.id);
    CertificationKeys {
        primary: certification_key(&record.owner, &record.id),
        by_status: IndexKey {
            pk: status_index_partition(&record.owner, record.status),
            sk: index_sort_key.clone(),
        },
        by_category: IndexKey {
            pk: category_index_partition(&record.owner, &record.category),
            sk: index_sort_key,
        },
    }
}

/// Prefix shared by every reminder of one certification.
pub fn reminder_prefix(certification_id: &str) -> String {
    format!("{REMINDER_PREFIX}{certification_id}#")
}

/// Format: `REMINDER#<certId>#D<offset, zero padded>`
pub fn reminder_sort_key(certification_id: &str, days_before_expiration: u32) -> String {
    format!(
        "{}D{days_before_expiration:03}",
        reminder_prefix(certification_id)
    )
}

pub fn reminder_keys(reminder: &ReminderEvent) -> ReminderKeys {
    let due = (!reminder.sent).then(|| IndexKey {
        pk: UNSENT_REMINDERS_PARTITION.to_string(),
        sk: format!(
            "{}#{}#{}",
            reminder.scheduled_for.format("%Y-%m-%d"),
            user_partition(&reminder.owner),
            reminder_sort_key(&reminder.certification_id, reminder.days_before_expiration)
        ),
    });
    ReminderKeys {
        primary: ItemKey {
            pk: user_partition(&reminder.owner),
            sk: reminder_sort_key(&reminder.certification_id, reminder.days_before_expiration),
        },
        due,
    }
}

/// Exclusive upper bound on due-index sort keys for reminders scheduled on or
/// before `date`.
pub fn due_on_or_before_bound(date: NaiveDate) -> String {
    let next = date.succ_opt().unwrap_or(date);
    next.format("%Y-%m-%d").to_string()
}

/// Format: `ANALYTICS#<yyyy-mm>`
pub fn analytics_key(owner: &str, month: &str) -> ItemKey {
    ItemKey {
        pk: user_partition(owner),
        sk: format!("{ANALYTICS_PREFIX}{month}"),
    }
}

pub fn profile_key(owner: &str) -> ItemKey {
    ItemKey {
        pk: user_partition(owner),
        sk: PROFILE_SORT_KEY.to_string(),
    }
}

/// Smallest string greater than every string starting with `prefix`,
/// for turning a begins-with query into a half-open range.
pub fn prefix_upper_bound(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.pop() {
        if last < 0x7f {
            bytes.push(last + 1);
            return String::from_utf8_lossy(&bytes).into_owned();
        }
    }
    String::from(char::MAX)
}

pub fn owner_from_partition(pk: &str) -> Option<&str> {
    pk.strip_prefix(USER_PREFIX)
        .filter(|owner| !owner.contains(KEY_SEPARATOR))
}
