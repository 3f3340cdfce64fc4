use crate::{CertificationRecord, CertificationStatus, StatusOverride};
use chrono::NaiveDate;

pub const DEFAULT_EXPIRING_WINDOW_DAYS: u32 = 30;

/// Derives a certification's lifecycle status from its dates.
///
/// The stored `status` on a record is only a cache of the last evaluation;
/// callers re-run the resolver whenever "today" moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResolver {
    expiring_window_days: u32,
}

impl Default for StatusResolver {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRING_WINDOW_DAYS)
    }
}

impl StatusResolver {
    pub fn new(expiring_window_days: u32) -> Self {
        Self {
            expiring_window_days,
        }
    }

    pub fn expiring_window_days(&self) -> u32 {
        self.expiring_window_days
    }

    pub fn resolve(
        &self,
        today: NaiveDate,
        issue_date: NaiveDate,
        expiration_date: NaiveDate,
        status_override: Option<StatusOverride>,
    ) -> CertificationStatus {
        resolve_status(
            today,
            issue_date,
            expiration_date,
            status_override,
            self.expiring_window_days,
        )
    }

    pub fn resolve_record(
        &self,
        record: &CertificationRecord,
        today: NaiveDate,
    ) -> CertificationStatus {
        self.resolve(
            today,
            record.issue_date,
            record.expiration_date,
            record.status_override,
        )
    }
}

/// An override always wins. Otherwise: expired strictly after the expiration
/// date, expiring while `days left <= window`, active beyond that. The issue
/// date takes no part in the decision.
pub fn resolve_status(
    today: NaiveDate,
    _issue_date: NaiveDate,
    expiration_date: NaiveDate,
    status_override: Option<StatusOverride>,
    expiring_window_days: u32,
) -> CertificationStatus {
    if let Some(status_override) = status_override {
        return status_override.as_status();
    }
    if expiration_date < today {
        return CertificationStatus::Expired;
    }
    let days_left = (expiration_date - today).num_days();
    if days_left <= i64::from(expiring_window_days) {
        CertificationStatus::Expiring
    } else {
        CertificationStatus::Active
    }
}
