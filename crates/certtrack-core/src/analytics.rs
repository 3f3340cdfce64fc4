use crate::status::StatusResolver;
use crate::{CertificationRecord, CertificationStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Monthly rollup of a user's certifications. Always recomputed in full and
/// written over the previous summary for the same month.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub owner: String,
    /// `YYYY-MM`
    pub month: String,
    pub computed_on: NaiveDate,
    pub total_count: u64,
    pub active_count: u64,
    pub expiring_count: u64,
    pub expired_count: u64,
    #[serde(default)]
    pub renewed_count: u64,
    pub total_cost: f64,
    #[serde(default)]
    pub category_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub provider_counts: BTreeMap<String, u64>,
}

pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

pub fn summarize(
    owner: &str,
    records: &[CertificationRecord],
    today: NaiveDate,
    resolver: &StatusResolver,
) -> AnalyticsSummary {
    let mut summary = AnalyticsSummary {
        owner: owner.to_string(),
        month: month_key(today),
        computed_on: today,
        total_count: 0,
        active_count: 0,
        expiring_count: 0,
        expired_count: 0,
        renewed_count: 0,
        total_cost: 0.0,
        category_counts: BTreeMap::new(),
        provider_counts: BTreeMap::new(),
    };

    for record in records {
        summary.total_count += 1;
        match resolver.resolve_record(record, today) {
            CertificationStatus::Active => summary.active_count += 1,
            CertificationStatus::Expiring => summary.expiring_count += 1,
            CertificationStatus::Expired => summary.expired_count += 1,
            CertificationStatus::Renewed => summary.renewed_count += 1,
        }
        summary.total_cost += record.cost_or_zero();
        *summary
            .category_counts
            .entry(record.category.clone())
            .or_insert(0) += 1;
        *summary
            .provider_counts
            .entry(record.provider.clone())
            .or_insert(0) += 1;
    }

    summary
}
