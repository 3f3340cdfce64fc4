use crate::status::StatusResolver;
use crate::{CertificationRecord, CertificationStatus};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpirationBucket {
    Next30Days,
    Days31To60,
    Days61To90,
    Beyond90Days,
}

impl ExpirationBucket {
    /// Strict lower bound, inclusive upper bound. Nothing expiring today or
    /// earlier lands in a bucket.
    pub fn for_expiration(today: NaiveDate, expiration_date: NaiveDate) -> Option<Self> {
        let days_left = (expiration_date - today).num_days();
        match days_left {
            i64::MIN..=0 => None,
            1..=30 => Some(ExpirationBucket::Next30Days),
            31..=60 => Some(ExpirationBucket::Days31To60),
            61..=90 => Some(ExpirationBucket::Days61To90),
            _ => Some(ExpirationBucket::Beyond90Days),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationBuckets {
    pub next_30_days: u64,
    pub days_31_to_60: u64,
    pub days_61_to_90: u64,
    pub beyond_90_days: u64,
}

impl ExpirationBuckets {
    fn add(&mut self, bucket: ExpirationBucket) {
        match bucket {
            ExpirationBucket::Next30Days => self.next_30_days += 1,
            ExpirationBucket::Days31To60 => self.days_31_to_60 += 1,
            ExpirationBucket::Days61To90 => self.days_61_to_90 += 1,
            ExpirationBucket::Beyond90Days => self.beyond_90_days += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.next_30_days + self.days_31_to_60 + self.days_61_to_90 + self.beyond_90_days
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingExpiration {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub expiration_date: NaiveDate,
    pub days_remaining: i64,
    pub status: CertificationStatus,
}

/// Live statistics computed on read; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub as_of: NaiveDate,
    pub total_count: u64,
    pub active_count: u64,
    pub expiring_count: u64,
    pub expired_count: u64,
    pub renewed_count: u64,
    pub expiring_soon: ExpirationBuckets,
    pub renewed_this_year: u64,
    pub total_cost: f64,
    pub average_certification_value: f64,
    pub cost_by_category: BTreeMap<String, f64>,
    pub category_counts: BTreeMap<String, u64>,
    pub provider_counts: BTreeMap<String, u64>,
    pub upcoming_expirations: Vec<UpcomingExpiration>,
}

/// Buckets cover in-force records only (resolved active or expiring).
/// "Renewed this year" keys off the issue date.
pub fn compute(
    records: &[CertificationRecord],
    today: NaiveDate,
    resolver: &StatusResolver,
    upcoming_limit: usize,
) -> DashboardStats {
    let mut stats = DashboardStats {
        as_of: today,
        total_count: 0,
        active_count: 0,
        expiring_count: 0,
        expired_count: 0,
        renewed_count: 0,
        expiring_soon: ExpirationBuckets::default(),
        renewed_this_year: 0,
        total_cost: 0.0,
        average_certification_value: 0.0,
        cost_by_category: BTreeMap::new(),
        category_counts: BTreeMap::new(),
        provider_counts: BTreeMap::new(),
        upcoming_expirations: Vec::new(),
    };
    let mut upcoming = Vec::new();

    for record in records {
        let status = resolver.resolve_record(record, today);
        stats.total_count += 1;
        match status {
            CertificationStatus::Active => stats.active_count += 1,
            CertificationStatus::Expiring => stats.expiring_count += 1,
            CertificationStatus::Expired => stats.expired_count += 1,
            CertificationStatus::Renewed => {
                stats.renewed_count += 1;
                if record.issue_date.year() == today.year() {
                    stats.renewed_this_year += 1;
                }
            }
        }

        if status.is_in_force() {
            if let Some(bucket) = ExpirationBucket::for_expiration(today, record.expiration_date)
            {
                stats.expiring_soon.add(bucket);
            }
            upcoming.push(UpcomingExpiration {
                id: record.id.clone(),
                name: record.name.clone(),
                provider: record.provider.clone(),
                expiration_date: record.expiration_date,
                days_remaining: record.days_until_expiration(today),
                status,
            });
        }

        let cost = record.cost_or_zero();
        stats.total_cost += cost;
        *stats
            .cost_by_category
            .entry(record.category.clone())
            .or_insert(0.0) += cost;
        *stats
            .category_counts
            .entry(record.category.clone())
            .or_insert(0) += 1;
        *stats
            .provider_counts
            .entry(record.provider.clone())
            .or_insert(0) += 1;
    }

    if stats.total_count > 0 {
        stats.average_certification_value = stats.total_cost / stats.total_count as f64;
    }

    upcoming.sort_by(|a, b| {
        a.expiration_date
            .cmp(&b.expiration_date)
            .then_with(|| a.id.cmp(&b.id))
    });
    upcoming.truncate(upcoming_limit);
    stats.upcoming_expirations = upcoming;

    stats
}
