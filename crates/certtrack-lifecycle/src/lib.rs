use certtrack_core::analytics::summarize;
use certtrack_core::reminders::carry_sent_state;
use certtrack_core::dashboard;
use certtrack_core::update::apply_updates;
use certtrack_core::{
    AnalyticsSummary, CertificationRecord, CertificationStatus, CertificationUpdate, Clock,
    DashboardStats, EngineConfig, NewCertification, ReminderEvent, ReminderScheduler,
    StatusOverride, StatusResolver, ValidationError,
};
use certtrack_storage::{CertificationStore, StorageError};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub mod notify;
pub mod sweep;

pub use notify::{LogNotifier, Notifier, NotifyError, ReminderNotice};
pub use sweep::SweepReport;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("certification {id} not found for owner {owner}")]
    NotFound { owner: String, id: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A persisted certification together with the reminder set written for it,
/// when the write touched reminders.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificationWrite {
    pub record: CertificationRecord,
    pub reminders: Option<Vec<ReminderEvent>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Renewal {
    pub issue_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub cost: Option<f64>,
    pub document_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenewalOutcome {
    pub previous: CertificationRecord,
    pub successor: CertificationWrite,
}

pub struct CertificationEngine<C: Clock> {
    config: EngineConfig,
    resolver: StatusResolver,
    scheduler: ReminderScheduler,
    clock: C,
}

impl<C: Clock> CertificationEngine<C> {
    pub fn new(config: EngineConfig, clock: C) -> Result<Self, LifecycleError> {
        config.validate()?;
        let scheduler = config.reminder_scheduler()?;
        Ok(Self {
            resolver: config.status_resolver(),
            scheduler,
            config,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn create(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        new: NewCertification,
    ) -> Result<CertificationWrite, LifecycleError> {
        let id = Uuid::new_v4().to_string();
        self.create_with_id(store, owner, &id, new)
    }

    /// Caller-chosen id. Re-running with an existing id rewrites the submitted
    /// fields but keeps `createdAt`, the sent counter and any override, and
    /// reminders already delivered stay delivered.
    pub fn create_with_id(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        id: &str,
        new: NewCertification,
    ) -> Result<CertificationWrite, LifecycleError> {
        let record = new.into_record(owner, id, self.clock.now())?;
        let record = self.merge_existing(store, record)?;

        store.put_certification(&record)?;
        let reminders = self.regenerate_reminders(store, &record)?;
        self.refresh_analytics(store, owner)?;

        info!(
            event = "certification_created",
            owner,
            certification_id = %record.id,
            status = %record.status,
            expiration_date = %record.expiration_date,
        );
        Ok(CertificationWrite {
            record,
            reminders: Some(reminders),
        })
    }

    /// Status is re-resolved for the current day; the stored copy is untouched.
    pub fn get(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        id: &str,
    ) -> Result<CertificationRecord, LifecycleError> {
        let mut record = self.load(store, owner, id)?;
        record.status = self.resolver.resolve_record(&record, self.clock.today());
        Ok(record)
    }

    /// Ordered by expiration date.
    pub fn list(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
    ) -> Result<Vec<CertificationRecord>, LifecycleError> {
        let records = store.certifications(owner)?;
        Ok(self.with_fresh_status(records))
    }

    pub fn update(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        id: &str,
        updates: Vec<CertificationUpdate>,
    ) -> Result<CertificationWrite, LifecycleError> {
        let current = self.load(store, owner, id)?;
        let fields = updates.iter().map(|update| update.field()).collect::<Vec<_>>();
        let applied = apply_updates(&current, updates, self.clock.now())?;
        let mut record = applied.record;
        record.status = self.resolver.resolve_record(&record, self.clock.today());

        store.put_certification(&record)?;
        let reminders = if applied.regenerate_reminders {
            Some(self.regenerate_reminders(store, &record)?)
        } else {
            None
        };
        self.refresh_analytics(store, owner)?;

        info!(
            event = "certification_updated",
            owner,
            certification_id = id,
            fields = ?fields,
            status = %record.status,
            reminders_regenerated = reminders.is_some(),
        );
        Ok(CertificationWrite { record, reminders })
    }

    /// Marks the record renewed, drops its reminders and writes a successor
    /// carrying the new dates. The successor's issue date defaults to today.
    ///
    /// The successor id is derived from the renewed record, so retrying after
    /// a partial failure rewrites the same successor instead of adding one.
    pub fn renew(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        id: &str,
        renewal: Renewal,
    ) -> Result<RenewalOutcome, LifecycleError> {
        let current = self.load(store, owner, id)?;
        let successor_id = successor_id(owner, id);
        let now = self.clock.now();
        let today = self.clock.today();

        let successor = NewCertification {
            name: current.name.clone(),
            provider: current.provider.clone(),
            category: Some(current.category.clone()),
            issue_date: Some(renewal.issue_date.unwrap_or(today)),
            expiration_date: renewal.expiration_date,
            cost: renewal.cost,
            tags: current.tags.iter().cloned().collect(),
            document_url: renewal.document_url,
        }
        .into_record(owner, &successor_id, now)?;
        let successor = self.merge_existing(store, successor)?;

        let applied = apply_updates(
            &current,
            vec![CertificationUpdate::SetStatusOverride(Some(
                StatusOverride::Renewed,
            ))],
            now,
        )?;
        let mut previous = applied.record;
        previous.status = self.resolver.resolve_record(&previous, today);

        store.put_certification(&successor)?;
        let reminders = self.regenerate_reminders(store, &successor)?;
        store.put_certification(&previous)?;
        self.regenerate_reminders(store, &previous)?;
        self.refresh_analytics(store, owner)?;

        info!(
            event = "certification_renewed",
            owner,
            certification_id = id,
            successor_id = %successor.id,
            expiration_date = %successor.expiration_date,
        );
        Ok(RenewalOutcome {
            previous,
            successor: CertificationWrite {
                record: successor,
                reminders: Some(reminders),
            },
        })
    }

    /// Reminders go first so a half-finished delete never leaves reminders
    /// pointing at nothing.
    pub fn delete(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        id: &str,
    ) -> Result<CertificationRecord, LifecycleError> {
        let record = self.load(store, owner, id)?;
        let removed_reminders = store.delete_reminders(owner, id)?;
        store.delete_certification(owner, id)?;
        self.refresh_analytics(store, owner)?;

        info!(
            event = "certification_deleted",
            owner,
            certification_id = id,
            removed_reminders,
        );
        Ok(record)
    }

    /// Re-derives the full reminder set from the record and the stored
    /// reminders, so repeating it after a partial failure converges on the
    /// same rows. Reminders whose offset and date are unchanged keep their
    /// delivered state.
    pub fn regenerate_reminders(
        &self,
        store: &(impl CertificationStore + ?Sized),
        record: &CertificationRecord,
    ) -> Result<Vec<ReminderEvent>, LifecycleError> {
        let mut reminders = self.scheduler.schedule_for(record);
        let stored = store.reminders(&record.owner, &record.id)?;
        let carried = carry_sent_state(&mut reminders, &stored);
        store.replace_reminders(&record.owner, &record.id, &reminders)?;
        debug!(
            event = "reminders_regenerated",
            owner = %record.owner,
            certification_id = %record.id,
            count = reminders.len(),
            already_sent = carried,
        );
        Ok(reminders)
    }

    pub fn reminders(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        id: &str,
    ) -> Result<Vec<ReminderEvent>, LifecycleError> {
        self.load(store, owner, id)?;
        Ok(store.reminders(owner, id)?)
    }

    /// Recomputes this month's summary from scratch and overwrites it.
    pub fn refresh_analytics(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
    ) -> Result<AnalyticsSummary, LifecycleError> {
        let records = store.certifications(owner)?;
        let summary = summarize(owner, &records, self.clock.today(), &self.resolver);
        store.put_analytics_summary(&summary)?;
        Ok(summary)
    }

    pub fn dashboard(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
    ) -> Result<DashboardStats, LifecycleError> {
        let records = store.certifications(owner)?;
        Ok(dashboard::compute(
            &records,
            self.clock.today(),
            &self.resolver,
            self.config.upcoming_limit,
        ))
    }

    /// In-force records expiring strictly before `date`. The status index is
    /// only a cache, so candidates are re-resolved before filtering.
    pub fn expiring_before(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        date: NaiveDate,
    ) -> Result<Vec<CertificationRecord>, LifecycleError> {
        let mut candidates = BTreeMap::new();
        for status in [
            CertificationStatus::Active,
            CertificationStatus::Expiring,
        ] {
            for record in store.certifications_by_status(owner, status, Some(date))? {
                candidates.insert(record.id.clone(), record);
            }
        }
        Ok(self
            .with_fresh_status(candidates.into_values().collect())
            .into_iter()
            .filter(|record| record.status.is_in_force())
            .collect())
    }

    pub fn by_category(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        category: &str,
        expiring_before: Option<NaiveDate>,
    ) -> Result<Vec<CertificationRecord>, LifecycleError> {
        let records = store.certifications_by_category(owner, category, expiring_before)?;
        Ok(self.with_fresh_status(records))
    }

    pub(crate) fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }

    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }

    fn load(
        &self,
        store: &(impl CertificationStore + ?Sized),
        owner: &str,
        id: &str,
    ) -> Result<CertificationRecord, LifecycleError> {
        store
            .certification(owner, id)?
            .ok_or_else(|| LifecycleError::NotFound {
                owner: owner.to_string(),
                id: id.to_string(),
            })
    }

    fn merge_existing(
        &self,
        store: &(impl CertificationStore + ?Sized),
        mut record: CertificationRecord,
    ) -> Result<CertificationRecord, LifecycleError> {
        if let Some(existing) = store.certification(&record.owner, &record.id)? {
            record.created_at = existing.created_at;
            record.reminders_sent = record.reminders_sent.max(existing.reminders_sent);
            record.status_override = record.status_override.or(existing.status_override);
        }
        record.status = self.resolver.resolve_record(&record, self.clock.today());
        Ok(record)
    }

    fn with_fresh_status(&self, mut records: Vec<CertificationRecord>) -> Vec<CertificationRecord> {
        let today = self.clock.today();
        for record in &mut records {
            record.status = self.resolver.resolve_record(record, today);
        }
        records.sort_by(|a, b| {
            a.expiration_date
                .cmp(&b.expiration_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }
}

fn successor_id(owner: &str, id: &str) -> String {
    let name = format!("certtrack:{owner}/{id}/renewal");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}
