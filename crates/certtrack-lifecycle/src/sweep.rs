use crate::notify::{Notifier, ReminderNotice};
use crate::{CertificationEngine, LifecycleError};
use certtrack_core::analytics::summarize;
use certtrack_core::reminders::disposition;
use certtrack_core::{CertificationRecord, Clock, ReminderDisposition, UserProfile};
use certtrack_storage::CertificationStore;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Counters from one sweep run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub owners_processed: usize,
    pub certifications_checked: usize,
    pub status_transitions: usize,
    pub summaries_written: usize,
    pub reminders_delivered: usize,
    pub reminders_failed: usize,
    pub reminders_skipped_late: usize,
    pub reminders_skipped_renewed: usize,
    pub orphan_reminders_removed: usize,
}

impl<C: Clock> CertificationEngine<C> {
    /// Periodic pass: persists status transitions, rewrites each owner's
    /// monthly summary, then delivers every due reminder. Safe to repeat;
    /// a reminder is only marked sent after its notice went out.
    pub fn sweep(
        &self,
        store: &(impl CertificationStore + ?Sized),
        notifier: &dyn Notifier,
    ) -> Result<SweepReport, LifecycleError> {
        let today = self.clock().today();
        let mut report = SweepReport::default();

        for owner in store.owners()? {
            let records = store.certifications(&owner)?;
            report.owners_processed += 1;
            report.certifications_checked += records.len();
            report.status_transitions += self.reconcile_statuses(store, &records)?;

            let summary = summarize(&owner, &records, today, self.resolver());
            store.put_analytics_summary(&summary)?;
            report.summaries_written += 1;
        }

        self.deliver_due_reminders(store, notifier, &mut report)?;

        info!(
            event = "sweep_finished",
            date = %today,
            owners = report.owners_processed,
            certifications = report.certifications_checked,
            transitions = report.status_transitions,
            delivered = report.reminders_delivered,
            failed = report.reminders_failed,
            skipped_late = report.reminders_skipped_late,
            skipped_renewed = report.reminders_skipped_renewed,
            orphans_removed = report.orphan_reminders_removed,
        );
        Ok(report)
    }

    fn reconcile_statuses(
        &self,
        store: &(impl CertificationStore + ?Sized),
        records: &[CertificationRecord],
    ) -> Result<usize, LifecycleError> {
        let today = self.clock().today();
        let mut transitions = 0;
        for record in records {
            let resolved = self.resolver().resolve_record(record, today);
            if resolved == record.status {
                continue;
            }
            let mut updated = record.clone();
            updated.status = resolved;
            updated.updated_at = self.clock().now();
            store.put_certification(&updated)?;
            transitions += 1;
            info!(
                event = "status_transition",
                owner = %record.owner,
                certification_id = %record.id,
                from = %record.status,
                to = %resolved,
            );
        }
        Ok(transitions)
    }

    fn deliver_due_reminders(
        &self,
        store: &(impl CertificationStore + ?Sized),
        notifier: &dyn Notifier,
        report: &mut SweepReport,
    ) -> Result<(), LifecycleError> {
        let today = self.clock().today();
        let config = self.config();
        let mut records: BTreeMap<(String, String), Option<CertificationRecord>> = BTreeMap::new();
        let mut profiles: BTreeMap<String, Option<UserProfile>> = BTreeMap::new();
        let mut cleared: BTreeSet<(String, String)> = BTreeSet::new();

        for reminder in store.due_reminders(today)? {
            let key = (reminder.owner.clone(), reminder.certification_id.clone());
            if cleared.contains(&key) {
                continue;
            }
            if !records.contains_key(&key) {
                let record = store.certification(&key.0, &key.1)?;
                records.insert(key.clone(), record);
            }
            let Some(Some(record)) = records.get_mut(&key) else {
                let removed = store.delete_reminders(&key.0, &key.1)?;
                report.orphan_reminders_removed += removed;
                warn!(
                    event = "orphan_reminders_removed",
                    owner = %key.0,
                    certification_id = %key.1,
                    removed,
                );
                cleared.insert(key);
                continue;
            };

            if record.is_renewed() {
                let removed = store.delete_reminders(&key.0, &key.1)?;
                report.reminders_skipped_renewed += removed;
                debug!(
                    event = "renewed_reminders_removed",
                    owner = %key.0,
                    certification_id = %key.1,
                    removed,
                );
                cleared.insert(key);
                continue;
            }

            match disposition(&reminder, today, config.late_reminders, config.late_grace_days) {
                ReminderDisposition::Deliver => {}
                ReminderDisposition::TooLate => {
                    report.reminders_skipped_late += 1;
                    debug!(
                        event = "reminder_skipped_late",
                        owner = %reminder.owner,
                        certification_id = %reminder.certification_id,
                        scheduled_for = %reminder.scheduled_for,
                    );
                    continue;
                }
                ReminderDisposition::NotYetDue | ReminderDisposition::AlreadySent => continue,
            }

            if !profiles.contains_key(&reminder.owner) {
                let profile = store.profile(&reminder.owner)?;
                profiles.insert(reminder.owner.clone(), profile);
            }
            let recipient = profiles.get(&reminder.owner).cloned().flatten();
            let notice = ReminderNotice::new(&reminder, record, recipient, today);

            if let Err(err) = notifier.deliver(&notice) {
                report.reminders_failed += 1;
                warn!(
                    event = "reminder_delivery_failed",
                    owner = %reminder.owner,
                    certification_id = %reminder.certification_id,
                    days_before_expiration = reminder.days_before_expiration,
                    error = %err,
                );
                continue;
            }

            let now = self.clock().now();
            if !store.mark_reminder_sent(&reminder, now)? {
                debug!(
                    event = "reminder_superseded",
                    owner = %reminder.owner,
                    certification_id = %reminder.certification_id,
                    days_before_expiration = reminder.days_before_expiration,
                );
                continue;
            }
            record.reminders_sent += 1;
            record.updated_at = now;
            store.put_certification(record)?;
            report.reminders_delivered += 1;
        }
        Ok(())
    }
}
