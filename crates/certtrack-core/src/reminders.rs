use crate::validation::{validate_reminder_offsets, ValidationError};
use crate::{CertificationRecord, ReminderEvent};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REMINDER_OFFSETS: [u32; 3] = [30, 60, 90];

/// What to do with a reminder whose scheduled date has already passed when
/// the delivery poll sees it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LateReminderPolicy {
    /// Deliver on the next poll regardless of lateness.
    Deliver,
    /// Leave undelivered once more than the grace period late.
    Skip,
}

impl Default for LateReminderPolicy {
    fn default() -> Self {
        Self::Deliver
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderDisposition {
    Deliver,
    NotYetDue,
    AlreadySent,
    TooLate,
}

/// Produces one reminder per configured offset before expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderScheduler {
    offsets: Vec<u32>,
}

impl Default for ReminderScheduler {
    fn default() -> Self {
        Self {
            offsets: DEFAULT_REMINDER_OFFSETS.to_vec(),
        }
    }
}

impl ReminderScheduler {
    pub fn new(offsets: impl IntoIterator<Item = u32>) -> Result<Self, ValidationError> {
        let mut offsets = offsets.into_iter().collect::<Vec<_>>();
        validate_reminder_offsets(&offsets)?;
        offsets.sort_unstable();
        Ok(Self { offsets })
    }

    /// Ascending.
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// No clamping: reminders may land in the past.
    pub fn schedule(
        &self,
        owner: &str,
        certification_id: &str,
        expiration_date: NaiveDate,
    ) -> Vec<ReminderEvent> {
        self.offsets
            .iter()
            .map(|offset| ReminderEvent {
                certification_id: certification_id.to_string(),
                owner: owner.to_string(),
                days_before_expiration: *offset,
                scheduled_for: scheduled_for(expiration_date, *offset),
                sent: false,
                sent_at: None,
            })
            .collect()
    }

    /// Renewed certifications are superseded and get no reminders.
    pub fn schedule_for(&self, record: &CertificationRecord) -> Vec<ReminderEvent> {
        if record.is_renewed() {
            return Vec::new();
        }
        self.schedule(&record.owner, &record.id, record.expiration_date)
    }
}

/// Past dates are kept as is. The only saturation is at `NaiveDate::MIN`,
/// which no real expiration date comes near.
pub fn scheduled_for(expiration_date: NaiveDate, days_before_expiration: u32) -> NaiveDate {
    expiration_date
        .checked_sub_days(Days::new(u64::from(days_before_expiration)))
        .unwrap_or(NaiveDate::MIN)
}

/// Copies the delivered state of `stored` onto every regenerated reminder
/// with the same offset and date, so regeneration never re-arms a notice
/// that already went out. Returns how many were carried over.
pub fn carry_sent_state(regenerated: &mut [ReminderEvent], stored: &[ReminderEvent]) -> usize {
    let mut carried = 0;
    for reminder in regenerated.iter_mut() {
        let delivered = stored.iter().find(|previous| {
            previous.sent
                && previous.days_before_expiration == reminder.days_before_expiration
                && previous.scheduled_for == reminder.scheduled_for
        });
        if let Some(previous) = delivered {
            reminder.sent = true;
            reminder.sent_at = previous.sent_at;
            carried += 1;
        }
    }
    carried
}

/// Unsent reminders whose scheduled date is on or before `today`, in input order.
pub fn due_on(reminders: &[ReminderEvent], today: NaiveDate) -> Vec<&ReminderEvent> {
    reminders
        .iter()
        .filter(|reminder| reminder.is_due(today))
        .collect()
}

pub fn disposition(
    reminder: &ReminderEvent,
    today: NaiveDate,
    policy: LateReminderPolicy,
    grace_days: u32,
) -> ReminderDisposition {
    if reminder.sent {
        return ReminderDisposition::AlreadySent;
    }
    if reminder.scheduled_for > today {
        return ReminderDisposition::NotYetDue;
    }
    match policy {
        LateReminderPolicy::Deliver => ReminderDisposition::Deliver,
        LateReminderPolicy::Skip => {
            let days_late = (today - reminder.scheduled_for).num_days();
            if days_late > i64::from(grace_days) {
                ReminderDisposition::TooLate
            } else {
                ReminderDisposition::Deliver
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    #[test]
    fn default_offsets_schedule_expected_dates() {
        let reminders =
            ReminderScheduler::default().schedule("user-1", "cert-1", date("2024-12-31"));

        let scheduled = reminders
            .iter()
            .map(|reminder| (reminder.days_before_expiration, reminder.scheduled_for))
            .collect::<Vec<_>>();
        assert_eq!(
            scheduled,
            vec![
                (30, date("2024-12-01")),
                (60, date("2024-11-01")),
                (90, date("2024-10-02")),
            ]
        );
        assert!(reminders.iter().all(|reminder| !reminder.sent));
    }

    #[test]
    fn offsets_are_unique_for_any_expiration() {
        let scheduler = ReminderScheduler::default();
        let mut expiration = date("2024-01-01");
        for _ in 0..400 {
            let reminders = scheduler.schedule("u", "c", expiration);
            assert_eq!(reminders.len(), 3);
            let offsets = reminders
                .iter()
                .map(|reminder| reminder.days_before_expiration)
                .collect::<BTreeSet<_>>();
            assert_eq!(offsets.len(), 3);
            for reminder in &reminders {
                assert_eq!(
                    (expiration - reminder.scheduled_for).num_days(),
                    i64::from(reminder.days_before_expiration)
                );
            }
            expiration = expiration.succ_opt().expect("next day");
        }
    }

    #[test]
    fn custom_offsets_are_sorted_and_validated() {
        let scheduler = ReminderScheduler::new([90, 7, 30]).expect("valid offsets");
        assert_eq!(scheduler.offsets(), &[7, 30, 90]);
        assert!(ReminderScheduler::new([]).is_err());
        assert!(ReminderScheduler::new([30, 30]).is_err());
    }

    #[test]
    fn past_reminders_are_not_clamped() {
        let reminders = ReminderScheduler::default().schedule("u", "c", date("2024-01-10"));
        assert_eq!(reminders[2].scheduled_for, date("2023-10-12"));
    }

    #[test]
    fn due_on_skips_future_and_sent_reminders() {
        let mut reminders =
            ReminderScheduler::default().schedule("u", "c", date("2024-12-31"));
        reminders[2].mark_sent(
            date("2024-10-02")
                .and_hms_opt(9, 0, 0)
                .expect("valid time")
                .and_utc(),
        );

        let due = due_on(&reminders, date("2024-11-01"));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].days_before_expiration, 60);
        assert!(due_on(&reminders, date("2024-10-01")).is_empty());
    }

    #[test]
    fn saturates_only_at_the_calendar_floor() {
        let floor = NaiveDate::MIN
            .checked_add_days(Days::new(10))
            .expect("date after floor");
        assert_eq!(scheduled_for(floor, 30), NaiveDate::MIN);
        assert_eq!(scheduled_for(floor, 10), NaiveDate::MIN);
        assert_eq!(scheduled_for(floor, 5), floor - Days::new(5));
    }

    #[test]
    fn sent_state_survives_regeneration_for_unchanged_dates() {
        let scheduler = ReminderScheduler::default();
        let sent_at = date("2024-11-01")
            .and_hms_opt(9, 0, 0)
            .expect("valid time")
            .and_utc();
        let mut stored = scheduler.schedule("u", "c", date("2024-12-31"));
        stored[1].mark_sent(sent_at);
        stored[2].mark_sent(sent_at);

        let mut same = scheduler.schedule("u", "c", date("2024-12-31"));
        assert_eq!(carry_sent_state(&mut same, &stored), 2);
        assert_eq!(same, stored);

        let mut moved = scheduler.schedule("u", "c", date("2025-06-30"));
        assert_eq!(carry_sent_state(&mut moved, &stored), 0);
        assert!(moved.iter().all(|reminder| !reminder.sent));
    }

    #[test]
    fn late_policy_controls_delivery() {
        let reminder = ReminderEvent {
            certification_id: "c".to_string(),
            owner: "u".to_string(),
            days_before_expiration: 30,
            scheduled_for: date("2024-03-01"),
            sent: false,
            sent_at: None,
        };

        assert_eq!(
            disposition(&reminder, date("2024-02-29"), LateReminderPolicy::Deliver, 0),
            ReminderDisposition::NotYetDue
        );
        assert_eq!(
            disposition(&reminder, date("2024-04-01"), LateReminderPolicy::Deliver, 0),
            ReminderDisposition::Deliver
        );
        assert_eq!(
            disposition(&reminder, date("2024-03-03"), LateReminderPolicy::Skip, 2),
            ReminderDisposition::Deliver
        );
        assert_eq!(
            disposition(&reminder, date("2024-03-04"), LateReminderPolicy::Skip, 2),
            ReminderDisposition::TooLate
        );

        let mut sent = reminder.clone();
        sent.sent = true;
        assert_eq!(
            disposition(&sent, date("2024-04-01"), LateReminderPolicy::Deliver, 0),
            ReminderDisposition::AlreadySent
        );
    }
}
