use certtrack_core::{
    CertificationStatus, CertificationUpdate, EngineConfig, FixedClock, LateReminderPolicy,
    NewCertification, ReminderEvent, UserProfile,
};
use certtrack_lifecycle::{
    CertificationEngine, Notifier, NotifyError, Renewal, ReminderNotice, SweepReport,
};
use certtrack_storage::{CertificationStore, SqliteStore};
use chrono::NaiveDate;
use std::cell::RefCell;

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

fn engine_with(config: EngineConfig, today: &str) -> CertificationEngine<FixedClock> {
    CertificationEngine::new(config, FixedClock::on(date(today))).expect("engine")
}

fn engine_on(today: &str) -> CertificationEngine<FixedClock> {
    engine_with(EngineConfig::default(), today)
}

fn seed(store: &SqliteStore, owner: &str, id: &str, expiration: &str) {
    engine_on("2024-06-01")
        .create_with_id(
            store,
            owner,
            id,
            NewCertification {
                name: "Security+".to_string(),
                provider: "CompTIA".to_string(),
                issue_date: Some(date("2021-12-31")),
                expiration_date: Some(date(expiration)),
                ..NewCertification::default()
            },
        )
        .expect("seed certification");
}

#[derive(Default)]
struct RecordingNotifier {
    notices: RefCell<Vec<ReminderNotice>>,
}

impl Notifier for RecordingNotifier {
    fn deliver(&self, notice: &ReminderNotice) -> Result<(), NotifyError> {
        self.notices.borrow_mut().push(notice.clone());
        Ok(())
    }
}

struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn deliver(&self, _notice: &ReminderNotice) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("mail relay unavailable".to_string()))
    }
}

fn sent_offsets(store: &SqliteStore, owner: &str, id: &str) -> Vec<u32> {
    store
        .reminders(owner, id)
        .expect("reminders")
        .into_iter()
        .filter(|reminder| reminder.sent)
        .map(|reminder| reminder.days_before_expiration)
        .collect()
}

#[test]
fn sweep_delivers_due_reminders_once() {
    let store = SqliteStore::open_in_memory().expect("store");
    seed(&store, "user-1", "cert-1", "2024-12-31");
    store
        .put_profile(&UserProfile {
            user_id: "user-1".to_string(),
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
        })
        .expect("profile");

    let engine = engine_on("2024-11-01");
    let notifier = RecordingNotifier::default();
    let report = engine.sweep(&store, &notifier).expect("sweep");

    assert_eq!(report.reminders_delivered, 2);
    assert_eq!(report.status_transitions, 0);
    assert_eq!(report.owners_processed, 1);
    assert_eq!(report.summaries_written, 1);

    let notices = notifier.notices.borrow();
    let offsets = notices
        .iter()
        .map(|notice| notice.days_before_expiration)
        .collect::<Vec<_>>();
    assert_eq!(offsets, vec![90, 60]);
    assert_eq!(notices[1].subject(), "Security+ expires in 60 days");
    assert_eq!(
        notices[0].recipient.as_ref().map(|profile| profile.email.as_str()),
        Some("ada@example.com")
    );
    drop(notices);

    let record = store
        .certification("user-1", "cert-1")
        .expect("load")
        .expect("record present");
    assert_eq!(record.reminders_sent, 2);
    let mut sent = sent_offsets(&store, "user-1", "cert-1");
    sent.sort();
    assert_eq!(sent, vec![60, 90]);

    let again = engine.sweep(&store, &notifier).expect("second sweep");
    assert_eq!(again.reminders_delivered, 0);
    assert_eq!(notifier.notices.borrow().len(), 2);
}

#[test]
fn sweep_persists_status_transitions_and_summary() {
    let store = SqliteStore::open_in_memory().expect("store");
    seed(&store, "user-1", "cert-1", "2024-12-31");
    seed(&store, "user-1", "cert-2", "2024-06-15");

    let engine = engine_on("2024-12-05");
    let notifier = RecordingNotifier::default();
    let report = engine.sweep(&store, &notifier).expect("sweep");

    assert_eq!(report.certifications_checked, 2);
    assert_eq!(report.status_transitions, 2);
    assert_eq!(report.reminders_delivered, 6);

    let first = store
        .certification("user-1", "cert-1")
        .expect("load")
        .expect("present");
    assert_eq!(first.status, CertificationStatus::Expiring);
    let second = store
        .certification("user-1", "cert-2")
        .expect("load")
        .expect("present");
    assert_eq!(second.status, CertificationStatus::Expired);

    let expired = store
        .certifications_by_status("user-1", CertificationStatus::Expired, None)
        .expect("status index");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, "cert-2");

    let summary = store
        .analytics_summary("user-1", "2024-12")
        .expect("load summary")
        .expect("summary present");
    assert_eq!(summary.expiring_count, 1);
    assert_eq!(summary.expired_count, 1);

    let quiet = engine.sweep(&store, &notifier).expect("second sweep");
    assert_eq!(quiet.status_transitions, 0);
    assert_eq!(quiet.reminders_delivered, 0);
}

#[test]
fn skip_policy_leaves_stale_reminders_undelivered() {
    let store = SqliteStore::open_in_memory().expect("store");
    seed(&store, "user-1", "cert-1", "2024-12-31");

    let config = EngineConfig {
        late_reminders: LateReminderPolicy::Skip,
        late_grace_days: 3,
        ..EngineConfig::default()
    };
    let engine = engine_with(config, "2024-11-02");
    let notifier = RecordingNotifier::default();
    let report = engine.sweep(&store, &notifier).expect("sweep");

    assert_eq!(report.reminders_delivered, 1);
    assert_eq!(report.reminders_skipped_late, 1);
    assert_eq!(sent_offsets(&store, "user-1", "cert-1"), vec![60]);
}

#[test]
fn failed_delivery_is_retried_on_the_next_sweep() {
    let store = SqliteStore::open_in_memory().expect("store");
    seed(&store, "user-1", "cert-1", "2024-12-31");
    let engine = engine_on("2024-11-01");

    let failed = engine.sweep(&store, &FailingNotifier).expect("sweep");
    assert_eq!(failed.reminders_failed, 2);
    assert_eq!(failed.reminders_delivered, 0);
    assert!(sent_offsets(&store, "user-1", "cert-1").is_empty());
    assert_eq!(
        store
            .certification("user-1", "cert-1")
            .expect("load")
            .expect("present")
            .reminders_sent,
        0
    );

    let notifier = RecordingNotifier::default();
    let retried = engine.sweep(&store, &notifier).expect("retry sweep");
    assert_eq!(retried.reminders_delivered, 2);
}

#[test]
fn orphaned_and_renewed_reminders_are_cleared() {
    let store = SqliteStore::open_in_memory().expect("store");
    seed(&store, "user-1", "cert-1", "2024-12-31");
    store
        .put_reminders(&[ReminderEvent {
            certification_id: "ghost".to_string(),
            owner: "user-1".to_string(),
            days_before_expiration: 30,
            scheduled_for: date("2024-10-01"),
            sent: false,
            sent_at: None,
        }])
        .expect("orphan reminder");

    let renewing = engine_on("2024-10-15");
    let outcome = renewing
        .renew(
            &store,
            "user-1",
            "cert-1",
            Renewal {
                expiration_date: Some(date("2027-12-31")),
                ..Renewal::default()
            },
        )
        .expect("renew");
    store
        .put_reminders(&[ReminderEvent {
            certification_id: "cert-1".to_string(),
            owner: "user-1".to_string(),
            days_before_expiration: 90,
            scheduled_for: date("2024-10-02"),
            sent: false,
            sent_at: None,
        }])
        .expect("stale reminder");

    let notifier = RecordingNotifier::default();
    let report = renewing.sweep(&store, &notifier).expect("sweep");

    assert_eq!(
        report,
        SweepReport {
            owners_processed: 1,
            certifications_checked: 2,
            status_transitions: 0,
            summaries_written: 1,
            reminders_delivered: 0,
            reminders_failed: 0,
            reminders_skipped_late: 0,
            reminders_skipped_renewed: 1,
            orphan_reminders_removed: 1,
        }
    );
    assert!(notifier.notices.borrow().is_empty());
    assert!(store.reminders("user-1", "ghost").expect("reminders").is_empty());
    assert!(store.reminders("user-1", "cert-1").expect("reminders").is_empty());
    assert_eq!(
        store
            .reminders("user-1", &outcome.successor.record.id)
            .expect("reminders")
            .len(),
        3
    );
}

#[test]
fn moved_expiration_drops_previously_due_reminders() {
    let store = SqliteStore::open_in_memory().expect("store");
    seed(&store, "user-1", "cert-1", "2024-12-31");

    let engine = engine_on("2024-11-01");
    engine
        .update(
            &store,
            "user-1",
            "cert-1",
            vec![CertificationUpdate::SetExpirationDate(date("2025-12-31"))],
        )
        .expect("push expiration out");

    let notifier = RecordingNotifier::default();
    let report = engine.sweep(&store, &notifier).expect("sweep");
    assert_eq!(report.reminders_delivered, 0);
    assert!(sent_offsets(&store, "user-1", "cert-1").is_empty());
}

#[test]
fn unchanged_schedule_is_not_delivered_twice() {
    let store = SqliteStore::open_in_memory().expect("store");
    seed(&store, "user-1", "cert-1", "2024-12-31");

    let engine = engine_on("2024-11-05");
    let notifier = RecordingNotifier::default();
    let first = engine.sweep(&store, &notifier).expect("first sweep");
    assert_eq!(first.reminders_delivered, 2);

    let written = engine
        .update(
            &store,
            "user-1",
            "cert-1",
            vec![CertificationUpdate::SetExpirationDate(date("2024-12-31"))],
        )
        .expect("same-date edit");
    let carried = written
        .reminders
        .expect("regenerated")
        .iter()
        .filter(|reminder| reminder.sent)
        .count();
    assert_eq!(carried, 2);

    engine
        .regenerate_reminders(&store, &written.record)
        .expect("explicit regeneration");

    let second = engine.sweep(&store, &notifier).expect("second sweep");
    assert_eq!(second.reminders_delivered, 0);
    assert_eq!(notifier.notices.borrow().len(), 2);
    assert_eq!(
        store
            .certification("user-1", "cert-1")
            .expect("load")
            .expect("present")
            .reminders_sent,
        2
    );
}
