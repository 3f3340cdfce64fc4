use certtrack_core::{CertificationRecord, ReminderEvent, UserProfile};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("no recipient for owner {0}")]
    MissingRecipient(String),
}

/// Delivery side of the reminder sweep. A failed delivery leaves the
/// reminder unsent so the next sweep retries it.
pub trait Notifier {
    fn deliver(&self, notice: &ReminderNotice) -> Result<(), NotifyError>;
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn deliver(&self, notice: &ReminderNotice) -> Result<(), NotifyError> {
        (**self).deliver(notice)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn deliver(&self, notice: &ReminderNotice) -> Result<(), NotifyError> {
        (**self).deliver(notice)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderNotice {
    pub owner: String,
    pub recipient: Option<UserProfile>,
    pub certification_id: String,
    pub certification_name: String,
    pub provider: String,
    pub expiration_date: NaiveDate,
    pub days_until_expiration: i64,
    pub days_before_expiration: u32,
    pub scheduled_for: NaiveDate,
}

impl ReminderNotice {
    pub fn new(
        reminder: &ReminderEvent,
        record: &CertificationRecord,
        recipient: Option<UserProfile>,
        today: NaiveDate,
    ) -> Self {
        Self {
            owner: reminder.owner.clone(),
            recipient,
            certification_id: record.id.clone(),
            certification_name: record.name.clone(),
            provider: record.provider.clone(),
            expiration_date: record.expiration_date,
            days_until_expiration: record.days_until_expiration(today),
            days_before_expiration: reminder.days_before_expiration,
            scheduled_for: reminder.scheduled_for,
        }
    }

    /// Counts days from the delivery date, not from the scheduled offset, so
    /// a late reminder still tells the truth.
    pub fn subject(&self) -> String {
        format!("{} {}", self.certification_name, self.remaining_phrase())
    }

    pub fn text_body(&self) -> String {
        let greeting = self
            .recipient
            .as_ref()
            .map(|profile| profile.name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or("there");
        format!(
            "Hi {greeting},\n\n\
             Your {name} certification from {provider} {remaining} ({date}).\n\n\
             Next steps:\n\
             - Check renewal requirements\n\
             - Schedule your renewal exam\n\
             - Complete any required CPE credits\n\
             - Update the certification once renewed\n",
            name = self.certification_name,
            provider = self.provider,
            remaining = self.remaining_phrase(),
            date = self.expiration_date,
        )
    }

    fn remaining_phrase(&self) -> String {
        match self.days_until_expiration {
            0 => "expires today".to_string(),
            1 => "expires in 1 day".to_string(),
            days if days > 1 => format!("expires in {days} days"),
            -1 => "expired 1 day ago".to_string(),
            days => format!("expired {} days ago", -days),
        }
    }
}

/// Writes notices to the log instead of sending them anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notice: &ReminderNotice) -> Result<(), NotifyError> {
        info!(
            event = "reminder_notice",
            owner = %notice.owner,
            recipient = notice.recipient.as_ref().map(|profile| profile.email.as_str()),
            certification_id = %notice.certification_id,
            days_before_expiration = notice.days_before_expiration,
            subject = %notice.subject(),
        );
        Ok(())
    }
}
