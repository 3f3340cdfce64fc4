use crate::reminders::{LateReminderPolicy, ReminderScheduler, DEFAULT_REMINDER_OFFSETS};
use crate::status::{StatusResolver, DEFAULT_EXPIRING_WINDOW_DAYS};
use crate::validation::{validate_reminder_offsets, ValidationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub expiring_window_days: u32,
    pub reminder_offsets: Vec<u32>,
    pub late_reminders: LateReminderPolicy,
    /// Only consulted with `late_reminders = "skip"`.
    pub late_grace_days: u32,
    pub upcoming_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiring_window_days: DEFAULT_EXPIRING_WINDOW_DAYS,
            reminder_offsets: DEFAULT_REMINDER_OFFSETS.to_vec(),
            late_reminders: LateReminderPolicy::default(),
            late_grace_days: 0,
            upcoming_limit: 5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_reminder_offsets(&self.reminder_offsets)
    }

    pub fn status_resolver(&self) -> StatusResolver {
        StatusResolver::new(self.expiring_window_days)
    }

    pub fn reminder_scheduler(&self) -> Result<ReminderScheduler, ValidationError> {
        ReminderScheduler::new(self.reminder_offsets.iter().copied())
    }
}
