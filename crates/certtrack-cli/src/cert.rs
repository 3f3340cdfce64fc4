use anyhow::{bail, Context, Result};
use certtrack_core::reminders::due_on;
use certtrack_core::{
    CertificationRecord, CertificationStatus, CertificationUpdate, Clock, NewCertification,
    ReminderEvent, StatusOverride, UserProfile,
};
use certtrack_lifecycle::{CertificationEngine, LogNotifier, Renewal};
use certtrack_storage::{CertificationStore, SqliteStore};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::json;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum CertCommand {
    /// Record a new certification
    Add(AddArgs),
    /// List certifications, soonest expiration first
    #[command(alias = "ls")]
    List(ListArgs),
    Show(ShowArgs),
    Edit(EditArgs),
    /// Mark a certification renewed and record its successor
    Renew(RenewArgs),
    #[command(alias = "rm")]
    Remove(TargetArgs),
    Reminders(RemindersArgs),
    Dashboard(JsonArgs),
    /// Recompute and store this month's summary
    Analytics(JsonArgs),
    /// Persist status transitions, refresh summaries and deliver due reminders
    Sweep(JsonArgs),
    Profile(ProfileArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub name: String,
    #[arg(long)]
    pub provider: String,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub issued: NaiveDate,
    #[arg(long)]
    pub expires: NaiveDate,
    #[arg(long)]
    pub cost: Option<f64>,
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
    #[arg(long)]
    pub url: Option<String>,
    /// Use a fixed id instead of a generated one
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<CertificationStatus>,
    #[arg(long)]
    pub category: Option<String>,
    /// Only in-force certifications expiring before this date
    #[arg(long)]
    pub before: Option<NaiveDate>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Default)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub issued: Option<NaiveDate>,
    #[arg(long)]
    pub expires: Option<NaiveDate>,
    #[arg(long, conflicts_with = "clear_cost")]
    pub cost: Option<f64>,
    #[arg(long)]
    pub clear_cost: bool,
    #[arg(long, value_delimiter = ',')]
    pub tags: Option<Vec<String>>,
    #[arg(long, conflicts_with = "clear_url")]
    pub url: Option<String>,
    #[arg(long)]
    pub clear_url: bool,
    #[arg(long, conflicts_with = "clear_override")]
    pub mark_renewed: bool,
    #[arg(long)]
    pub clear_override: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RenewArgs {
    pub id: String,
    /// Defaults to today
    #[arg(long)]
    pub issued: Option<NaiveDate>,
    #[arg(long)]
    pub expires: NaiveDate,
    #[arg(long)]
    pub cost: Option<f64>,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct RemindersArgs {
    pub id: String,
    /// Rebuild the reminder set from the stored record first
    #[arg(long)]
    pub regenerate: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct JsonArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ProfileArgs {
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub json: bool,
}

pub fn run<C: Clock>(
    command: CertCommand,
    engine: &CertificationEngine<C>,
    store: &SqliteStore,
    owner: &str,
) -> Result<()> {
    match command {
        CertCommand::Add(args) => handle_add(args, engine, store, owner),
        CertCommand::List(args) => handle_list(args, engine, store, owner),
        CertCommand::Show(args) => handle_show(args, engine, store, owner),
        CertCommand::Edit(args) => handle_edit(args, engine, store, owner),
        CertCommand::Renew(args) => handle_renew(args, engine, store, owner),
        CertCommand::Remove(args) => {
            let removed = engine.delete(store, owner, &args.id)?;
            println!("Removed {} ({})", removed.id, removed.name);
            Ok(())
        }
        CertCommand::Reminders(args) => handle_reminders(args, engine, store, owner),
        CertCommand::Dashboard(args) => {
            let stats = engine.dashboard(store, owner)?;
            if args.json {
                return print_json(&stats);
            }
            println!("As of {}", stats.as_of);
            println!(
                "Total {}  active {}  expiring {}  expired {}  renewed {}",
                stats.total_count,
                stats.active_count,
                stats.expiring_count,
                stats.expired_count,
                stats.renewed_count
            );
            println!(
                "Expiring: <=30d {}  31-60d {}  61-90d {}  >90d {}",
                stats.expiring_soon.next_30_days,
                stats.expiring_soon.days_31_to_60,
                stats.expiring_soon.days_61_to_90,
                stats.expiring_soon.beyond_90_days
            );
            println!(
                "Cost {:.2}  average {:.2}  renewed this year {}",
                stats.total_cost, stats.average_certification_value, stats.renewed_this_year
            );
            for upcoming in &stats.upcoming_expirations {
                println!(
                    "- {} {} ({}) in {} days",
                    upcoming.expiration_date,
                    upcoming.name,
                    upcoming.provider,
                    upcoming.days_remaining
                );
            }
            Ok(())
        }
        CertCommand::Analytics(args) => {
            let summary = engine.refresh_analytics(store, owner)?;
            if args.json {
                return print_json(&summary);
            }
            println!(
                "{}: {} certifications, {} active, {} expiring, {} expired, {} renewed, cost {:.2}",
                summary.month,
                summary.total_count,
                summary.active_count,
                summary.expiring_count,
                summary.expired_count,
                summary.renewed_count,
                summary.total_cost
            );
            for (category, count) in &summary.category_counts {
                println!("  {category}: {count}");
            }
            Ok(())
        }
        CertCommand::Sweep(args) => {
            let report = engine.sweep(store, &LogNotifier)?;
            if args.json {
                return print_json(&json!({
                    "ownersProcessed": report.owners_processed,
                    "certificationsChecked": report.certifications_checked,
                    "statusTransitions": report.status_transitions,
                    "summariesWritten": report.summaries_written,
                    "remindersDelivered": report.reminders_delivered,
                    "remindersFailed": report.reminders_failed,
                    "remindersSkippedLate": report.reminders_skipped_late,
                    "remindersSkippedRenewed": report.reminders_skipped_renewed,
                    "orphanRemindersRemoved": report.orphan_reminders_removed,
                }));
            }
            println!(
                "Swept {} owners: {} transitions, {} reminders delivered, {} failed",
                report.owners_processed,
                report.status_transitions,
                report.reminders_delivered,
                report.reminders_failed
            );
            Ok(())
        }
        CertCommand::Profile(args) => handle_profile(args, store, owner),
    }
}

fn handle_add<C: Clock>(
    args: AddArgs,
    engine: &CertificationEngine<C>,
    store: &SqliteStore,
    owner: &str,
) -> Result<()> {
    let new = NewCertification {
        name: args.name,
        provider: args.provider,
        category: args.category,
        issue_date: Some(args.issued),
        expiration_date: Some(args.expires),
        cost: args.cost,
        tags: args.tags,
        document_url: args.url,
    };
    let written = match args.id {
        Some(id) => engine.create_with_id(store, owner, &id, new)?,
        None => engine.create(store, owner, new)?,
    };
    if args.json {
        return print_json(&written.record);
    }
    println!(
        "Added {} [{}] with {} reminders",
        written.record.id,
        written.record.status,
        written.reminders.map(|reminders| reminders.len()).unwrap_or(0)
    );
    Ok(())
}

fn handle_list<C: Clock>(
    args: ListArgs,
    engine: &CertificationEngine<C>,
    store: &SqliteStore,
    owner: &str,
) -> Result<()> {
    let mut records = match (&args.category, args.before) {
        (Some(category), before) => {
            let records = engine.by_category(store, owner, category, before)?;
            if before.is_some() {
                records
                    .into_iter()
                    .filter(|record| record.status.is_in_force())
                    .collect()
            } else {
                records
            }
        }
        (None, Some(before)) => engine.expiring_before(store, owner, before)?,
        (None, None) => engine.list(store, owner)?,
    };
    if let Some(status) = args.status {
        records.retain(|record| record.status == status);
    }

    if args.json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No certifications found for {owner}");
        return Ok(());
    }
    let today = engine.today();
    for record in &records {
        println!("{}", list_line(record, today));
    }
    Ok(())
}

fn handle_show<C: Clock>(
    args: ShowArgs,
    engine: &CertificationEngine<C>,
    store: &SqliteStore,
    owner: &str,
) -> Result<()> {
    let record = engine.get(store, owner, &args.id)?;
    let reminders = engine.reminders(store, owner, &args.id)?;
    if args.json {
        return print_json(&json!({ "certification": record, "reminders": reminders }));
    }

    println!("{} ({})", record.name, record.id);
    println!("  provider:  {}", record.provider);
    println!("  category:  {}", record.category);
    println!("  status:    {}", record.status);
    println!("  issued:    {}", record.issue_date);
    println!("  expires:   {}", record.expiration_date);
    if let Some(cost) = record.cost {
        println!("  cost:      {cost:.2}");
    }
    if !record.tags.is_empty() {
        let tags = record.tags.iter().cloned().collect::<Vec<_>>();
        println!("  tags:      {}", tags.join(", "));
    }
    if let Some(url) = &record.document_url {
        println!("  document:  {url}");
    }
    println!("  reminders: {} sent", record.reminders_sent);
    for reminder in &reminders {
        println!("    {}", reminder_line(reminder));
    }
    Ok(())
}

fn handle_edit<C: Clock>(
    args: EditArgs,
    engine: &CertificationEngine<C>,
    store: &SqliteStore,
    owner: &str,
) -> Result<()> {
    let updates = edit_updates(&args);
    if updates.is_empty() {
        bail!("Nothing to update for {}", args.id);
    }
    let written = engine.update(store, owner, &args.id, updates)?;
    if args.json {
        return print_json(&written.record);
    }
    match written.reminders {
        Some(reminders) => println!(
            "Updated {} [{}], {} reminders scheduled",
            written.record.id,
            written.record.status,
            reminders.len()
        ),
        None => println!("Updated {} [{}]", written.record.id, written.record.status),
    }
    Ok(())
}

fn edit_updates(args: &EditArgs) -> Vec<CertificationUpdate> {
    let mut updates = Vec::new();
    if let Some(name) = &args.name {
        updates.push(CertificationUpdate::SetName(name.clone()));
    }
    if let Some(provider) = &args.provider {
        updates.push(CertificationUpdate::SetProvider(provider.clone()));
    }
    if let Some(category) = &args.category {
        updates.push(CertificationUpdate::SetCategory(Some(category.clone())));
    }
    if let Some(issued) = args.issued {
        updates.push(CertificationUpdate::SetIssueDate(issued));
    }
    if let Some(expires) = args.expires {
        updates.push(CertificationUpdate::SetExpirationDate(expires));
    }
    if args.clear_cost {
        updates.push(CertificationUpdate::SetCost(None));
    } else if let Some(cost) = args.cost {
        updates.push(CertificationUpdate::SetCost(Some(cost)));
    }
    if let Some(tags) = &args.tags {
        updates.push(CertificationUpdate::SetTags(tags.clone()));
    }
    if args.clear_url {
        updates.push(CertificationUpdate::SetDocumentUrl(None));
    } else if let Some(url) = &args.url {
        updates.push(CertificationUpdate::SetDocumentUrl(Some(url.clone())));
    }
    if args.mark_renewed {
        updates.push(CertificationUpdate::SetStatusOverride(Some(
            StatusOverride::Renewed,
        )));
    } else if args.clear_override {
        updates.push(CertificationUpdate::SetStatusOverride(None));
    }
    updates
}

fn handle_renew<C: Clock>(
    args: RenewArgs,
    engine: &CertificationEngine<C>,
    store: &SqliteStore,
    owner: &str,
) -> Result<()> {
    let outcome = engine.renew(
        store,
        owner,
        &args.id,
        Renewal {
            issue_date: args.issued,
            expiration_date: Some(args.expires),
            cost: args.cost,
            document_url: args.url,
        },
    )?;
    if args.json {
        return print_json(&json!({
            "previous": outcome.previous,
            "successor": outcome.successor.record,
        }));
    }
    println!(
        "Renewed {} as {} (expires {})",
        outcome.previous.id, outcome.successor.record.id, outcome.successor.record.expiration_date
    );
    Ok(())
}

fn handle_reminders<C: Clock>(
    args: RemindersArgs,
    engine: &CertificationEngine<C>,
    store: &SqliteStore,
    owner: &str,
) -> Result<()> {
    let reminders = if args.regenerate {
        let record = engine.get(store, owner, &args.id)?;
        engine.regenerate_reminders(store, &record)?
    } else {
        engine.reminders(store, owner, &args.id)?
    };
    if args.json {
        return print_json(&reminders);
    }
    if reminders.is_empty() {
        println!("No reminders for {}", args.id);
        return Ok(());
    }
    let due = due_on(&reminders, engine.today()).len();
    println!("{} reminders, {} due", reminders.len(), due);
    for reminder in &reminders {
        println!("- {}", reminder_line(reminder));
    }
    Ok(())
}

fn handle_profile(args: ProfileArgs, store: &SqliteStore, owner: &str) -> Result<()> {
    let current = store.profile(owner)?;
    let profile = if args.email.is_some() || args.name.is_some() {
        let Some(email) = args
            .email
            .or_else(|| current.as_ref().map(|profile| profile.email.clone()))
        else {
            bail!("--email is required for a new profile");
        };
        let name = args
            .name
            .or_else(|| current.as_ref().map(|profile| profile.name.clone()))
            .unwrap_or_default();
        let profile = UserProfile {
            user_id: owner.to_string(),
            email,
            name,
        };
        store.put_profile(&profile)?;
        Some(profile)
    } else {
        current
    };

    match profile {
        Some(profile) if args.json => print_json(&profile),
        Some(profile) => {
            println!("{} <{}> ({})", profile.name, profile.email, profile.user_id);
            Ok(())
        }
        None => {
            println!("No profile stored for {owner}");
            Ok(())
        }
    }
}

fn list_line(record: &CertificationRecord, today: NaiveDate) -> String {
    let days = record.days_until_expiration(today);
    let remaining = if days >= 0 {
        format!("{days}d left")
    } else {
        format!("{}d ago", -days)
    };
    format!(
        "- [{}] {} {} ({}) expires {} ({remaining})",
        record.status, record.id, record.name, record.provider, record.expiration_date
    )
}

fn reminder_line(reminder: &ReminderEvent) -> String {
    let state = match reminder.sent_at {
        Some(at) => format!("sent {}", at.format("%Y-%m-%d")),
        None => "pending".to_string(),
    };
    format!(
        "{} ({} days before) {state}",
        reminder.scheduled_for, reminder.days_before_expiration
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let encoded = serde_json::to_string_pretty(value).context("Failed to encode JSON")?;
    println!("{encoded}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    #[test]
    fn edit_flags_map_to_updates_in_order() {
        let args = EditArgs {
            id: "cert-1".to_string(),
            name: Some("CKA".to_string()),
            expires: Some(date("2026-03-01")),
            clear_cost: true,
            tags: Some(vec!["k8s".to_string()]),
            mark_renewed: true,
            ..EditArgs::default()
        };

        let updates = edit_updates(&args);
        assert_eq!(
            updates,
            vec![
                CertificationUpdate::SetName("CKA".to_string()),
                CertificationUpdate::SetExpirationDate(date("2026-03-01")),
                CertificationUpdate::SetCost(None),
                CertificationUpdate::SetTags(vec!["k8s".to_string()]),
                CertificationUpdate::SetStatusOverride(Some(StatusOverride::Renewed)),
            ]
        );
        assert!(updates
            .iter()
            .any(CertificationUpdate::requires_reminder_regeneration));
    }

    #[test]
    fn empty_edit_produces_no_updates() {
        let args = EditArgs {
            id: "cert-1".to_string(),
            ..EditArgs::default()
        };
        assert!(edit_updates(&args).is_empty());
    }

    #[test]
    fn lines_show_remaining_days_and_send_state() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = CertificationRecord {
            id: "cert-1".to_string(),
            owner: "user-1".to_string(),
            name: "CKA".to_string(),
            provider: "CNCF".to_string(),
            category: "cloud".to_string(),
            issue_date: date("2023-01-01"),
            expiration_date: date("2024-03-01"),
            status: CertificationStatus::Expiring,
            status_override: None,
            cost: None,
            reminders_sent: 0,
            tags: BTreeSet::new(),
            document_url: None,
            created_at: ts,
            updated_at: ts,
        };
        assert_eq!(
            list_line(&record, date("2024-02-20")),
            "- [expiring] cert-1 CKA (CNCF) expires 2024-03-01 (10d left)"
        );
        assert!(list_line(&record, date("2024-03-04")).ends_with("(3d ago)"));

        let mut reminder = ReminderEvent {
            certification_id: "cert-1".to_string(),
            owner: "user-1".to_string(),
            days_before_expiration: 30,
            scheduled_for: date("2024-01-31"),
            sent: false,
            sent_at: None,
        };
        assert_eq!(reminder_line(&reminder), "2024-01-31 (30 days before) pending");
        reminder.mark_sent(Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap());
        assert_eq!(
            reminder_line(&reminder),
            "2024-01-31 (30 days before) sent 2024-02-01"
        );
    }
}
