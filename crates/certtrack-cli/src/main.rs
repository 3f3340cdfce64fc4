mod cert;
mod config;

use anyhow::{Context, Result};
use cert::CertCommand;
use certtrack_core::{Clock, FixedClock, SystemClock};
use certtrack_lifecycle::CertificationEngine;
use certtrack_storage::SqliteStore;
use chrono::NaiveDate;
use clap::Parser;
use config::{Overrides, Settings};
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "certtrack")]
#[command(about = "Track certifications, expiry reminders and renewal analytics", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/certtrack/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[arg(long, global = true)]
    owner: Option<String>,
    /// Evaluate as if today were this date
    #[arg(long, global = true)]
    today: Option<NaiveDate>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: CertCommand,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(Overrides {
        config: cli.config,
        database: cli.db,
        owner: cli.owner,
    })?;
    init_logging(&settings, cli.debug);
    debug!(
        event = "settings_resolved",
        config = %settings.config_path.display(),
        database = %settings.database.display(),
        owner = %settings.owner,
    );

    if let Some(parent) = settings.database.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = SqliteStore::open(&settings.database)
        .with_context(|| format!("Failed to open database {}", settings.database.display()))?;

    let clock: Box<dyn Clock> = match cli.today {
        Some(date) => Box::new(FixedClock::on(date)),
        None => Box::new(SystemClock),
    };
    let engine = CertificationEngine::new(settings.engine.clone(), clock)
        .context("Invalid engine configuration")?;

    cert::run(cli.command, &engine, &store, &settings.owner)
}

/// RUST_LOG wins, then `--debug`, then CERTTRACK_LOG_LEVEL or the config
/// file, then `info`. Output goes to stderr.
fn init_logging(settings: &Settings, debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Some(level) = &settings.log_level {
        level.clone()
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("logging already initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certtrack_core::CertificationStatus;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "certtrack",
            "list",
            "--status",
            "expiring-soon",
            "--today",
            "2024-06-01",
            "--owner",
            "ada",
        ])
        .expect("parse");

        assert_eq!(cli.today, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(cli.owner.as_deref(), Some("ada"));
        match cli.command {
            CertCommand::List(args) => {
                assert_eq!(args.status, Some(CertificationStatus::Expiring));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn add_requires_dates() {
        assert!(Cli::try_parse_from(["certtrack", "add", "CKA", "--provider", "CNCF"]).is_err());

        let cli = Cli::try_parse_from([
            "certtrack",
            "add",
            "CKA",
            "--provider",
            "CNCF",
            "--issued",
            "2023-03-01",
            "--expires",
            "2026-03-01",
            "--tags",
            "k8s,cloud",
        ])
        .expect("parse");
        match cli.command {
            CertCommand::Add(args) => {
                assert_eq!(args.tags, vec!["k8s".to_string(), "cloud".to_string()]);
                assert_eq!(args.expires, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rm_is_an_alias_for_remove() {
        let cli = Cli::try_parse_from(["certtrack", "rm", "cert-1"]).expect("parse");
        assert!(matches!(cli.command, CertCommand::Remove(_)));
    }
}
