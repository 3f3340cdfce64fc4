use anyhow::{Context, Result};
use certtrack_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "CERTTRACK_CONFIG";
pub const DB_ENV: &str = "CERTTRACK_DB";
pub const OWNER_ENV: &str = "CERTTRACK_OWNER";
pub const LOG_LEVEL_ENV: &str = "CERTTRACK_LOG_LEVEL";

const DEFAULT_OWNER: &str = "local";

/// Contents of `certtrack.toml`. Every key is optional.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub database: Option<PathBuf>,
    pub owner: Option<String>,
    pub log_level: Option<String>,
    pub engine: EngineConfig,
}

/// Values given on the command line; they beat env and file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub owner: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub database: PathBuf,
    pub owner: String,
    pub log_level: Option<String>,
    pub engine: EngineConfig,
}

impl Settings {
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    pub fn resolve_with(
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let config_path = overrides
            .config
            .or_else(|| non_empty(env(CONFIG_ENV)).map(PathBuf::from))
            .unwrap_or_else(default_config_path);
        let file = load_config(&config_path)?;

        let database = overrides
            .database
            .or_else(|| non_empty(env(DB_ENV)).map(PathBuf::from))
            .or(file.database)
            .unwrap_or_else(default_database_path);
        let owner = overrides
            .owner
            .or_else(|| non_empty(env(OWNER_ENV)))
            .or(file.owner)
            .unwrap_or_else(|| DEFAULT_OWNER.to_string());
        let log_level = non_empty(env(LOG_LEVEL_ENV)).or(file.log_level);

        Ok(Self {
            config_path,
            database,
            owner,
            log_level,
            engine: file.engine,
        })
    }
}

/// A missing file means defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path.display()))
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("certtrack/config.toml")
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("certtrack/certtrack.db")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use certtrack_core::LateReminderPolicy;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn file_values_fill_in_engine_defaults() {
        let file = write_config(
            r#"
database = "/var/lib/certtrack/main.db"
owner = "ada"
log_level = "warn"

[engine]
expiring_window_days = 45
late_reminders = "skip"
late_grace_days = 2
"#,
        );

        let settings = Settings::resolve_with(
            Overrides {
                config: Some(file.path().to_path_buf()),
                ..Overrides::default()
            },
            env_from(&[]),
        )
        .expect("settings");

        assert_eq!(settings.database, PathBuf::from("/var/lib/certtrack/main.db"));
        assert_eq!(settings.owner, "ada");
        assert_eq!(settings.log_level.as_deref(), Some("warn"));
        assert_eq!(settings.engine.expiring_window_days, 45);
        assert_eq!(settings.engine.late_reminders, LateReminderPolicy::Skip);
        assert_eq!(settings.engine.reminder_offsets, vec![30, 60, 90]);
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let file = write_config("owner = \"from-file\"\ndatabase = \"file.db\"\n");
        let env = env_from(&[
            (CONFIG_ENV, "/does/not/matter"),
            (OWNER_ENV, "from-env"),
            (DB_ENV, "env.db"),
            (LOG_LEVEL_ENV, "debug"),
        ]);

        let settings = Settings::resolve_with(
            Overrides {
                config: Some(file.path().to_path_buf()),
                database: Some(PathBuf::from("cli.db")),
                owner: None,
            },
            env,
        )
        .expect("settings");

        assert_eq!(settings.config_path, file.path());
        assert_eq!(settings.database, PathBuf::from("cli.db"));
        assert_eq!(settings.owner, "from-env");
        assert_eq!(settings.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = Settings::resolve_with(
            Overrides {
                config: Some(dir.path().join("absent.toml")),
                ..Overrides::default()
            },
            env_from(&[(OWNER_ENV, "  ")]),
        )
        .expect("settings");

        assert_eq!(settings.owner, DEFAULT_OWNER);
        assert_eq!(settings.engine, EngineConfig::default());
        assert!(settings.log_level.is_none());
    }

    #[test]
    fn malformed_file_is_reported() {
        let file = write_config("owner = [unterminated");
        let err = load_config(file.path()).expect_err("parse failure");
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
