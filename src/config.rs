//! Run configuration and secrets.
//!
//! Settings come from a TOML file (path in `POOLMON_CONFIG`, default
//! `poolmon.toml`); secrets come from the environment, after `.env` is
//! loaded. Everything is validated once at startup and is immutable for
//! the rest of the run.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::alert::{CautionDelivery, Channels};
use crate::analysis::seasons::SeasonCalendar;
use crate::ingest::flume::FlumeCredentials;
use crate::model::{ConfigError, MergeWindow, RangeSpec, SeasonWindow};
use crate::ranges::RangeTable;

pub const CONFIG_PATH_VAR: &str = "POOLMON_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "poolmon.toml";

// ---------------------------------------------------------------------------
// File sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Csv,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub log_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_retention: usize,
    pub heartbeat_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Csv,
            log_dir: PathBuf::from("logs"),
            backup_dir: PathBuf::from("log_backup"),
            backup_retention: 10,
            heartbeat_dir: PathBuf::from("heartbeats"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Days in which fetched usage overwrites stored usage.
    pub merge_days: i64,
    /// Days of daily usage requested per run.
    pub fetch_days: i64,
    pub trailing_average_days: i64,
    pub rolling_window_samples: usize,
    pub continuity_hours: i64,
    /// Rows in the usage table posted to chat.
    pub usage_table_days: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            merge_days: 3,
            fetch_days: 30,
            trailing_average_days: 30,
            rolling_window_samples: 14,
            continuity_hours: 4,
            usage_table_days: 14,
        }
    }
}

impl WindowConfig {
    pub fn merge_window(&self) -> MergeWindow {
        MergeWindow::days(self.merge_days)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("windows.merge_days", self.merge_days),
            ("windows.fetch_days", self.fetch_days),
            ("windows.trailing_average_days", self.trailing_average_days),
            ("windows.rolling_window_samples", self.rolling_window_samples as i64),
            ("windows.continuity_hours", self.continuity_hours),
            ("windows.usage_table_days", self.usage_table_days as i64),
        ];
        for (name, value) in checks {
            if value <= 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive, got {}", name, value)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub caution_delivery: CautionDelivery,
    /// Log notifications instead of sending them.
    pub silent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChemistryConfig {
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PumphouseConfig {
    pub export_path: PathBuf,
}

impl Default for PumphouseConfig {
    fn default() -> Self {
        Self {
            export_path: PathBuf::from("data/flow.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub season_comparison_path: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            season_comparison_path: PathBuf::from("docs/season_comparison.json"),
        }
    }
}

fn default_timezone() -> String {
    "America/Chicago".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    windows: WindowConfig,
    #[serde(default)]
    alerts: AlertConfig,
    #[serde(default)]
    seasons: Vec<SeasonWindow>,
    #[serde(default)]
    ranges: Option<BTreeMap<String, RangeSpec>>,
    #[serde(default)]
    chemistry: ChemistryConfig,
    #[serde(default)]
    pumphouse: PumphouseConfig,
    #[serde(default)]
    report: ReportConfig,
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Validated configuration for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub timezone: Tz,
    pub storage: StorageConfig,
    pub windows: WindowConfig,
    pub alerts: AlertConfig,
    pub calendar: SeasonCalendar,
    pub ranges: RangeTable,
    pub chemistry: ChemistryConfig,
    pub pumphouse: PumphouseConfig,
    pub report: ReportConfig,
}

impl AppConfig {
    /// Reads the file named by `POOLMON_CONFIG`, or `poolmon.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        contents.parse()
    }

    /// Current wall-clock time in the pool's timezone.
    pub fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.timezone).naive_local()
    }
}

impl FromStr for AppConfig {
    type Err = ConfigError;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let file: ConfigFile = toml::from_str(contents)?;

        let timezone = Tz::from_str(&file.timezone).map_err(|e| {
            ConfigError::Invalid(format!("timezone '{}': {}", file.timezone, e))
        })?;
        file.windows.validate()?;
        let calendar = SeasonCalendar::new(file.seasons)?;
        if calendar.is_empty() {
            return Err(ConfigError::Missing("seasons".to_string()));
        }
        let ranges = match file.ranges {
            Some(specs) => RangeTable::from_specs(specs)?,
            None => RangeTable::chemistry_defaults(),
        };

        Ok(Self {
            timezone,
            storage: file.storage,
            windows: file.windows,
            alerts: file.alerts,
            calendar,
            ranges,
            chemistry: file.chemistry,
            pumphouse: file.pumphouse,
            report: file.report,
        })
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Loads `.env` into the process environment if present.
pub fn load_dotenv() {
    dotenv::dotenv().ok();
}

/// Environment lookup that treats blank values as unset.
pub fn env_lookup(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn required(lookup: &dyn Fn(&str) -> Option<String>, var: &str) -> Result<String, ConfigError> {
    lookup(var).ok_or_else(|| ConfigError::Missing(var.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackSettings {
    pub token: String,
    pub channel: String,
    pub heartbeat_channel: String,
}

impl SlackSettings {
    pub fn channels(&self) -> Channels {
        Channels {
            alerts: self.channel.clone(),
            heartbeat: self.heartbeat_channel.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChemistryCredentials {
    pub username: String,
    pub password: String,
}

pub fn flume_credentials(
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<FlumeCredentials, ConfigError> {
    Ok(FlumeCredentials {
        username: required(lookup, "FLUME_USERNAME")?,
        password: required(lookup, "FLUME_PASSWORD")?,
        client_id: required(lookup, "FLUME_CLIENT_ID")?,
        client_secret: required(lookup, "FLUME_CLIENT_SECRET")?,
    })
}

/// Slack settings. The token is only required when not in silent mode.
pub fn slack_settings(
    lookup: &dyn Fn(&str) -> Option<String>,
    silent: bool,
) -> Result<SlackSettings, ConfigError> {
    let token = if silent {
        lookup("SLACK_BOT_TOKEN").unwrap_or_default()
    } else {
        required(lookup, "SLACK_BOT_TOKEN")?
    };
    Ok(SlackSettings {
        token,
        channel: required(lookup, "SLACK_CHANNEL")?,
        heartbeat_channel: required(lookup, "SLACK_HEARTBEAT_CHANNEL")?,
    })
}

pub fn chemistry_credentials(
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ChemistryCredentials, ConfigError> {
    Ok(ChemistryCredentials {
        username: required(lookup, "CHEMISTRY_USERNAME")?,
        password: required(lookup, "CHEMISTRY_PASSWORD")?,
    })
}

pub fn database_url(lookup: &dyn Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    required(lookup, "DATABASE_URL")
}
