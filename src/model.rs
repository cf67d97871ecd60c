//! Reading, ReadingTime, RangeSpec, SeasonWindow, MergeWindow and the error taxonomy.
//!
//! Core data types for the pool monitoring service.
//!
//! This module defines the shared domain model imported by all other modules.
//! It contains no I/O. The only logic here is timestamp parsing and the
//! small band/window helpers that every component leans on.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Source keys
// ---------------------------------------------------------------------------

/// Daily household water usage from the Flume meter, in CCF.
pub const SOURCE_WATER_CCF: &str = "water_ccf";

/// Per-minute Flume usage, in CCF. Used by the constant-flow check only.
pub const SOURCE_WATER_CCF_MINUTE: &str = "water_ccf_minute";

/// Per-hour Flume usage, in CCF. Used by the constant-flow check only.
pub const SOURCE_WATER_CCF_HOUR: &str = "water_ccf_hour";

/// Chemistry test fields, in the column order of the chemistry log.
pub const CHEMISTRY_FIELDS: &[&str] = &[
    "free_chlorine",
    "total_chlorine",
    "ph",
    "alkalinity",
    "calcium",
    "cyanuric_acid",
    "iron",
    "copper",
    "phosphates",
    "salt",
];

/// Whether the chemistry test was run in store (1.0) or at home (0.0).
pub const SOURCE_CHEM_IN_STORE: &str = "in_store";

/// Pump-house telemetry streams.
pub const SOURCE_PUMP_FLOW: &str = "flow_gpm";
pub const SOURCE_PUMP_VAC_PRESS: &str = "vac_press";
pub const SOURCE_PUMP_SYS_PRESS: &str = "sys_press";
pub const SOURCE_PUMP_F1_PRESS: &str = "f1_press";
/// Derived: vac_press + sys_press.
pub const SOURCE_PUMP_COMBINED_PRESS: &str = "combined_press";

/// Gallons per CCF (hundred cubic feet).
pub const GALLONS_PER_CCF: f64 = 748.05;

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// When a reading was observed.
///
/// Daily streams (water usage, chemistry tests) carry a calendar date;
/// pump telemetry and sub-daily meter buckets carry a local date+time.
/// A single source key only ever uses one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadingTime {
    Day(NaiveDate),
    At(NaiveDateTime),
}

const DAY_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

impl ReadingTime {
    /// The calendar date of the reading.
    pub fn date(&self) -> NaiveDate {
        match self {
            ReadingTime::Day(d) => *d,
            ReadingTime::At(dt) => dt.date(),
        }
    }

    /// True if this timestamp falls on or after `cutoff`.
    ///
    /// Dated readings compare by calendar date, so a reading for the
    /// cutoff's own day is inside the window.
    pub fn is_on_or_after(&self, cutoff: NaiveDateTime) -> bool {
        match self {
            ReadingTime::Day(d) => *d >= cutoff.date(),
            ReadingTime::At(dt) => *dt >= cutoff,
        }
    }

    /// True if this timestamp lies in `[since, until]`.
    pub fn is_within(&self, since: NaiveDateTime, until: NaiveDateTime) -> bool {
        match self {
            ReadingTime::Day(d) => *d >= since.date() && *d <= until.date(),
            ReadingTime::At(dt) => *dt >= since && *dt <= until,
        }
    }
}

impl fmt::Display for ReadingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingTime::Day(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            ReadingTime::At(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl FromStr for ReadingTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // All times are pool-local: an RFC 3339 offset is dropped and the
        // wall-clock time kept as written.
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            let local = dt.naive_local();
            return Ok(ReadingTime::At(local.with_nanosecond(0).unwrap_or(local)));
        }
        // Fractional seconds are dropped.
        let trimmed = s.split('.').next().unwrap_or(s);

        for fmt in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
                return Ok(ReadingTime::At(dt));
            }
        }
        for fmt in DAY_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
                return Ok(ReadingTime::Day(d));
            }
        }
        Err(format!("unrecognized timestamp '{}'", s))
    }
}

/// A single observed sample for one metric stream.
///
/// `value` is `None` when the upstream value was absent or unparseable.
/// Missing values are stored and compared like any other value; they are
/// never silently turned into zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub source_key: String,
    pub timestamp: ReadingTime,
    pub value: Option<f64>,
}

impl Reading {
    pub fn new(source_key: impl Into<String>, timestamp: ReadingTime, value: Option<f64>) -> Self {
        Self {
            source_key: source_key.into(),
            timestamp,
            value,
        }
    }

    /// Convenience constructor for a dated reading with a present value.
    pub fn daily(source_key: impl Into<String>, date: NaiveDate, value: f64) -> Self {
        Self::new(source_key, ReadingTime::Day(date), Some(value))
    }
}

// ---------------------------------------------------------------------------
// Range types
// ---------------------------------------------------------------------------

/// An inclusive numeric band `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Band {
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Inclusive on both ends.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

impl From<(f64, f64)> for Band {
    fn from((low, high): (f64, f64)) -> Self {
        Band { low, high }
    }
}

impl From<Band> for (f64, f64) {
    fn from(b: Band) -> Self {
        (b.low, b.high)
    }
}

/// Target and optional closure band for one metric.
///
/// Bands nest:
///   closure.low <= target.low <= target.high <= closure.high
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub target: Band,
    #[serde(default)]
    pub closure: Option<Band>,
}

impl RangeSpec {
    pub const fn new(target: Band, closure: Option<Band>) -> Self {
        Self { target, closure }
    }

    /// Checks the band nesting invariant.
    pub fn validate(&self, metric: &str) -> Result<(), ConfigError> {
        let t = &self.target;
        if !(t.low.is_finite() && t.high.is_finite()) || t.low > t.high {
            return Err(ConfigError::Invalid(format!(
                "range '{}': target low {} must not exceed high {}",
                metric, t.low, t.high
            )));
        }
        if let Some(c) = &self.closure {
            if !(c.low <= t.low && t.high <= c.high) {
                return Err(ConfigError::Invalid(format!(
                    "range '{}': closure [{}, {}] must enclose target [{}, {}]",
                    metric, c.low, c.high, t.low, t.high
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Season and window types
// ---------------------------------------------------------------------------

/// One pool season: a named date range with its own water rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonWindow {
    pub label: String,
    pub open_date: NaiveDate,
    pub close_date: NaiveDate,
    /// Currency per CCF.
    pub unit_rate: f64,
}

impl SeasonWindow {
    /// Inclusive of both open and close dates.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.open_date && date <= self.close_date
    }
}

/// Trailing window in which freshly fetched values overwrite stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeWindow {
    pub days: i64,
}

impl MergeWindow {
    pub const fn days(days: i64) -> Self {
        Self { days }
    }

    /// Earliest instant that is still inside the window.
    pub fn cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        now - Duration::days(self.days)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Missing or invalid configuration. Always fatal, raised before any I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised while talking to an upstream data source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-2xx HTTP response.
    #[error("HTTP error: {0}")]
    HttpError(u16),
    /// Transport failure: DNS, TLS, timeout, connection reset.
    #[error("request failed: {0}")]
    Request(String),
    /// The response body could not be deserialized.
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// The account has no device of the requested kind.
    #[error("No device found: {0}")]
    NoDevice(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::HttpError(status.as_u16()),
            None if e.is_decode() => FetchError::ParseError(e.to_string()),
            None => FetchError::Request(e.to_string()),
        }
    }
}

/// Errors raised by a `ReadingStore`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The timestamp is already logged with a different value.
    #[error(
        "duplicate timestamp {timestamp} for '{source_key}': stored {stored:?}, supplied {supplied:?}"
    )]
    DuplicateTimestamp {
        source_key: String,
        timestamp: ReadingTime,
        stored: Option<f64>,
        supplied: Option<f64>,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// The log could not be parsed and no usable snapshot exists.
    #[error("corrupted log {path}: {detail}")]
    Corrupted { path: String, detail: String },
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),
}

/// Errors raised by a `Notifier`. Logged and swallowed by the alert engine.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    HttpError(u16),
    /// The messaging API answered but refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => NotifyError::HttpError(status.as_u16()),
            None => NotifyError::Request(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
