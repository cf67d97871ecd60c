/// Structured logging for the pool monitoring jobs
///
/// Thin layer over `tracing`: installs the subscriber once per binary and
/// provides context-rich helpers that tag every event with the data source
/// and metric key. Scheduled runs can mirror output to an append-mode file.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::model::FetchError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Flume,
    Chemistry,
    Pumphouse,
    Store,
    Slack,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Flume => write!(f, "FLUME"),
            DataSource::Chemistry => write!(f, "CHEM"),
            DataSource::Pumphouse => write!(f, "PUMP"),
            DataSource::Store => write!(f, "STORE"),
            DataSource::Slack => write!(f, "SLACK"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - upstream in maintenance or rate limiting us
    Expected,
    /// Unexpected failure - indicates API change, bad credentials or a bug
    Unexpected,
    /// Unknown - transient network trouble or missing data
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `min_level` when set. With `log_file`, output goes
/// to that file (append mode, no ANSI colors) instead of stderr. Calling
/// this twice is harmless; the second call is ignored.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,reqwest=warn,rustls=warn",
            min_level.directive()
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("logger already initialized, keeping existing subscriber");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(source: DataSource, metric: Option<&str>, message: &str) {
    tracing::info!(source = %source, metric = metric.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(source: DataSource, metric: Option<&str>, message: &str) {
    tracing::warn!(source = %source, metric = metric.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(source: DataSource, metric: Option<&str>, message: &str) {
    tracing::error!(source = %source, metric = metric.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(source: DataSource, metric: Option<&str>, message: &str) {
    tracing::debug!(source = %source, metric = metric.unwrap_or("-"), "{}", message);
}

fn log_at(level: LogLevel, source: DataSource, metric: Option<&str>, message: &str) {
    match level {
        LogLevel::Debug => debug(source, metric, message),
        LogLevel::Info => info(source, metric, message),
        LogLevel::Warning => warn(source, metric, message),
        LogLevel::Error => error(source, metric, message),
    }
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify an upstream fetch failure
pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        // Maintenance windows and rate limits come and go on their own
        FetchError::HttpError(429) | FetchError::HttpError(503) => FailureType::Expected,
        FetchError::HttpError(_) => FailureType::Unexpected,
        // Parse errors suggest API changes
        FetchError::ParseError(_) => FailureType::Unexpected,
        FetchError::AuthFailed(_) | FetchError::NoDevice(_) => FailureType::Unexpected,
        FetchError::Request(_) => FailureType::Unknown,
    }
}

/// Log a data source failure with automatic classification
pub fn log_fetch_failure(source: DataSource, operation: &str, err: &FetchError) {
    let failure_type = classify_fetch_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => warn(source, None, &message),
        FailureType::Unexpected => error(source, None, &message),
        FailureType::Unknown => warn(source, None, &message),
    }
}

// ---------------------------------------------------------------------------
// Ingest Summary Logging
// ---------------------------------------------------------------------------

/// Counts from one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    pub total: usize,
    pub appended: usize,
    pub already_logged: usize,
    pub rejected: usize,
}

fn summary_level(counts: &IngestCounts) -> LogLevel {
    if counts.rejected == 0 {
        LogLevel::Info
    } else if counts.appended + counts.already_logged == 0 {
        LogLevel::Error
    } else {
        LogLevel::Warning
    }
}

/// Log a summary of an ingestion run
pub fn log_ingest_summary(source: DataSource, counts: &IngestCounts) {
    let message = format!(
        "Ingest complete: {}/{} appended, {} already logged, {} rejected",
        counts.appended, counts.total, counts.already_logged, counts.rejected
    );
    log_at(summary_level(counts), source, None, &message);
}
