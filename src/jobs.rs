//! One function per scheduled batch job.
//!
//! Each job is a strict pipeline: fetch, persist, derive, notify. Sources,
//! the store and the notifier are passed in, and the clock is a `now`
//! argument, so the same functions run under test with fakes.
//!
//! Fetch failures abort the job before anything is written. A conflicting
//! duplicate rejects only that reading. Notification failures never abort.

use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::alert::continuity::{self, FlowCondition};
use crate::alert::{AlertEngine, Channels, Tier};
use crate::analysis::merge::{MergeStats, UsageMerger};
use crate::analysis::seasons::{self, SeasonSeries, SeasonSummary};
use crate::config::{self, AppConfig, StorageBackend, StorageConfig};
use crate::ingest::chemistry::ChemistrySource;
use crate::ingest::flume::gallons_to_ccf;
use crate::ingest::pumphouse::PumpSample;
use crate::ingest::{self, Bucket, FetchRequest, ReadingSource};
use crate::logging::{self, DataSource, IngestCounts};
use crate::model::{
    ConfigError, FetchError, Reading, SOURCE_WATER_CCF, SOURCE_WATER_CCF_HOUR,
    SOURCE_WATER_CCF_MINUTE, StoreError,
};
use crate::notify::Notifier;
use crate::report;
use crate::store::{AppendOutcome, CsvReadingStore, PgReadingStore, ReadingStore};

pub const HEARTBEAT_WATER_USAGE: &str = "water_usage";
pub const HEARTBEAT_CONSTANT_FLOW: &str = "constant_flow";

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What every job needs besides its data source and store.
pub struct JobContext<'a> {
    pub config: &'a AppConfig,
    pub notifier: &'a dyn Notifier,
    pub channels: Channels,
}

impl<'a> JobContext<'a> {
    pub fn new(config: &'a AppConfig, notifier: &'a dyn Notifier, channels: Channels) -> Self {
        Self {
            config,
            notifier,
            channels,
        }
    }

    fn engine(&self) -> AlertEngine<'a> {
        AlertEngine::new(
            self.notifier,
            self.channels.clone(),
            &self.config.ranges,
            self.config.storage.heartbeat_dir.clone(),
        )
        .with_caution_delivery(self.config.alerts.caution_delivery)
    }
}

/// Opens the configured store backend.
pub fn open_store(
    storage: &StorageConfig,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Box<dyn ReadingStore>, JobError> {
    match storage.backend {
        StorageBackend::Csv => Ok(Box::new(CsvReadingStore::open(
            storage.log_dir.clone(),
            storage.backup_dir.clone(),
            storage.backup_retention,
        )?)),
        StorageBackend::Postgres => {
            let url = config::database_url(lookup)?;
            Ok(Box::new(PgReadingStore::connect(&url)?))
        }
    }
}

fn fetch_or_log<T>(
    source: DataSource,
    operation: &str,
    result: Result<T, FetchError>,
) -> Result<T, JobError> {
    result.map_err(|e| {
        logging::log_fetch_failure(source, operation, &e);
        JobError::Fetch(e)
    })
}

fn start_of(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

// ---------------------------------------------------------------------------
// Shared ingestion loop
// ---------------------------------------------------------------------------

/// Appends each reading and classifies the ones that were new.
///
/// Conflicting duplicates are logged and rejected; any other store error
/// aborts. Queued cautions are flushed at the end.
fn ingest_readings(
    engine: &mut AlertEngine<'_>,
    store: &mut dyn ReadingStore,
    readings: &[Reading],
    source: DataSource,
) -> Result<(IngestCounts, Vec<(String, Tier)>), StoreError> {
    let mut counts = IngestCounts {
        total: readings.len(),
        ..Default::default()
    };
    let mut tiers = Vec::new();

    for reading in readings {
        match store.append(reading) {
            Ok(AppendOutcome::Appended) => {
                counts.appended += 1;
                let tier = engine.on_reading(reading);
                tiers.push((reading.source_key.clone(), tier));
            }
            Ok(AppendOutcome::AlreadyLogged) => counts.already_logged += 1,
            Err(e @ StoreError::DuplicateTimestamp { .. }) => {
                counts.rejected += 1;
                logging::warn(source, Some(&reading.source_key), &e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    engine.flush_cautions();
    logging::log_ingest_summary(source, &counts);
    Ok((counts, tiers))
}

// ---------------------------------------------------------------------------
// Water usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct WaterUsageOutcome {
    pub merge: MergeStats,
    pub history_len: usize,
    pub summary: Option<SeasonSummary>,
    pub posted: bool,
}

/// Daily usage: heartbeat, fetch, reconcile, summarize, post.
pub fn run_water_usage(
    ctx: &JobContext<'_>,
    source: &mut dyn ReadingSource,
    store: &mut dyn ReadingStore,
    now: NaiveDateTime,
) -> Result<WaterUsageOutcome, JobError> {
    let cfg = ctx.config;
    let today = now.date();
    let engine = ctx.engine();

    engine.heartbeat(
        HEARTBEAT_WATER_USAGE,
        today,
        &format!("❤️ Flume updater ran {}.", today),
    );

    let request = FetchRequest::new(
        "chart",
        Bucket::Day,
        start_of(today - Duration::days(cfg.windows.fetch_days)),
        start_of(today) + Duration::seconds(86_399),
    );
    let samples = fetch_or_log(DataSource::Flume, "daily usage query", source.fetch(&request))?;
    let fetched = ingest::to_readings(SOURCE_WATER_CCF, Bucket::Day, &samples, gallons_to_ccf);
    logging::info(
        DataSource::Flume,
        Some(SOURCE_WATER_CCF),
        &format!("fetched {} daily samples", fetched.len()),
    );

    let merger = UsageMerger::new(cfg.windows.merge_window());
    let (history, merge) = merger.reconcile(store, SOURCE_WATER_CCF, &fetched, now)?;

    let summary = seasons::summarize(
        &history,
        &cfg.calendar,
        today,
        cfg.windows.trailing_average_days,
    );

    let table_days = cfg.windows.usage_table_days;
    let recent_values: Vec<f64> = history
        .iter()
        .rev()
        .take(table_days)
        .rev()
        .filter_map(|r| r.value)
        .collect();
    let text = format!(
        "{}\n{}\n{}",
        report::usage_table(&history, &cfg.calendar, table_days),
        report::sparkline(&recent_values),
        report::season_summary_text(summary.as_ref()),
    );
    let posted = engine.post(&text);

    Ok(WaterUsageOutcome {
        merge,
        history_len: history.len(),
        summary,
        posted,
    })
}

// ---------------------------------------------------------------------------
// Constant flow
// ---------------------------------------------------------------------------

/// Sustained-flow check over the last `continuity_hours`.
pub fn run_constant_flow_check(
    ctx: &JobContext<'_>,
    source: &mut dyn ReadingSource,
    now: NaiveDateTime,
) -> Result<FlowCondition, JobError> {
    let hours = ctx.config.windows.continuity_hours;
    let today = now.date();
    let engine = ctx.engine();

    engine.heartbeat(
        HEARTBEAT_CONSTANT_FLOW,
        today,
        &format!("❤️ Constant water check is running on {}.", today),
    );

    let since = now - Duration::hours(hours);
    let requests = [
        FetchRequest::new("min_check", Bucket::Minute, since, now),
        FetchRequest::new("hour_check", Bucket::Hour, since, now),
    ];
    let mut results = fetch_or_log(DataSource::Flume, "flow query", source.fetch_many(&requests))?;
    let hour_samples = results.pop().unwrap_or_default();
    let minute_samples = results.pop().unwrap_or_default();

    let fine = ingest::to_readings(SOURCE_WATER_CCF_MINUTE, Bucket::Minute, &minute_samples, gallons_to_ccf);
    let coarse = ingest::to_readings(SOURCE_WATER_CCF_HOUR, Bucket::Hour, &hour_samples, gallons_to_ccf);

    let condition = continuity::evaluate_flow_at(&fine, &coarse, Duration::hours(hours), now);
    logging::info(
        DataSource::Flume,
        Some(SOURCE_WATER_CCF_MINUTE),
        &format!(
            "{} minute samples, {} hourly samples: {:?}",
            fine.len(),
            coarse.len(),
            condition
        ),
    );
    engine.on_flow_condition(&condition, hours);
    Ok(condition)
}

// ---------------------------------------------------------------------------
// Chemistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub counts: IngestCounts,
    /// Tier of every newly appended reading.
    pub tiers: Vec<(String, Tier)>,
}

/// Logs the latest water test and alerts on new out-of-range fields.
pub fn run_chemistry_log(
    ctx: &JobContext<'_>,
    source: &mut dyn ChemistrySource,
    store: &mut dyn ReadingStore,
) -> Result<IngestOutcome, JobError> {
    let test = fetch_or_log(DataSource::Chemistry, "latest test", source.latest_test())?;
    logging::info(
        DataSource::Chemistry,
        None,
        &format!("latest test dated {}", test.test_date),
    );

    let mut engine = ctx.engine();
    let (counts, tiers) =
        ingest_readings(&mut engine, store, &test.to_readings(), DataSource::Chemistry)?;
    Ok(IngestOutcome { counts, tiers })
}

// ---------------------------------------------------------------------------
// Pump telemetry
// ---------------------------------------------------------------------------

/// Logs pump-house samples from the last `fetch_days` and alerts on new
/// out-of-range readings for any stream with a configured range.
pub fn run_pump_telemetry(
    ctx: &JobContext<'_>,
    samples: &[PumpSample],
    store: &mut dyn ReadingStore,
    now: NaiveDateTime,
) -> Result<IngestOutcome, JobError> {
    let cutoff = now - Duration::days(ctx.config.windows.fetch_days);
    let readings: Vec<Reading> = samples
        .iter()
        .filter(|s| s.read_at.is_on_or_after(cutoff))
        .flat_map(|s| s.to_readings())
        .collect();

    let skipped = samples.len() - samples.iter().filter(|s| s.read_at.is_on_or_after(cutoff)).count();
    if skipped > 0 {
        logging::debug(
            DataSource::Pumphouse,
            None,
            &format!("{} samples older than {} days ignored", skipped, ctx.config.windows.fetch_days),
        );
    }

    let mut engine = ctx.engine();
    let (counts, tiers) = ingest_readings(&mut engine, store, &readings, DataSource::Pumphouse)?;
    Ok(IngestOutcome { counts, tiers })
}

// ---------------------------------------------------------------------------
// Season report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonReport {
    pub generated_for: NaiveDate,
    pub window_samples: usize,
    pub current: Option<SeasonSummary>,
    pub seasons: Vec<SeasonSeries>,
}

/// Builds the cross-season comparison and writes it as JSON to `output`.
pub fn season_report(
    config: &AppConfig,
    store: &mut dyn ReadingStore,
    today: NaiveDate,
    output: &Path,
) -> Result<SeasonReport, JobError> {
    let history = store.load_all(SOURCE_WATER_CCF)?;
    let window = config.windows.rolling_window_samples;

    let report = SeasonReport {
        generated_for: today,
        window_samples: window,
        current: seasons::summarize(
            &history,
            &config.calendar,
            today,
            config.windows.trailing_average_days,
        ),
        seasons: seasons::compare_seasons(&history, &config.calendar, window),
    };

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, serde_json::to_string_pretty(&report)?)?;
    logging::info(
        DataSource::System,
        Some(SOURCE_WATER_CCF),
        &format!("wrote {} season series to {}", report.seasons.len(), output.display()),
    );
    Ok(report)
}
