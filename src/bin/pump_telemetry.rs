//! Imports the pump-house telemetry export into the reading logs.
//!
//! Usage: pump_telemetry [export.csv]
//! Without an argument the path from `[pumphouse] export_path` is used.

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use poolmon_service::config::{self, AppConfig};
use poolmon_service::ingest::pumphouse;
use poolmon_service::jobs::{self, JobContext};
use poolmon_service::logging::{self, LogLevel};
use poolmon_service::notify;

fn main() -> Result<()> {
    config::load_dotenv();
    logging::init_logger(LogLevel::Info, config::env_lookup("POOLMON_LOG_FILE").as_deref())?;

    let cfg = AppConfig::load()?;
    let slack = config::slack_settings(&config::env_lookup, cfg.alerts.silent)?;
    let export_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.pumphouse.export_path.clone());

    let notifier = notify::build_notifier(cfg.alerts.silent, &slack.token)?;
    let mut store = jobs::open_store(&cfg.storage, &config::env_lookup)?;
    let samples = pumphouse::read_export(&export_path)?;

    let ctx = JobContext::new(&cfg, notifier.as_ref(), slack.channels());
    let outcome = jobs::run_pump_telemetry(&ctx, &samples, store.as_mut(), cfg.now_local())?;

    tracing::info!(
        appended = outcome.counts.appended,
        already_logged = outcome.counts.already_logged,
        "pump telemetry import complete"
    );
    Ok(())
}
