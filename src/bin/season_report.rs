//! Writes the rolling-average season comparison as JSON.
//!
//! Usage: season_report [output.json]

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use poolmon_service::config::{self, AppConfig};
use poolmon_service::jobs;
use poolmon_service::logging::{self, LogLevel};

fn main() -> Result<()> {
    config::load_dotenv();
    logging::init_logger(LogLevel::Info, config::env_lookup("POOLMON_LOG_FILE").as_deref())?;

    let cfg = AppConfig::load()?;
    let output = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.report.season_comparison_path.clone());

    let mut store = jobs::open_store(&cfg.storage, &config::env_lookup)?;
    let report = jobs::season_report(&cfg, store.as_mut(), cfg.now_local().date(), &output)?;

    for series in &report.seasons {
        tracing::info!(season = %series.label, points = series.points.len(), "season series");
    }
    Ok(())
}
