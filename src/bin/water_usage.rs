//! Daily water usage: heartbeat, 30-day fetch from the Flume meter, merge
//! into the usage log, post the usage table and season projection.

use anyhow::Result;
use poolmon_service::config::{self, AppConfig};
use poolmon_service::ingest::flume::FlumeClient;
use poolmon_service::jobs::{self, JobContext};
use poolmon_service::logging::{self, LogLevel};
use poolmon_service::notify;

fn main() -> Result<()> {
    config::load_dotenv();
    logging::init_logger(LogLevel::Info, config::env_lookup("POOLMON_LOG_FILE").as_deref())?;

    let cfg = AppConfig::load()?;
    let slack = config::slack_settings(&config::env_lookup, cfg.alerts.silent)?;
    let credentials = config::flume_credentials(&config::env_lookup)?;

    let notifier = notify::build_notifier(cfg.alerts.silent, &slack.token)?;
    let mut store = jobs::open_store(&cfg.storage, &config::env_lookup)?;
    let mut flume = FlumeClient::connect(&credentials)?;

    let ctx = JobContext::new(&cfg, notifier.as_ref(), slack.channels());
    let outcome = jobs::run_water_usage(&ctx, &mut flume, store.as_mut(), cfg.now_local())?;

    tracing::info!(
        inserted = outcome.merge.inserted,
        overwritten = outcome.merge.overwritten,
        history = outcome.history_len,
        posted = outcome.posted,
        "water usage run complete"
    );
    Ok(())
}
