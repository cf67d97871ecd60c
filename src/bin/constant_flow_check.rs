//! Constant-flow check: alerts when every minute of the trailing window
//! shows water flowing.

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
    let mut flume = FlumeClient::connect(&credentials)?;

    let ctx = JobContext::new(&cfg, notifier.as_ref(), slack.channels());
    let condition = jobs::run_constant_flow_check(&ctx, &mut flume, cfg.now_local())?;

    tracing::info!(condition = ?condition, "constant flow check complete");
    Ok(())
}
