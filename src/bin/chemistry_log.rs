//! Logs the latest pool water test and alerts on out-of-range fields.

use anyhow::Result;
use poolmon_service::config::{self, AppConfig};
use poolmon_service::ingest::chemistry::ChemistryHttpSource;
use poolmon_service::jobs::{self, JobContext};
use poolmon_service::logging::{self, LogLevel};
use poolmon_service::model::ConfigError;
use poolmon_service::notify;

fn main() -> Result<()> {
    config::load_dotenv();
    logging::init_logger(LogLevel::Info, config::env_lookup("POOLMON_LOG_FILE").as_deref())?;

    let cfg = AppConfig::load()?;
    let endpoint = cfg
        .chemistry
        .endpoint
        .clone()
        .ok_or_else(|| ConfigError::Missing("chemistry.endpoint".to_string()))?;
    let slack = config::slack_settings(&config::env_lookup, cfg.alerts.silent)?;
    let credentials = config::chemistry_credentials(&config::env_lookup)?;

    let notifier = notify::build_notifier(cfg.alerts.silent, &slack.token)?;
    let mut store = jobs::open_store(&cfg.storage, &config::env_lookup)?;
    let mut source =
        ChemistryHttpSource::new(endpoint, credentials.username, credentials.password)?;

    let ctx = JobContext::new(&cfg, notifier.as_ref(), slack.channels());
    let outcome = jobs::run_chemistry_log(&ctx, &mut source, store.as_mut())?;

    for (metric, tier) in &outcome.tiers {
        tracing::info!(metric = %metric, tier = %tier, "classified");
    }
    Ok(())
}
