//! Shared fakes for the job pipeline tests.
//!
//! Sources answer from canned samples, the notifier records every message
//! by channel, and the config points all state at a temp directory.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use poolmon_service::alert::Channels;
use poolmon_service::config::AppConfig;
use poolmon_service::ingest::chemistry::{ChemistrySource, ChemistryTest};
use poolmon_service::ingest::{FetchRequest, RawSample, ReadingSource};
use poolmon_service::model::{FetchError, NotifyError};
use poolmon_service::notify::Notifier;
use poolmon_service::store::CsvReadingStore;
use serde_json::Value;

pub const ALERTS: &str = "C_ALERTS";
pub const HEARTBEAT: &str = "C_HEARTBEAT";

pub fn channels() -> Channels {
    Channels {
        alerts: ALERTS.to_string(),
        heartbeat: HEARTBEAT.to_string(),
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Config and store
// ---------------------------------------------------------------------------

/// Config with the 2023-2025 seasons and every directory under `root`.
pub fn test_config(root: &Path) -> AppConfig {
    let text = format!(
        r#"
timezone = "America/Chicago"

[storage]
log_dir = "{root}/logs"
backup_dir = "{root}/log_backup"
backup_retention = 3
heartbeat_dir = "{root}/heartbeats"

[[seasons]]
label = "2023"
open_date = "2023-05-26"
close_date = "2023-09-04"
unit_rate = 5.60

[[seasons]]
label = "2024"
open_date = "2024-05-24"
close_date = "2024-09-01"
unit_rate = 6.15

[[seasons]]
label = "2025"
open_date = "2025-05-23"
close_date = "2025-08-31"
unit_rate = 6.70

[ranges.flow_gpm]
target = [40.0, 80.0]
closure = [20.0, 100.0]
"#,
        root = root.display()
    );
    text.parse().expect("test config should parse")
}

/// Same as `test_config` but with the built-in chemistry ranges.
pub fn chemistry_config(root: &Path) -> AppConfig {
    let text = format!(
        r#"
[storage]
log_dir = "{root}/logs"
backup_dir = "{root}/log_backup"
heartbeat_dir = "{root}/heartbeats"

[[seasons]]
label = "2024"
open_date = "2024-05-24"
close_date = "2024-09-01"
unit_rate = 6.15
"#,
        root = root.display()
    );
    text.parse().expect("test config should parse")
}

pub fn open_store(config: &AppConfig) -> CsvReadingStore {
    CsvReadingStore::open(
        config.storage.log_dir.clone(),
        config.storage.backup_dir.clone(),
        config.storage.backup_retention,
    )
    .expect("store should open")
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: RefCell<Vec<(String, String)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn messages_to(&self, channel: &str) -> Vec<String> {
        self.sent
            .borrow()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, channel_id: &str, text: &str) -> Result<(), NotifyError> {
        self.sent
            .borrow_mut()
            .push((channel_id.to_string(), text.to_string()));
        if self.fail {
            Err(NotifyError::HttpError(503))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Answers each request from the samples registered under its request id.
#[derive(Default)]
pub struct FakeSource {
    pub responses: HashMap<String, Vec<RawSample>>,
    pub requests: Vec<FetchRequest>,
    pub fail_with: Option<u16>,
}

impl FakeSource {
    pub fn with(mut self, request_id: &str, samples: &[(&str, Value)]) -> Self {
        self.responses.insert(
            request_id.to_string(),
            samples
                .iter()
                .map(|(ts, v)| RawSample::new(*ts, v.clone()))
                .collect(),
        );
        self
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_with: Some(status),
            ..Default::default()
        }
    }
}

impl ReadingSource for FakeSource {
    fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<RawSample>, FetchError> {
        self.requests.push(request.clone());
        if let Some(status) = self.fail_with {
            return Err(FetchError::HttpError(status));
        }
        Ok(self
            .responses
            .get(&request.request_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Hands out queued test records, newest last.
pub struct FakeChemistry {
    pub tests: Vec<Value>,
}

impl FakeChemistry {
    pub fn new(record: Value) -> Self {
        Self {
            tests: vec![record],
        }
    }
}

impl ChemistrySource for FakeChemistry {
    fn latest_test(&mut self) -> Result<ChemistryTest, FetchError> {
        match self.tests.last() {
            Some(record) => ChemistryTest::from_json(record),
            None => Err(FetchError::HttpError(404)),
        }
    }
}
