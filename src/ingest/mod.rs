/// Data ingestion from the pool's upstream sources.
///
/// Upstream payloads are untyped: every source hands back `RawSample`s
/// (a timestamp string and a raw JSON value) and this module turns them
/// into typed `Reading`s. A value that is not a finite number becomes a
/// missing reading; a timestamp that does not parse drops the sample.
///
/// Submodules:
/// - `flume`: household water meter (daily, hourly and minute buckets).
/// - `chemistry`: store water-test records.
/// - `pumphouse`: pump-house telemetry CSV exports.

pub mod chemistry;
pub mod flume;
pub mod pumphouse;

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::logging::{self, DataSource};
use crate::model::{FetchError, Reading, ReadingTime};

/// One upstream sample before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub timestamp: String,
    pub raw_value: Value,
}

impl RawSample {
    pub fn new(timestamp: impl Into<String>, raw_value: Value) -> Self {
        Self {
            timestamp: timestamp.into(),
            raw_value,
        }
    }
}

/// Aggregation bucket of a meter query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Day,
    Hour,
    Minute,
}

impl Bucket {
    pub fn api_name(&self) -> &'static str {
        match self {
            Bucket::Day => "DAY",
            Bucket::Hour => "HR",
            Bucket::Minute => "MIN",
        }
    }
}

/// One query against a time-series source. Times are pool-local.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub request_id: String,
    pub bucket: Bucket,
    pub since: NaiveDateTime,
    pub until: NaiveDateTime,
}

impl FetchRequest {
    pub fn new(
        request_id: impl Into<String>,
        bucket: Bucket,
        since: NaiveDateTime,
        until: NaiveDateTime,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            bucket,
            since,
            until,
        }
    }
}

/// A time-series source that answers `FetchRequest`s.
pub trait ReadingSource {
    fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<RawSample>, FetchError>;

    /// Answers several requests, in order. Sources that can batch override this.
    fn fetch_many(&mut self, requests: &[FetchRequest]) -> Result<Vec<Vec<RawSample>>, FetchError> {
        requests.iter().map(|r| self.fetch(r)).collect()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Numeric value of a raw JSON field, or `None` if absent or non-numeric.
///
/// Numeric strings are accepted ("7.4"); NaN and infinities are not.
pub fn parse_raw_value(raw: &Value) -> Option<f64> {
    let v = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Converts raw samples into readings for `source_key`.
///
/// `Bucket::Day` samples are keyed by calendar date; finer buckets keep the
/// full local timestamp. `scale` is applied to every present value.
pub fn to_readings(
    source_key: &str,
    bucket: Bucket,
    samples: &[RawSample],
    scale: impl Fn(f64) -> f64,
) -> Vec<Reading> {
    let mut readings = Vec::with_capacity(samples.len());
    for sample in samples {
        let timestamp = match sample.timestamp.parse::<ReadingTime>() {
            Ok(t) => t,
            Err(e) => {
                logging::warn(DataSource::System, Some(source_key), &format!("dropping sample: {}", e));
                continue;
            }
        };
        let timestamp = match bucket {
            Bucket::Day => ReadingTime::Day(timestamp.date()),
            Bucket::Hour | Bucket::Minute => match timestamp {
                ReadingTime::Day(d) => ReadingTime::At(d.and_time(chrono::NaiveTime::MIN)),
                at => at,
            },
        };
        let value = parse_raw_value(&sample.raw_value).map(&scale);
        if value.is_none() {
            logging::debug(
                DataSource::System,
                Some(source_key),
                &format!("missing or non-numeric value at {}: {}", timestamp, sample.raw_value),
            );
        }
        readings.push(Reading::new(source_key, timestamp, value));
    }
    readings
}
