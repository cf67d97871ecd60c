//! Pump-house telemetry export.
//!
//! The pump-house controller exports a CSV with columns
//! `read_datetime, flow, vac_press, sys_press, f1_press`. Each row becomes
//! one timestamped reading per stream, plus a derived `combined_press`.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::logging::{self, DataSource};
use crate::model::{
    FetchError, Reading, ReadingTime, SOURCE_PUMP_COMBINED_PRESS, SOURCE_PUMP_F1_PRESS,
    SOURCE_PUMP_FLOW, SOURCE_PUMP_SYS_PRESS, SOURCE_PUMP_VAC_PRESS,
};

#[derive(Debug, Deserialize)]
struct ExportRow {
    read_datetime: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    flow: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    vac_press: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sys_press: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    f1_press: Option<f64>,
}

/// One telemetry row.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpSample {
    pub read_at: ReadingTime,
    pub flow: Option<f64>,
    pub vac_press: Option<f64>,
    pub sys_press: Option<f64>,
    pub f1_press: Option<f64>,
}

impl PumpSample {
    /// `vac_press + sys_press`; missing if either is missing.
    pub fn combined_press(&self) -> Option<f64> {
        Some(self.vac_press? + self.sys_press?)
    }

    pub fn to_readings(&self) -> Vec<Reading> {
        [
            (SOURCE_PUMP_FLOW, self.flow),
            (SOURCE_PUMP_VAC_PRESS, self.vac_press),
            (SOURCE_PUMP_SYS_PRESS, self.sys_press),
            (SOURCE_PUMP_F1_PRESS, self.f1_press),
            (SOURCE_PUMP_COMBINED_PRESS, self.combined_press()),
        ]
        .into_iter()
        .map(|(key, value)| Reading::new(key, self.read_at, value.filter(|v| v.is_finite())))
        .collect()
    }
}

/// Parses an export. Rows with an unparseable `read_datetime` are skipped
/// with a warning; a malformed CSV is a parse error.
pub fn parse_export<R: Read>(reader: R) -> Result<Vec<PumpSample>, FetchError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut samples = Vec::new();
    for row in csv_reader.deserialize::<ExportRow>() {
        let row = row.map_err(|e| FetchError::ParseError(e.to_string()))?;
        let read_at = match row.read_datetime.parse::<ReadingTime>() {
            // A date-only stamp still names a point in time.
            Ok(ReadingTime::Day(d)) => ReadingTime::At(d.and_time(chrono::NaiveTime::MIN)),
            Ok(at) => at,
            Err(e) => {
                logging::warn(DataSource::Pumphouse, None, &format!("skipping row: {}", e));
                continue;
            }
        };
        samples.push(PumpSample {
            read_at,
            flow: row.flow,
            vac_press: row.vac_press,
            sys_press: row.sys_press,
            f1_press: row.f1_press,
        });
    }

    samples.sort_by_key(|s| s.read_at);
    Ok(samples)
}

/// Reads and parses the export file at `path`.
pub fn read_export(path: &Path) -> Result<Vec<PumpSample>, FetchError> {
    let file = std::fs::File::open(path).map_err(|e| {
        FetchError::Request(format!("cannot open pump export {}: {}", path.display(), e))
    })?;
    parse_export(file)
}
