/// Pool water chemistry tests
///
/// A test is one dated record with ten numeric fields and an "in store"
/// flag. The testing service reports "N/A" for fields it did not measure;
/// by policy those are logged as 0. Any other non-numeric field is a
/// missing reading.

use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;

use super::parse_raw_value;
use crate::model::{CHEMISTRY_FIELDS, FetchError, Reading, ReadingTime, SOURCE_CHEM_IN_STORE};

/// One water test.
#[derive(Debug, Clone, PartialEq)]
pub struct ChemistryTest {
    pub test_date: NaiveDate,
    pub free_chlorine: Option<f64>,
    pub total_chlorine: Option<f64>,
    pub ph: Option<f64>,
    pub alkalinity: Option<f64>,
    pub calcium: Option<f64>,
    pub cyanuric_acid: Option<f64>,
    pub iron: Option<f64>,
    pub copper: Option<f64>,
    pub phosphates: Option<f64>,
    pub salt: Option<f64>,
    pub in_store: Option<bool>,
}

/// Field value with the "N/A" policy applied.
pub fn parse_chemistry_field(raw: &Value) -> Option<f64> {
    match raw {
        Value::String(s) if s.trim().eq_ignore_ascii_case("n/a") => Some(0.0),
        other => parse_raw_value(other),
    }
}

fn parse_flag(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl ChemistryTest {
    /// Builds a test from the service's JSON record.
    ///
    /// `test_date` is required (`MM/DD/YYYY` or ISO); every other field may
    /// be absent.
    pub fn from_json(record: &Value) -> Result<Self, FetchError> {
        let raw_date = record
            .get("test_date")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::ParseError("chemistry record has no test_date".to_string()))?;
        let test_date = raw_date
            .parse::<ReadingTime>()
            .map_err(FetchError::ParseError)?
            .date();

        let field = |name: &str| record.get(name).and_then(parse_chemistry_field);

        Ok(Self {
            test_date,
            free_chlorine: field("free_chlorine"),
            total_chlorine: field("total_chlorine"),
            ph: field("ph"),
            alkalinity: field("alkalinity"),
            calcium: field("calcium"),
            cyanuric_acid: field("cyanuric_acid"),
            iron: field("iron"),
            copper: field("copper"),
            phosphates: field("phosphates"),
            salt: field("salt"),
            in_store: record.get("in_store").and_then(parse_flag),
        })
    }

    /// Numeric fields paired with their source keys, in log column order.
    pub fn fields(&self) -> [(&'static str, Option<f64>); 10] {
        [
            (CHEMISTRY_FIELDS[0], self.free_chlorine),
            (CHEMISTRY_FIELDS[1], self.total_chlorine),
            (CHEMISTRY_FIELDS[2], self.ph),
            (CHEMISTRY_FIELDS[3], self.alkalinity),
            (CHEMISTRY_FIELDS[4], self.calcium),
            (CHEMISTRY_FIELDS[5], self.cyanuric_acid),
            (CHEMISTRY_FIELDS[6], self.iron),
            (CHEMISTRY_FIELDS[7], self.copper),
            (CHEMISTRY_FIELDS[8], self.phosphates),
            (CHEMISTRY_FIELDS[9], self.salt),
        ]
    }

    /// One dated reading per field, plus the in-store flag as 1.0 / 0.0.
    pub fn to_readings(&self) -> Vec<Reading> {
        let when = ReadingTime::Day(self.test_date);
        let mut readings: Vec<Reading> = self
            .fields()
            .iter()
            .map(|(key, value)| Reading::new(*key, when, *value))
            .collect();
        readings.push(Reading::new(
            SOURCE_CHEM_IN_STORE,
            when,
            self.in_store.map(|b| if b { 1.0 } else { 0.0 }),
        ));
        readings
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Something that can produce the most recent water test.
pub trait ChemistrySource {
    fn latest_test(&mut self) -> Result<ChemistryTest, FetchError>;
}

/// Fetches the latest test record as JSON over HTTP with basic auth.
pub struct ChemistryHttpSource {
    client: reqwest::blocking::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl ChemistryHttpSource {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
        })
    }
}

impl ChemistrySource for ChemistryHttpSource {
    fn latest_test(&mut self) -> Result<ChemistryTest, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()?;

        match response.status().as_u16() {
            401 | 403 => {
                return Err(FetchError::AuthFailed(format!(
                    "chemistry service answered {}",
                    response.status()
                )));
            }
            s if !response.status().is_success() => return Err(FetchError::HttpError(s)),
            _ => {}
        }

        let body: Value = response.json()?;
        // Some deployments wrap the record in `data`.
        let record = body.get("data").unwrap_or(&body);
        ChemistryTest::from_json(record)
    }
}
