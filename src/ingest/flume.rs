/// Flume Water Meter API Client
///
/// Authenticates with the OAuth password grant, resolves the account's
/// meter (device type 2), and queries usage buckets. The API reports
/// gallons; readings are stored in CCF.
///
/// Query times are sent in pool-local time, which is what the meter's
/// buckets are aligned to.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{FetchRequest, RawSample, ReadingSource};
use crate::logging::{self, DataSource};
use crate::model::{FetchError, GALLONS_PER_CCF};

const FLUME_BASE_URL: &str = "https://api.flumetech.com";
const METER_DEVICE_TYPE: i64 = 2;
const QUERY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Keys in a query result entry that are metadata, not a request id.
const RESULT_META_KEYS: &[&str] = &["request_id", "success", "code", "message"];

// ============================================================================
// Flume API Response Structures
// ============================================================================

/// Every Flume response wraps its payload in `data`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct DeviceData {
    id: String,
    #[serde(rename = "type")]
    device_type: i64,
}

#[derive(Debug, Clone)]
pub struct FlumeCredentials {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
}

// ============================================================================
// Conversion
// ============================================================================

/// Gallons to CCF, rounded to 4 decimals.
pub fn gallons_to_ccf(gallons: f64) -> f64 {
    (gallons / GALLONS_PER_CCF * 10_000.0).round() / 10_000.0
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Extracts the samples for `request_id` from a query response body.
///
/// Shape: `{"data":[{"<request_id>":[{"datetime":..,"value":..}, ...]}]}`.
/// A request id absent from the response yields an empty list; a body
/// without a `data` array is a parse error.
pub fn parse_query_response(body: &Value, request_id: &str) -> Result<Vec<RawSample>, FetchError> {
    let entries = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::ParseError("query response has no data array".to_string()))?;

    let Some(samples) = entries.iter().find_map(|entry| {
        entry
            .as_object()?
            .iter()
            .find(|(key, _)| key.as_str() == request_id && !RESULT_META_KEYS.contains(&key.as_str()))
            .map(|(_, v)| v)
    }) else {
        return Ok(Vec::new());
    };

    let samples = samples.as_array().ok_or_else(|| {
        FetchError::ParseError(format!("result for '{}' is not an array", request_id))
    })?;

    samples
        .iter()
        .map(|s| {
            let timestamp = s.get("datetime").and_then(Value::as_str).ok_or_else(|| {
                FetchError::ParseError(format!("sample in '{}' has no datetime", request_id))
            })?;
            Ok(RawSample::new(
                timestamp,
                s.get("value").cloned().unwrap_or(Value::Null),
            ))
        })
        .collect()
}

// ============================================================================
// API Client
// ============================================================================

/// An authenticated session bound to one meter.
pub struct FlumeClient {
    client: reqwest::blocking::Client,
    base_url: String,
    access_token: String,
    user_id: i64,
    device_id: String,
}

impl FlumeClient {
    pub fn connect(credentials: &FlumeCredentials) -> Result<Self, FetchError> {
        Self::connect_to(FLUME_BASE_URL, credentials)
    }

    /// Authenticates against `base_url` and resolves the meter device.
    pub fn connect_to(base_url: &str, credentials: &FlumeCredentials) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let response = client
            .post(format!("{}/oauth/token", base_url))
            .form(&[
                ("grant_type", "password"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()?;
        if !response.status().is_success() {
            return Err(FetchError::AuthFailed(format!(
                "token endpoint answered {}",
                response.status()
            )));
        }
        let token: Envelope<TokenData> = response.json()?;
        let access_token = token
            .data
            .into_iter()
            .next()
            .map(|t| t.access_token)
            .ok_or_else(|| FetchError::AuthFailed("no access token returned".to_string()))?;

        let mut session = Self {
            client,
            base_url,
            access_token,
            user_id: 0,
            device_id: String::new(),
        };

        let me: Envelope<UserData> = session.get_json("/me")?;
        session.user_id = me
            .data
            .into_iter()
            .next()
            .map(|u| u.id)
            .ok_or_else(|| FetchError::ParseError("no user returned by /me".to_string()))?;

        let devices: Envelope<DeviceData> =
            session.get_json(&format!("/users/{}/devices", session.user_id))?;
        session.device_id = devices
            .data
            .into_iter()
            .find(|d| d.device_type == METER_DEVICE_TYPE)
            .map(|d| d.id)
            .ok_or_else(|| {
                FetchError::NoDevice(format!("user {} has no meter device", session.user_id))
            })?;

        logging::debug(
            DataSource::Flume,
            None,
            &format!("authenticated as user {}, meter {}", session.user_id, session.device_id),
        );
        Ok(session)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token)
            .send()?;
        if !response.status().is_success() {
            return Err(FetchError::HttpError(response.status().as_u16()));
        }
        Ok(response.json()?)
    }

    /// Runs all `requests` in one query call. Results come back in request order.
    pub fn query(&self, requests: &[FetchRequest]) -> Result<Vec<Vec<RawSample>>, FetchError> {
        let queries: Vec<Value> = requests
            .iter()
            .map(|r| {
                json!({
                    "request_id": r.request_id,
                    "bucket": r.bucket.api_name(),
                    "since_datetime": r.since.format(QUERY_TIME_FORMAT).to_string(),
                    "until_datetime": r.until.format(QUERY_TIME_FORMAT).to_string(),
                })
            })
            .collect();

        let url = format!(
            "{}/users/{}/devices/{}/query",
            self.base_url, self.user_id, self.device_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "queries": queries }))
            .send()?;
        if !response.status().is_success() {
            return Err(FetchError::HttpError(response.status().as_u16()));
        }
        let body: Value = response.json()?;

        requests
            .iter()
            .map(|r| parse_query_response(&body, &r.request_id))
            .collect()
    }
}

impl ReadingSource for FlumeClient {
    fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<RawSample>, FetchError> {
        Ok(self
            .query(std::slice::from_ref(request))?
            .pop()
            .unwrap_or_default())
    }

    fn fetch_many(&mut self, requests: &[FetchRequest]) -> Result<Vec<Vec<RawSample>>, FetchError> {
        self.query(requests)
    }
}

// ============================================================================
// Tests
// ============================================================================
