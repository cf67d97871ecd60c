//! Residential pool monitoring: water usage, water chemistry and pump-house
//! telemetry, logged by scheduled batch jobs with range and flow alerts.

pub mod alert;
pub mod analysis;
pub mod config;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod notify;
pub mod ranges;
pub mod report;
pub mod store;
