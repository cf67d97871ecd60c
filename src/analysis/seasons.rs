//! Season calendar, cost-to-date, projection, and rolling comparison.
//!
//! # Clock injection
//! Every function takes `today` instead of reading the clock.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::model::{ConfigError, Reading, SeasonWindow};

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

/// Validated, date-ordered set of non-overlapping seasons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeasonCalendar {
    seasons: Vec<SeasonWindow>,
}

impl SeasonCalendar {
    /// Sorts by open date and rejects inverted or overlapping seasons.
    pub fn new(mut seasons: Vec<SeasonWindow>) -> Result<Self, ConfigError> {
        seasons.sort_by_key(|s| s.open_date);

        for s in &seasons {
            if s.open_date > s.close_date {
                return Err(ConfigError::Invalid(format!(
                    "season '{}' closes ({}) before it opens ({})",
                    s.label, s.close_date, s.open_date
                )));
            }
            if !s.unit_rate.is_finite() || s.unit_rate < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "season '{}' has invalid unit_rate {}",
                    s.label, s.unit_rate
                )));
            }
        }
        for pair in seasons.windows(2) {
            if pair[1].open_date <= pair[0].close_date {
                return Err(ConfigError::Invalid(format!(
                    "seasons '{}' and '{}' overlap",
                    pair[0].label, pair[1].label
                )));
            }
        }
        Ok(Self { seasons })
    }

    pub fn seasons(&self) -> &[SeasonWindow] {
        &self.seasons
    }

    pub fn is_empty(&self) -> bool {
        self.seasons.is_empty()
    }

    /// The season whose `[open_date, close_date]` contains `date`.
    pub fn season_for(&self, date: NaiveDate) -> Option<&SeasonWindow> {
        self.seasons.iter().find(|s| s.contains(date))
    }

    /// Unit rate of the season opening in `date`'s calendar year, or 0.
    ///
    /// Used to price any day of that year, in or out of season.
    pub fn rate_for_date(&self, date: NaiveDate) -> f64 {
        self.seasons
            .iter()
            .find(|s| s.open_date.year() == date.year())
            .map(|s| s.unit_rate)
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonSummary {
    pub label: String,
    pub unit_rate: f64,
    /// Sum of present values in `[open_date, today]`.
    pub usage_so_far: f64,
    pub cost_so_far: f64,
    pub recent_daily_average: f64,
    /// `close_date - today + 1`, counting both ends.
    pub days_remaining: i64,
    pub projected_remaining_cost: f64,
}

/// Mean of present values dated in `(today - days, today]`; 0 if none.
pub fn recent_daily_average(readings: &[Reading], today: NaiveDate, days: i64) -> f64 {
    let since = today - Duration::days(days);
    let recent: Vec<f64> = readings
        .iter()
        .filter(|r| {
            let d = r.timestamp.date();
            d > since && d <= today
        })
        .filter_map(|r| r.value)
        .collect();

    if recent.is_empty() {
        0.0
    } else {
        recent.iter().sum::<f64>() / recent.len() as f64
    }
}

/// Summarizes the season containing `today`, or `None` out of season.
pub fn summarize(
    readings: &[Reading],
    calendar: &SeasonCalendar,
    today: NaiveDate,
    trailing_days: i64,
) -> Option<SeasonSummary> {
    let season = calendar.season_for(today)?;

    let usage_so_far: f64 = readings
        .iter()
        .filter(|r| {
            let d = r.timestamp.date();
            d >= season.open_date && d <= today
        })
        .filter_map(|r| r.value)
        .sum();
    let recent = recent_daily_average(readings, today, trailing_days);
    let days_remaining = (season.close_date - today).num_days() + 1;

    Some(SeasonSummary {
        label: season.label.clone(),
        unit_rate: season.unit_rate,
        usage_so_far,
        cost_so_far: usage_so_far * season.unit_rate,
        recent_daily_average: recent,
        days_remaining,
        projected_remaining_cost: recent * days_remaining as f64 * season.unit_rate,
    })
}

// ---------------------------------------------------------------------------
// Rolling comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingPoint {
    pub days_since_open: i64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonSeries {
    pub label: String,
    pub points: Vec<RollingPoint>,
}

/// Rolling mean over `window` consecutive samples, aligned by days since
/// the season opened.
///
/// Uses present readings from the season's calendar year dated on or after
/// `open_date`. A point is emitted once `window` samples are available.
pub fn rolling_series(readings: &[Reading], season: &SeasonWindow, window: usize) -> SeasonSeries {
    let mut samples: Vec<(NaiveDate, f64)> = readings
        .iter()
        .filter_map(|r| r.value.map(|v| (r.timestamp.date(), v)))
        .filter(|(d, _)| d.year() == season.open_date.year() && *d >= season.open_date)
        .collect();
    samples.sort_by_key(|(d, _)| *d);

    let points = if window == 0 {
        Vec::new()
    } else {
        samples
            .windows(window)
            .map(|w| {
                let (last_date, _) = w[w.len() - 1];
                RollingPoint {
                    days_since_open: (last_date - season.open_date).num_days(),
                    average: w.iter().map(|(_, v)| v).sum::<f64>() / window as f64,
                }
            })
            .collect()
    };

    SeasonSeries {
        label: season.label.clone(),
        points,
    }
}

/// One rolling series per season in the calendar.
pub fn compare_seasons(
    readings: &[Reading],
    calendar: &SeasonCalendar,
    window: usize,
) -> Vec<SeasonSeries> {
    calendar
        .seasons()
        .iter()
        .map(|s| rolling_series(readings, s, window))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
