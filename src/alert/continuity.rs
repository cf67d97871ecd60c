//! Continuous-flow detection for the household water meter.
//!
//! A leak, a stuck fill valve, or a hose left running shows up as water
//! flowing every single minute for hours. This module decides, from the
//! per-minute and per-hour meter buckets covering a trailing window,
//! whether the window shows sustained flow, a data discrepancy, or nothing.
//!
//! # Clock injection
//! `evaluate_flow_at` takes `now` rather than reading the clock, so tests
//! are deterministic without any time manipulation.

use chrono::{Duration, NaiveDateTime};

use crate::model::Reading;

/// Outcome of a continuity check over one trailing window.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowCondition {
    /// Every minute sample in the window showed flow.
    SustainedFlow { total_ccf: f64, samples: usize },
    /// The hourly total shows usage but no minute samples came back.
    Discrepancy { coarse_total_ccf: f64 },
    /// At least one idle (or missing) minute, or no usage at all.
    Quiet { samples: usize, idle_samples: usize },
}

/// Fine-grained samples inside `[now - window, now]`.
pub fn samples_in_window<'a>(
    fine: &'a [Reading],
    window: Duration,
    now: NaiveDateTime,
) -> Vec<&'a Reading> {
    let since = now - window;
    fine.iter()
        .filter(|r| r.timestamp.is_within(since, now))
        .collect()
}

/// Evaluates the trailing window ending at `now`.
///
/// Sustained flow requires a non-empty window where every minute sample is
/// present and strictly positive; a single zero or missing minute suppresses
/// it. The reported total is the hourly (coarse) sum when available, since
/// the minute buckets round small flows away.
///
/// If the minute samples are absent entirely but the hourly total is
/// positive, the result is `Discrepancy` instead. The two are never merged.
pub fn evaluate_flow_at(
    fine: &[Reading],
    coarse: &[Reading],
    window: Duration,
    now: NaiveDateTime,
) -> FlowCondition {
    let in_window = samples_in_window(fine, window, now);
    let coarse_total: f64 = coarse.iter().filter_map(|r| r.value).sum();
    let present: Vec<f64> = in_window.iter().filter_map(|r| r.value).collect();

    if present.is_empty() {
        if coarse_total > 0.0 {
            return FlowCondition::Discrepancy {
                coarse_total_ccf: coarse_total,
            };
        }
        return FlowCondition::Quiet {
            samples: in_window.len(),
            idle_samples: in_window.len(),
        };
    }

    let idle_samples = in_window
        .iter()
        .filter(|r| !r.value.is_some_and(|v| v > 0.0))
        .count();

    if idle_samples == 0 {
        let total_ccf = if coarse.is_empty() {
            present.iter().sum()
        } else {
            coarse_total
        };
        FlowCondition::SustainedFlow {
            total_ccf,
            samples: in_window.len(),
        }
    } else {
        FlowCondition::Quiet {
            samples: in_window.len(),
            idle_samples,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
