//! Range classification and threshold alerts.
//!
//! `classify` maps a metric and value onto a `Tier`. `check_reading` wraps
//! that into a `ThresholdAlert` naming the violated bound, which the alert
//! engine turns into a notification.

use std::fmt;

use serde::Serialize;

use crate::model::{RangeSpec, Reading, ReadingTime};
use crate::ranges::RangeTable;

/// Severity of a reading relative to its target and closure bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tier {
    /// Within target.
    Ok,
    /// Outside target but within closure.
    Caution,
    /// Outside closure, or outside target when no closure is defined.
    Alert,
    /// Missing value, or no range defined for the metric.
    Unknown,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Ok => write!(f, "OK"),
            Tier::Caution => write!(f, "CAUTION"),
            Tier::Alert => write!(f, "ALERT"),
            Tier::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classifies a present value against one range.
///
/// Boundaries are inclusive to the tighter band: a value equal to a target
/// edge is OK, a value equal to a closure edge (outside target) is CAUTION.
/// Without a closure band there is no caution tier.
pub fn classify_value(spec: &RangeSpec, value: f64) -> Tier {
    if !value.is_finite() {
        return Tier::Unknown;
    }
    if spec.target.contains(value) {
        return Tier::Ok;
    }
    match &spec.closure {
        Some(closure) if closure.contains(value) => Tier::Caution,
        _ => Tier::Alert,
    }
}

/// Classifies `value` for `metric`.
///
/// Returns `Unknown` if the value is missing or the metric has no range.
pub fn classify(ranges: &RangeTable, metric: &str, value: Option<f64>) -> Tier {
    match (ranges.get(metric), value) {
        (Some(spec), Some(v)) => classify_value(spec, v),
        _ => Tier::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Threshold alerts
// ---------------------------------------------------------------------------

/// The band edge a reading crossed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    TargetLow(f64),
    TargetHigh(f64),
    ClosureLow(f64),
    ClosureHigh(f64),
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::TargetLow(v) => write!(f, "below target low {}", v),
            Bound::TargetHigh(v) => write!(f, "above target high {}", v),
            Bound::ClosureLow(v) => write!(f, "below closure limit {}", v),
            Bound::ClosureHigh(v) => write!(f, "above closure limit {}", v),
        }
    }
}

/// Returns the outermost bound `value` violates, or `None` inside target.
pub fn violated_bound(spec: &RangeSpec, value: f64) -> Option<Bound> {
    let below = value < spec.target.low;
    match (classify_value(spec, value), spec.closure) {
        (Tier::Caution, _) | (Tier::Alert, None) => Some(if below {
            Bound::TargetLow(spec.target.low)
        } else {
            Bound::TargetHigh(spec.target.high)
        }),
        (Tier::Alert, Some(closure)) => Some(if below {
            Bound::ClosureLow(closure.low)
        } else {
            Bound::ClosureHigh(closure.high)
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPriority {
    Low,
    High,
}

/// A reading that left its target band.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdAlert {
    pub metric: String,
    pub timestamp: ReadingTime,
    pub value: f64,
    pub tier: Tier,
    pub bound: Bound,
}

impl ThresholdAlert {
    pub fn priority(&self) -> AlertPriority {
        match self.tier {
            Tier::Alert => AlertPriority::High,
            _ => AlertPriority::Low,
        }
    }

    /// Notification text: metric, value, and the violated bound.
    pub fn message(&self) -> String {
        match self.priority() {
            AlertPriority::High => format!(
                "🚨 *{} alert*: `{}` = {} on {} ({})",
                label(&self.metric),
                self.metric,
                self.value,
                self.timestamp,
                self.bound
            ),
            AlertPriority::Low => format!(
                "⚠️ {} caution: `{}` = {} on {} ({})",
                label(&self.metric),
                self.metric,
                self.value,
                self.timestamp,
                self.bound
            ),
        }
    }
}

/// Checks one reading and returns an alert for CAUTION or ALERT tiers.
///
/// Returns `None` for OK and UNKNOWN.
pub fn check_reading(ranges: &RangeTable, reading: &Reading) -> Option<ThresholdAlert> {
    let spec = ranges.get(&reading.source_key)?;
    let value = reading.value?;
    let tier = classify_value(spec, value);
    if !matches!(tier, Tier::Caution | Tier::Alert) {
        return None;
    }
    let bound = violated_bound(spec, value)?;
    Some(ThresholdAlert {
        metric: reading.source_key.clone(),
        timestamp: reading.timestamp,
        value,
        tier,
        bound,
    })
}

/// "free_chlorine" -> "Free chlorine"
fn label(metric: &str) -> String {
    let spaced = metric.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Band;
    use chrono::NaiveDate;

    fn ph() -> RangeSpec {
        RangeSpec::new(Band::new(7.2, 7.8), Some(Band::new(6.8, 8.2)))
    }

    fn salt() -> RangeSpec {
        RangeSpec::new(Band::new(2500.0, 3500.0), None)
    }

    fn table() -> RangeTable {
        RangeTable::from_specs([("ph", ph()), ("salt", salt())]).unwrap()
    }

    fn reading(metric: &str, value: Option<f64>) -> Reading {
        Reading::new(
            metric,
            ReadingTime::Day(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()),
            value,
        )
    }

    // --- Tiers --------------------------------------------------------------

    #[test]
    fn test_worked_example_tiers() {
        assert_eq!(classify_value(&ph(), 7.5), Tier::Ok);
        assert_eq!(classify_value(&ph(), 8.0), Tier::Caution);
        assert_eq!(classify_value(&ph(), 8.5), Tier::Alert);
    }

    #[test]
    fn test_target_edges_are_ok() {
        assert_eq!(classify_value(&ph(), 7.2), Tier::Ok);
        assert_eq!(classify_value(&ph(), 7.8), Tier::Ok);
        assert_eq!(classify_value(&salt(), 2500.0), Tier::Ok);
        assert_eq!(classify_value(&salt(), 3500.0), Tier::Ok);
    }

    #[test]
    fn test_closure_edges_are_caution_and_beyond_is_alert() {
        assert_eq!(classify_value(&ph(), 6.8), Tier::Caution);
        assert_eq!(classify_value(&ph(), 8.2), Tier::Caution);
        assert_eq!(classify_value(&ph(), 6.8 - 1e-9), Tier::Alert);
        assert_eq!(classify_value(&ph(), 8.2 + 1e-9), Tier::Alert);
    }

    #[test]
    fn test_no_closure_band_means_alert_outside_target() {
        assert_eq!(classify_value(&salt(), 2499.0), Tier::Alert);
        assert_eq!(classify_value(&salt(), 3600.0), Tier::Alert);
    }

    #[test]
    fn test_missing_value_and_unknown_metric_are_unknown() {
        let t = table();
        assert_eq!(classify(&t, "ph", None), Tier::Unknown);
        assert_eq!(classify(&t, "turbidity", Some(1.0)), Tier::Unknown);
        assert_eq!(classify(&t, "ph", Some(f64::NAN)), Tier::Unknown);
    }

    // --- Bounds and alerts --------------------------------------------------

    #[test]
    fn test_violated_bound_names_closure_for_alert() {
        assert_eq!(violated_bound(&ph(), 8.5), Some(Bound::ClosureHigh(8.2)));
        assert_eq!(violated_bound(&ph(), 6.0), Some(Bound::ClosureLow(6.8)));
        assert_eq!(violated_bound(&ph(), 8.0), Some(Bound::TargetHigh(7.8)));
        assert_eq!(violated_bound(&salt(), 2000.0), Some(Bound::TargetLow(2500.0)));
        assert_eq!(violated_bound(&ph(), 7.5), None);
    }

    #[test]
    fn test_check_reading_returns_high_priority_for_alert() {
        let alert = check_reading(&table(), &reading("ph", Some(8.5)))
            .expect("pH 8.5 is outside closure");
        assert_eq!(alert.tier, Tier::Alert);
        assert_eq!(alert.priority(), AlertPriority::High);
        let msg = alert.message();
        assert!(msg.contains("ph"), "message should name the metric: {}", msg);
        assert!(msg.contains("8.5"), "message should carry the value: {}", msg);
        assert!(msg.contains("8.2"), "message should name the bound: {}", msg);
    }

    #[test]
    fn test_check_reading_returns_low_priority_for_caution() {
        let alert = check_reading(&table(), &reading("ph", Some(8.0))).expect("caution");
        assert_eq!(alert.priority(), AlertPriority::Low);
    }

    #[test]
    fn test_check_reading_ignores_ok_and_unknown() {
        assert!(check_reading(&table(), &reading("ph", Some(7.4))).is_none());
        assert!(check_reading(&table(), &reading("ph", None)).is_none());
        assert!(check_reading(&table(), &reading("iron", Some(9.0))).is_none());
    }

    #[test]
    fn test_label_humanizes_metric_key() {
        assert_eq!(label("free_chlorine"), "Free chlorine");
        assert_eq!(label(""), "");
    }
}
