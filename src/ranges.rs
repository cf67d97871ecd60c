//! Range registry for the pool monitoring service.
//!
//! Holds the target/closure bands for every metric the service classifies.
//! The built-in table covers the chemistry test fields; pump telemetry and
//! overrides come from `[ranges.<metric>]` in the config file. All other
//! modules look bands up here rather than hardcoding numbers.

use std::collections::BTreeMap;

use crate::model::{Band, ConfigError, RangeSpec};

// ---------------------------------------------------------------------------
// Built-in chemistry ranges
// ---------------------------------------------------------------------------

/// A compiled-in range for one metric.
pub struct DefaultRange {
    pub metric: &'static str,
    pub spec: RangeSpec,
}

/// Residential pool chemistry targets, with closure limits where the local
/// health code defines one. Metrics without a closure band go straight from
/// OK to ALERT outside their target.
pub static CHEMISTRY_DEFAULTS: &[DefaultRange] = &[
    DefaultRange {
        metric: "free_chlorine",
        spec: RangeSpec::new(Band::new(1.0, 4.0), Some(Band::new(0.5, 10.0))),
    },
    DefaultRange {
        metric: "total_chlorine",
        spec: RangeSpec::new(Band::new(1.0, 4.0), None),
    },
    DefaultRange {
        metric: "ph",
        spec: RangeSpec::new(Band::new(7.2, 7.8), Some(Band::new(6.8, 8.2))),
    },
    DefaultRange {
        metric: "alkalinity",
        spec: RangeSpec::new(Band::new(80.0, 120.0), None),
    },
    DefaultRange {
        metric: "calcium",
        spec: RangeSpec::new(Band::new(200.0, 400.0), None),
    },
    DefaultRange {
        metric: "cyanuric_acid",
        spec: RangeSpec::new(Band::new(30.0, 50.0), Some(Band::new(0.0, 100.0))),
    },
    DefaultRange {
        metric: "iron",
        spec: RangeSpec::new(Band::new(0.0, 0.3), None),
    },
    DefaultRange {
        metric: "copper",
        spec: RangeSpec::new(Band::new(0.0, 0.3), None),
    },
    DefaultRange {
        metric: "phosphates",
        spec: RangeSpec::new(Band::new(0.0, 100.0), None),
    },
    DefaultRange {
        metric: "salt",
        spec: RangeSpec::new(Band::new(2500.0, 3500.0), None),
    },
];

// ---------------------------------------------------------------------------
// Range table
// ---------------------------------------------------------------------------

/// Validated metric → `RangeSpec` lookup. Immutable once a run starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeTable {
    specs: BTreeMap<String, RangeSpec>,
}

impl RangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compiled-in chemistry ranges.
    pub fn chemistry_defaults() -> Self {
        let specs = CHEMISTRY_DEFAULTS
            .iter()
            .map(|d| (d.metric.to_string(), d.spec))
            .collect();
        Self { specs }
    }

    /// Builds a table from config entries, rejecting any mis-nested band.
    pub fn from_specs<I, K>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, RangeSpec)>,
        K: Into<String>,
    {
        let mut table = Self::new();
        for (metric, spec) in entries {
            table.insert(metric, spec)?;
        }
        Ok(table)
    }

    /// Adds or replaces the range for `metric`.
    pub fn insert(&mut self, metric: impl Into<String>, spec: RangeSpec) -> Result<(), ConfigError> {
        let metric = metric.into();
        spec.validate(&metric)?;
        self.specs.insert(metric, spec);
        Ok(())
    }

    /// Looks up a metric. Returns `None` if the metric has no range.
    pub fn get(&self, metric: &str) -> Option<&RangeSpec> {
        self.specs.get(metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CHEMISTRY_FIELDS;

    #[test]
    fn test_every_default_range_is_well_nested() {
        // A mis-nested band would make classify() report CAUTION for values
        // that are actually inside the target.
        for d in CHEMISTRY_DEFAULTS {
            assert!(
                d.spec.validate(d.metric).is_ok(),
                "default range for '{}' violates closure.low <= target.low <= target.high <= closure.high",
                d.metric
            );
        }
    }

    #[test]
    fn test_no_duplicate_default_metrics() {
        let mut seen = std::collections::HashSet::new();
        for d in CHEMISTRY_DEFAULTS {
            assert!(
                seen.insert(d.metric),
                "duplicate metric '{}' found in CHEMISTRY_DEFAULTS",
                d.metric
            );
        }
    }

    #[test]
    fn test_defaults_cover_every_chemistry_field() {
        let table = RangeTable::chemistry_defaults();
        for field in CHEMISTRY_FIELDS {
            assert!(
                table.get(field).is_some(),
                "CHEMISTRY_DEFAULTS missing range for '{}'",
                field
            );
        }
        assert_eq!(table.len(), CHEMISTRY_FIELDS.len());
    }

    #[test]
    fn test_ph_default_matches_posted_limits() {
        let table = RangeTable::chemistry_defaults();
        let ph = table.get("ph").expect("ph should have a range");
        assert_eq!(ph.target, Band::new(7.2, 7.8));
        assert_eq!(ph.closure, Some(Band::new(6.8, 8.2)));
    }

    #[test]
    fn test_get_returns_none_for_unknown_metric() {
        assert!(RangeTable::chemistry_defaults().get("turbidity").is_none());
    }

    #[test]
    fn test_insert_rejects_inverted_target() {
        let mut table = RangeTable::new();
        let err = table.insert("flow_gpm", RangeSpec::new(Band::new(40.0, 20.0), None));
        assert!(err.is_err(), "inverted target band should be rejected");
        assert!(table.is_empty(), "rejected range must not be stored");
    }

    #[test]
    fn test_from_specs_overrides_and_orders_metrics() {
        let table = RangeTable::from_specs([
            ("sys_press", RangeSpec::new(Band::new(10.0, 20.0), None)),
            ("flow_gpm", RangeSpec::new(Band::new(40.0, 60.0), Some(Band::new(30.0, 70.0)))),
        ])
        .expect("valid specs");
        let metrics: Vec<_> = table.metrics().collect();
        assert_eq!(metrics, vec!["flow_gpm", "sys_press"]);
    }
}
