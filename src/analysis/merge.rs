//! Fetch-versus-history reconciliation.
//!
//! Upstream meters revise recent values (drift correction, late uploads),
//! so inside the merge window a fresh fetch is authoritative. Older stored
//! values are never touched by a fetch; a timestamp missing from history is
//! always filled in.
//!
//! The result is the complete new history, not a delta.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::logging::{self, DataSource};
use crate::model::{MergeWindow, Reading, ReadingTime, StoreError};
use crate::store::ReadingStore;

/// What a merge did to the stored history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Timestamps that were not stored before.
    pub inserted: usize,
    /// In-window timestamps whose stored value changed.
    pub overwritten: usize,
    /// Timestamps outside the window where the stored value was kept.
    pub preserved: usize,
}

impl MergeStats {
    pub fn changed(&self) -> bool {
        self.inserted + self.overwritten > 0
    }
}

/// Merges `fetched` into `existing`. See `merge_with_stats`.
pub fn merge(
    existing: &[Reading],
    fetched: &[Reading],
    window: MergeWindow,
    now: NaiveDateTime,
) -> Vec<Reading> {
    merge_with_stats(existing, fetched, window, now).0
}

/// Merges `fetched` into `existing` and reports what changed.
///
/// A fetched reading wins if its timestamp is on or after
/// `window.cutoff(now)`, or if `existing` has no reading at that timestamp.
/// A fetched missing value never replaces a stored present value. An empty
/// fetch returns `existing` unchanged.
pub fn merge_with_stats(
    existing: &[Reading],
    fetched: &[Reading],
    window: MergeWindow,
    now: NaiveDateTime,
) -> (Vec<Reading>, MergeStats) {
    let mut stats = MergeStats::default();
    if fetched.is_empty() {
        return (existing.to_vec(), stats);
    }

    let cutoff = window.cutoff(now);
    let mut by_time: BTreeMap<ReadingTime, Reading> = existing
        .iter()
        .map(|r| (r.timestamp, r.clone()))
        .collect();

    for incoming in fetched {
        match by_time.get_mut(&incoming.timestamp) {
            None => {
                by_time.insert(incoming.timestamp, incoming.clone());
                stats.inserted += 1;
            }
            Some(stored) if incoming.timestamp.is_on_or_after(cutoff) => {
                // A gap in the fetch is not a correction.
                if incoming.value.is_none() || stored.value == incoming.value {
                    continue;
                }
                stored.value = incoming.value;
                stats.overwritten += 1;
            }
            Some(stored) => {
                if stored.value != incoming.value {
                    stats.preserved += 1;
                }
            }
        }
    }

    (by_time.into_values().collect(), stats)
}

// ---------------------------------------------------------------------------
// Store-backed reconciliation
// ---------------------------------------------------------------------------

/// Applies `merge` to one stored source key.
#[derive(Debug, Clone, Copy)]
pub struct UsageMerger {
    window: MergeWindow,
}

impl UsageMerger {
    pub fn new(window: MergeWindow) -> Self {
        Self { window }
    }

    /// Loads the history of `source_key`, merges `fetched` into it and
    /// rewrites the store only when something changed. Returns the merged
    /// history and the stats.
    pub fn reconcile(
        &self,
        store: &mut dyn ReadingStore,
        source_key: &str,
        fetched: &[Reading],
        now: NaiveDateTime,
    ) -> Result<(Vec<Reading>, MergeStats), StoreError> {
        let existing = store.load_all(source_key)?;
        let (merged, stats) = merge_with_stats(&existing, fetched, self.window, now);

        if stats.changed() {
            store.rewrite(source_key, &merged)?;
        }
        if stats.preserved > 0 {
            logging::warn(
                DataSource::Store,
                Some(source_key),
                &format!(
                    "{} fetched values outside the {}-day merge window differ from history; kept stored values",
                    stats.preserved, self.window.days
                ),
            );
        }
        logging::info(
            DataSource::Store,
            Some(source_key),
            &format!(
                "merge: {} inserted, {} overwritten, {} total",
                stats.inserted,
                stats.overwritten,
                merged.len()
            ),
        );
        Ok((merged, stats))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CsvReadingStore;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn usage(d: u32, v: f64) -> Reading {
        Reading::daily("water_ccf", day(d), v)
    }

    fn now() -> NaiveDateTime {
        day(3).and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_worked_example() {
        let existing = vec![usage(1, 10.0), usage(2, 12.0)];
        let fetched = vec![usage(2, 13.0), usage(3, 9.0)];
        let merged = merge(&existing, &fetched, MergeWindow::days(1), now());
        assert_eq!(merged, vec![usage(1, 10.0), usage(2, 13.0), usage(3, 9.0)]);
    }

    #[test]
    fn test_empty_fetch_returns_existing() {
        let existing = vec![usage(1, 10.0), usage(2, 12.0)];
        assert_eq!(merge(&existing, &[], MergeWindow::days(1), now()), existing);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = vec![usage(1, 10.0), usage(2, 12.0)];
        let fetched = vec![usage(1, 11.0), usage(2, 13.0), usage(3, 9.0)];
        let w = MergeWindow::days(1);
        let once = merge(&existing, &fetched, w, now());
        let twice = merge(&once, &fetched, w, now());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_old_stored_value_wins_outside_window() {
        let (merged, stats) = merge_with_stats(
            &[usage(1, 10.0)],
            &[usage(1, 99.0)],
            MergeWindow::days(1),
            now(),
        );
        assert_eq!(merged, vec![usage(1, 10.0)]);
        assert_eq!(stats.preserved, 1);
        assert!(!stats.changed());
    }

    #[test]
    fn test_fetched_value_wins_inside_window() {
        let (merged, stats) = merge_with_stats(
            &[usage(3, 1.0)],
            &[usage(3, 2.0)],
            MergeWindow::days(1),
            now(),
        );
        assert_eq!(merged, vec![usage(3, 2.0)]);
        assert_eq!(stats.overwritten, 1);
    }

    #[test]
    fn test_old_gap_is_filled_from_fetch() {
        let merged = merge(&[usage(2, 12.0)], &[usage(1, 10.0)], MergeWindow::days(1), now());
        assert_eq!(merged, vec![usage(1, 10.0), usage(2, 12.0)]);
    }

    #[test]
    fn test_missing_fetched_value_does_not_erase_stored_value() {
        let missing = Reading::new("water_ccf", ReadingTime::Day(day(3)), None);
        let merged = merge(&[usage(3, 4.0)], &[missing], MergeWindow::days(1), now());
        assert_eq!(merged, vec![usage(3, 4.0)]);
    }

    #[test]
    fn test_reconcile_rewrites_store_only_on_change() {
        let dir = TempDir::new().unwrap();
        let mut store =
            CsvReadingStore::open(dir.path().join("logs"), dir.path().join("bak"), 5).unwrap();
        store.rewrite("water_ccf", &[usage(1, 10.0), usage(2, 12.0)]).unwrap();

        let merger = UsageMerger::new(MergeWindow::days(1));
        let (merged, stats) = merger
            .reconcile(&mut store, "water_ccf", &[usage(2, 13.0), usage(3, 9.0)], now())
            .unwrap();
        assert_eq!(merged.len(), 3);
        assert!(stats.changed());
        assert_eq!(store.load_all("water_ccf").unwrap(), merged);
        let snapshots_after_first = store.snapshots("water_ccf").unwrap().len();

        // Same fetch again: nothing to do, no extra snapshot.
        let (_, again) = merger
            .reconcile(&mut store, "water_ccf", &[usage(2, 13.0), usage(3, 9.0)], now())
            .unwrap();
        assert!(!again.changed());
        assert_eq!(store.snapshots("water_ccf").unwrap().len(), snapshots_after_first);
    }
}
