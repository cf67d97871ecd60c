//! Append-only reading logs.
//!
//! `ReadingStore` is the single contract every backend honours:
//! - `append` of an exact duplicate is a silent no-op reported as
//!   `AppendOutcome::AlreadyLogged`;
//! - `append` of a known timestamp with a different value fails with
//!   `StoreError::DuplicateTimestamp` and leaves history untouched;
//! - `rewrite` snapshots the current history before replacing it, and the
//!   replacement is atomic (readers see the old log or the new one).
//!
//! Backends: `CsvReadingStore` (one CSV per source key) and
//! `PgReadingStore` (PostgreSQL).

pub mod csv_file;
pub mod pg;

pub use csv_file::CsvReadingStore;
pub use pg::PgReadingStore;

use crate::model::{Reading, StoreError};

/// Result of an `append` that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    AlreadyLogged,
}

impl AppendOutcome {
    pub fn already_logged(&self) -> bool {
        matches!(self, AppendOutcome::AlreadyLogged)
    }
}

pub trait ReadingStore {
    /// Appends one reading unless its timestamp is already logged.
    fn append(&mut self, reading: &Reading) -> Result<AppendOutcome, StoreError>;

    /// Full history of `source_key`, sorted by timestamp ascending.
    fn load_all(&mut self, source_key: &str) -> Result<Vec<Reading>, StoreError>;

    /// Most recent reading of `source_key`, if any.
    fn last(&mut self, source_key: &str) -> Result<Option<Reading>, StoreError> {
        Ok(self.load_all(source_key)?.pop())
    }

    /// Replaces the whole history of `source_key` with `readings`.
    ///
    /// A snapshot of the previous history is taken first.
    fn rewrite(&mut self, source_key: &str, readings: &[Reading]) -> Result<(), StoreError>;
}

/// Decides what appending `incoming` means when `stored` has the same
/// source key and timestamp.
pub(crate) fn duplicate_verdict(
    stored: &Reading,
    incoming: &Reading,
) -> Result<AppendOutcome, StoreError> {
    if stored.value == incoming.value {
        Ok(AppendOutcome::AlreadyLogged)
    } else {
        Err(StoreError::DuplicateTimestamp {
            source_key: incoming.source_key.clone(),
            timestamp: incoming.timestamp,
            stored: stored.value,
            supplied: incoming.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReadingTime;
    use chrono::NaiveDate;

    fn reading(value: Option<f64>) -> Reading {
        Reading::new(
            "ph",
            ReadingTime::Day(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            value,
        )
    }

    #[test]
    fn test_identical_value_is_already_logged() {
        let verdict = duplicate_verdict(&reading(Some(7.4)), &reading(Some(7.4)));
        assert_eq!(verdict.unwrap(), AppendOutcome::AlreadyLogged);
    }

    #[test]
    fn test_identical_missing_value_is_already_logged() {
        let verdict = duplicate_verdict(&reading(None), &reading(None));
        assert!(verdict.unwrap().already_logged());
    }

    #[test]
    fn test_conflicting_value_is_duplicate_timestamp_error() {
        let verdict = duplicate_verdict(&reading(Some(7.4)), &reading(Some(7.6)));
        match verdict {
            Err(StoreError::DuplicateTimestamp { stored, supplied, .. }) => {
                assert_eq!(stored, Some(7.4));
                assert_eq!(supplied, Some(7.6));
            }
            other => panic!("expected DuplicateTimestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_versus_present_is_a_conflict() {
        assert!(duplicate_verdict(&reading(None), &reading(Some(7.4))).is_err());
    }
}
