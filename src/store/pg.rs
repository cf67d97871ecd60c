/// PostgreSQL reading store
///
/// Same contract as the CSV backend, on two tables in the `poolmon`
/// schema: `readings` holds the live history, `readings_snapshot` holds the
/// copy taken by the last rewrite of each source key. Rewrites run in one
/// transaction, so a crash leaves either the old or the new history.

use chrono::{NaiveDateTime, NaiveTime};
use postgres::{Client, NoTls};

use super::{AppendOutcome, ReadingStore, duplicate_verdict};
use crate::logging::{self, DataSource};
use crate::model::{Reading, ReadingTime, StoreError};

const SCHEMA_SQL: &str = "
    CREATE SCHEMA IF NOT EXISTS poolmon;
    CREATE TABLE IF NOT EXISTS poolmon.readings (
        source_key  TEXT NOT NULL,
        observed_at TIMESTAMP NOT NULL,
        is_dated    BOOLEAN NOT NULL,
        value       DOUBLE PRECISION,
        PRIMARY KEY (source_key, observed_at)
    );
    CREATE TABLE IF NOT EXISTS poolmon.readings_snapshot (
        source_key  TEXT NOT NULL,
        observed_at TIMESTAMP NOT NULL,
        is_dated    BOOLEAN NOT NULL,
        value       DOUBLE PRECISION,
        taken_at    TIMESTAMP NOT NULL DEFAULT now(),
        PRIMARY KEY (source_key, observed_at)
    );
";

pub struct PgReadingStore {
    client: Client,
}

impl PgReadingStore {
    /// Connects and creates the schema if it is missing.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let mut client = Client::connect(database_url, NoTls)?;
        client.batch_execute(SCHEMA_SQL)?;
        Ok(Self { client })
    }

    /// Puts the last snapshot of `source_key` back as its live history.
    ///
    /// Returns the number of restored rows; zero means no snapshot existed
    /// and the live history was left alone.
    pub fn restore_snapshot(&mut self, source_key: &str) -> Result<u64, StoreError> {
        let mut tx = self.client.transaction()?;
        let available: i64 = tx
            .query_one(
                "SELECT COUNT(*) FROM poolmon.readings_snapshot WHERE source_key = $1",
                &[&source_key],
            )?
            .get(0);
        if available == 0 {
            tx.rollback()?;
            return Ok(0);
        }

        tx.execute("DELETE FROM poolmon.readings WHERE source_key = $1", &[&source_key])?;
        let restored = tx.execute(
            "INSERT INTO poolmon.readings (source_key, observed_at, is_dated, value)
             SELECT source_key, observed_at, is_dated, value
             FROM poolmon.readings_snapshot WHERE source_key = $1",
            &[&source_key],
        )?;
        tx.commit()?;

        logging::warn(
            DataSource::Store,
            Some(source_key),
            &format!("restored {} rows from snapshot", restored),
        );
        Ok(restored)
    }
}

fn to_columns(timestamp: &ReadingTime) -> (NaiveDateTime, bool) {
    match timestamp {
        ReadingTime::Day(d) => (d.and_time(NaiveTime::MIN), true),
        ReadingTime::At(dt) => (*dt, false),
    }
}

fn from_columns(observed_at: NaiveDateTime, is_dated: bool) -> ReadingTime {
    if is_dated {
        ReadingTime::Day(observed_at.date())
    } else {
        ReadingTime::At(observed_at)
    }
}

impl ReadingStore for PgReadingStore {
    fn append(&mut self, reading: &Reading) -> Result<AppendOutcome, StoreError> {
        let (observed_at, is_dated) = to_columns(&reading.timestamp);

        let existing = self.client.query_opt(
            "SELECT value FROM poolmon.readings WHERE source_key = $1 AND observed_at = $2",
            &[&reading.source_key, &observed_at],
        )?;
        if let Some(row) = existing {
            let stored = Reading::new(reading.source_key.clone(), reading.timestamp, row.get(0));
            return duplicate_verdict(&stored, reading);
        }

        self.client.execute(
            "INSERT INTO poolmon.readings (source_key, observed_at, is_dated, value)
             VALUES ($1, $2, $3, $4)",
            &[&reading.source_key, &observed_at, &is_dated, &reading.value],
        )?;
        Ok(AppendOutcome::Appended)
    }

    fn load_all(&mut self, source_key: &str) -> Result<Vec<Reading>, StoreError> {
        let rows = self.client.query(
            "SELECT observed_at, is_dated, value FROM poolmon.readings
             WHERE source_key = $1
             ORDER BY observed_at",
            &[&source_key],
        )?;

        Ok(rows
            .iter()
            .map(|row| Reading::new(source_key, from_columns(row.get(0), row.get(1)), row.get(2)))
            .collect())
    }

    fn last(&mut self, source_key: &str) -> Result<Option<Reading>, StoreError> {
        let row = self.client.query_opt(
            "SELECT observed_at, is_dated, value FROM poolmon.readings
             WHERE source_key = $1
             ORDER BY observed_at DESC LIMIT 1",
            &[&source_key],
        )?;
        Ok(row.map(|row| Reading::new(source_key, from_columns(row.get(0), row.get(1)), row.get(2))))
    }

    fn rewrite(&mut self, source_key: &str, readings: &[Reading]) -> Result<(), StoreError> {
        let mut tx = self.client.transaction()?;

        tx.execute(
            "DELETE FROM poolmon.readings_snapshot WHERE source_key = $1",
            &[&source_key],
        )?;
        tx.execute(
            "INSERT INTO poolmon.readings_snapshot (source_key, observed_at, is_dated, value)
             SELECT source_key, observed_at, is_dated, value
             FROM poolmon.readings WHERE source_key = $1",
            &[&source_key],
        )?;
        tx.execute("DELETE FROM poolmon.readings WHERE source_key = $1", &[&source_key])?;

        let insert = tx.prepare(
            "INSERT INTO poolmon.readings (source_key, observed_at, is_dated, value)
             VALUES ($1, $2, $3, $4)",
        )?;
        for reading in readings {
            let (observed_at, is_dated) = to_columns(&reading.timestamp);
            tx.execute(&insert, &[&source_key, &observed_at, &is_dated, &reading.value])?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_dated_reading_maps_to_midnight_and_back() {
        let day = ReadingTime::Day(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let (at, dated) = to_columns(&day);
        assert!(dated);
        assert_eq!(at.time(), NaiveTime::MIN);
        assert_eq!(from_columns(at, dated), day);
    }

    #[test]
    fn test_timed_reading_maps_unchanged() {
        let at = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(13, 5, 0)
            .unwrap();
        let (col, dated) = to_columns(&ReadingTime::At(at));
        assert!(!dated);
        assert_eq!(from_columns(col, dated), ReadingTime::At(at));
    }
}
