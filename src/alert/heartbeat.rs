//! Once-per-day heartbeat markers.
//!
//! Each job category keeps an append-only marker file with one local date
//! per line. A date present in the file means that day's heartbeat already
//! went out, so re-running a job on the same day does not repeat it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    NotSentToday,
    SentToday,
}

/// Durable marker log for one heartbeat category.
#[derive(Debug, Clone)]
pub struct HeartbeatLog {
    path: PathBuf,
}

impl HeartbeatLog {
    /// Marker file `<dir>/<category>_heartbeat.log`.
    pub fn new(dir: impl AsRef<Path>, category: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}_heartbeat.log", category)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self, date: NaiveDate) -> io::Result<HeartbeatState> {
        let key = date_key(date);
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HeartbeatState::NotSentToday),
            Err(e) => return Err(e),
        };
        if contents.lines().any(|line| line.trim() == key) {
            Ok(HeartbeatState::SentToday)
        } else {
            Ok(HeartbeatState::NotSentToday)
        }
    }

    /// Appends `date` to the marker file, creating the directory if needed.
    pub fn record(&self, date: NaiveDate) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(format!("{}\n", date_key(date)).as_bytes())?;
        file.sync_all()
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn test_missing_marker_file_means_not_sent() {
        let dir = TempDir::new().unwrap();
        let log = HeartbeatLog::new(dir.path(), "water_usage");
        assert_eq!(log.state(day(1)).unwrap(), HeartbeatState::NotSentToday);
    }

    #[test]
    fn test_recorded_date_reads_back_as_sent() {
        let dir = TempDir::new().unwrap();
        let log = HeartbeatLog::new(dir.path().join("heartbeats"), "water_usage");
        log.record(day(1)).unwrap();
        assert_eq!(log.state(day(1)).unwrap(), HeartbeatState::SentToday);
        assert_eq!(log.state(day(2)).unwrap(), HeartbeatState::NotSentToday);
    }

    #[test]
    fn test_categories_are_independent() {
        let dir = TempDir::new().unwrap();
        HeartbeatLog::new(dir.path(), "water_usage").record(day(1)).unwrap();
        let other = HeartbeatLog::new(dir.path(), "constant_flow");
        assert_eq!(other.state(day(1)).unwrap(), HeartbeatState::NotSentToday);
    }

    #[test]
    fn test_date_match_is_whole_line_not_substring() {
        let dir = TempDir::new().unwrap();
        let log = HeartbeatLog::new(dir.path(), "water_usage");
        std::fs::write(log.path(), "x2024-06-01x\n").unwrap();
        assert_eq!(log.state(day(1)).unwrap(), HeartbeatState::NotSentToday);
    }
}
