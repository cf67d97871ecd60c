//! One CSV log per source key.
//!
//! Layout: `<log_dir>/<source_key>.csv` with header `timestamp,value`. An
//! empty `value` field is a missing reading. Appends are a single
//! `write_all` on an append-mode handle followed by `sync_all`, so a row is
//! either fully on disk or absent. Rewrites go to a temp file that is
//! renamed over the log.
//!
//! Before every rewrite the current log is copied to
//! `<backup_dir>/<source_key>.csv.<YYYYmmdd_HHMMSS>.bak`; only the newest
//! `backup_retention` copies are kept. A log whose last row is incomplete
//! (no trailing newline) is cut back to its last complete row. Any other
//! log that fails to parse is moved aside and replaced by the newest
//! snapshot that does parse.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use super::{AppendOutcome, ReadingStore, duplicate_verdict};
use crate::logging::{self, DataSource};
use crate::model::{Reading, ReadingTime, StoreError};

const HEADER: [&str; 2] = ["timestamp", "value"];
const SNAPSHOT_STAMP: &str = "%Y%m%d_%H%M%S";
/// Snapshots taken in the same second get a `_NNN` counter.
const MAX_SNAPSHOT_COUNTER: u32 = 999;

pub struct CsvReadingStore {
    log_dir: PathBuf,
    backup_dir: PathBuf,
    backup_retention: usize,
    /// Logged values per source key, read from disk on first use. Only
    /// this store writes the logs while it is open.
    index: HashMap<String, HashMap<ReadingTime, Option<f64>>>,
}

impl CsvReadingStore {
    /// Opens (creating if needed) the log and backup directories.
    pub fn open(
        log_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        backup_retention: usize,
    ) -> Result<Self, StoreError> {
        let store = Self {
            log_dir: log_dir.into(),
            backup_dir: backup_dir.into(),
            backup_retention: backup_retention.max(1),
            index: HashMap::new(),
        };
        fs::create_dir_all(&store.log_dir)?;
        fs::create_dir_all(&store.backup_dir)?;
        Ok(store)
    }

    pub fn log_path(&self, source_key: &str) -> PathBuf {
        self.log_dir.join(format!("{}.csv", source_key))
    }

    fn remember(&mut self, source_key: &str, readings: &[Reading]) {
        self.index.insert(
            source_key.to_string(),
            readings.iter().map(|r| (r.timestamp, r.value)).collect(),
        );
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Existing snapshots of `source_key`, oldest first.
    pub fn snapshots(&self, source_key: &str) -> Result<Vec<PathBuf>, StoreError> {
        let prefix = format!("{}.csv.", source_key);
        let mut found: Vec<PathBuf> = fs::read_dir(&self.backup_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".bak"))
            })
            .collect();
        found.sort();
        Ok(found)
    }

    /// Copies the current log into the backup directory and prunes old
    /// copies. Returns `None` if there is no log yet.
    ///
    /// A new snapshot always sorts after every existing one, even when the
    /// clock has stepped back past the newest stamp.
    pub fn snapshot(&self, source_key: &str) -> Result<Option<PathBuf>, StoreError> {
        let log = self.log_path(source_key);
        if !log.exists() {
            return Ok(None);
        }

        let stamp = Local::now().format(SNAPSHOT_STAMP).to_string();
        let mut name = format!("{}.csv.{}.bak", source_key, stamp);
        let newest = self
            .snapshots(source_key)?
            .pop()
            .and_then(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string));
        if let Some(last) = newest {
            if name <= last {
                name = next_snapshot_name(source_key, &last);
            }
        }
        let target = self.backup_dir.join(name);

        fs::copy(&log, &target)?;
        File::open(&target)?.sync_all()?;
        self.prune_snapshots(source_key)?;
        Ok(Some(target))
    }

    fn prune_snapshots(&self, source_key: &str) -> Result<(), StoreError> {
        let snapshots = self.snapshots(source_key)?;
        let excess = snapshots.len().saturating_sub(self.backup_retention);
        for old in &snapshots[..excess] {
            fs::remove_file(old)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Renames a damaged log to `<source_key>.csv.corrupt.<stamp>`.
    fn set_aside(&self, log: &Path) -> Result<PathBuf, StoreError> {
        let aside = log.with_extension(format!(
            "csv.corrupt.{}",
            Local::now().format(SNAPSHOT_STAMP)
        ));
        fs::rename(log, &aside)?;
        Ok(aside)
    }

    /// Cuts a log with an incomplete final row back to its last complete
    /// row. Returns `None` when the damage is not confined to the tail.
    fn repair_tail(&self, source_key: &str) -> Result<Option<Vec<Reading>>, StoreError> {
        let log = self.log_path(source_key);
        let Ok(text) = fs::read_to_string(&log) else {
            return Ok(None);
        };
        if text.ends_with('\n') {
            return Ok(None);
        }

        let complete = &text[..text.rfind('\n').map_or(0, |i| i + 1)];
        let Ok(readings) = parse_log(complete, source_key) else {
            return Ok(None);
        };

        let aside = self.set_aside(&log)?;
        replace_file(&log, |tmp| {
            let mut file = File::create(tmp)?;
            file.write_all(complete.as_bytes())?;
            file.sync_all()?;
            Ok(())
        })?;

        logging::warn(
            DataSource::Store,
            Some(source_key),
            &format!(
                "dropped incomplete final row of {} ({} bytes); original kept at {}",
                log.display(),
                text.len() - complete.len(),
                aside.display()
            ),
        );
        Ok(Some(readings))
    }

    /// Replaces a corrupt log with the newest snapshot that parses.
    fn restore(&self, source_key: &str, detail: String) -> Result<Vec<Reading>, StoreError> {
        let log = self.log_path(source_key);
        for snapshot in self.snapshots(source_key)?.iter().rev() {
            let Ok(readings) = read_log(snapshot, source_key) else {
                continue;
            };

            let aside = self.set_aside(&log)?;
            replace_file(&log, |tmp| {
                fs::copy(snapshot, tmp)?;
                Ok(())
            })?;

            logging::warn(
                DataSource::Store,
                Some(source_key),
                &format!(
                    "restored {} from {} ({}); corrupt copy kept at {}",
                    log.display(),
                    snapshot.display(),
                    detail,
                    aside.display()
                ),
            );
            return Ok(readings);
        }

        Err(StoreError::Corrupted {
            path: log.display().to_string(),
            detail,
        })
    }
}

impl ReadingStore for CsvReadingStore {
    fn append(&mut self, reading: &Reading) -> Result<AppendOutcome, StoreError> {
        if !self.index.contains_key(&reading.source_key) {
            self.load_all(&reading.source_key)?;
        }
        let logged = self
            .index
            .get(&reading.source_key)
            .and_then(|values| values.get(&reading.timestamp))
            .copied();
        if let Some(stored_value) = logged {
            let stored = Reading::new(reading.source_key.clone(), reading.timestamp, stored_value);
            return duplicate_verdict(&stored, reading);
        }

        let path = self.log_path(&reading.source_key);
        let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);

        let mut row = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new().from_writer(&mut row);
            if needs_header {
                writer.write_record(HEADER)?;
            }
            writer.write_record(record(reading))?;
            writer.flush()?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&row)?;
        file.sync_all()?;

        self.index
            .entry(reading.source_key.clone())
            .or_default()
            .insert(reading.timestamp, reading.value);
        Ok(AppendOutcome::Appended)
    }

    fn load_all(&mut self, source_key: &str) -> Result<Vec<Reading>, StoreError> {
        let path = self.log_path(source_key);
        let readings = match read_log(&path, source_key) {
            Ok(readings) => readings,
            Err(detail) => {
                logging::error(
                    DataSource::Store,
                    Some(source_key),
                    &format!("log {} is unreadable: {}", path.display(), detail),
                );
                match self.repair_tail(source_key)? {
                    Some(readings) => readings,
                    None => self.restore(source_key, detail)?,
                }
            }
        };
        self.remember(source_key, &readings);
        Ok(readings)
    }

    fn rewrite(&mut self, source_key: &str, readings: &[Reading]) -> Result<(), StoreError> {
        self.snapshot(source_key)?;
        let path = self.log_path(source_key);
        replace_file(&path, |tmp| {
            let mut writer = csv::Writer::from_writer(File::create(tmp)?);
            writer.write_record(HEADER)?;
            for reading in readings {
                writer.write_record(record(reading))?;
            }
            writer.flush()?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            Ok(())
        })?;
        self.remember(source_key, readings);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

fn record(reading: &Reading) -> [String; 2] {
    [
        reading.timestamp.to_string(),
        reading.value.map(|v| v.to_string()).unwrap_or_default(),
    ]
}

/// The snapshot name that sorts right after `last`: the same stamp with
/// its counter bumped, or a fresh counter appended once it is exhausted.
fn next_snapshot_name(source_key: &str, last: &str) -> String {
    let prefix = format!("{}.csv.", source_key);
    let stem = last
        .strip_prefix(prefix.as_str())
        .and_then(|rest| rest.strip_suffix(".bak"))
        .unwrap_or(last);

    let counter = stem.rsplit_once('_').and_then(|(stamp, n)| {
        let digits = n.len() == 3 && n.bytes().all(|b| b.is_ascii_digit());
        digits.then(|| n.parse::<u32>().ok()).flatten().map(|n| (stamp, n))
    });
    let (base, next) = match counter {
        Some((stamp, n)) if n < MAX_SNAPSHOT_COUNTER => (stamp, n + 1),
        _ => (stem, 1),
    };
    format!("{}{}_{:03}.bak", prefix, base, next)
}

/// Fills a sibling temp file via `fill`, then renames it over `path`.
fn replace_file(
    path: &Path,
    fill: impl FnOnce(&Path) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let tmp = path.with_extension("csv.tmp");
    if let Err(e) = fill(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads one log file. A missing file is an empty history; a file whose
/// last row lacks its newline, or anything that does not parse, is
/// returned as a human-readable detail.
fn read_log(path: &Path, source_key: &str) -> Result<Vec<Reading>, String> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.to_string()),
    };
    if !text.is_empty() && !text.ends_with('\n') {
        return Err("incomplete final row".to_string());
    }
    parse_log(&text, source_key)
}

fn parse_log(text: &str, source_key: &str) -> Result<Vec<Reading>, String> {
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| e.to_string())?;
    if headers.iter().collect::<Vec<_>>() != HEADER {
        return Err(format!("unexpected header {:?}", headers));
    }

    let mut readings = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row.map_err(|e| e.to_string())?;
        let line = i + 2;
        let timestamp: ReadingTime = row
            .get(0)
            .unwrap_or_default()
            .parse()
            .map_err(|e| format!("line {}: {}", line, e))?;
        let value = match row.get(1).unwrap_or_default().trim() {
            "" => None,
            raw => match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ => return Err(format!("line {}: bad value '{}'", line, raw)),
            },
        };
        readings.push(Reading::new(source_key, timestamp, value));
    }

    readings.sort_by_key(|r| r.timestamp);
    Ok(readings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
