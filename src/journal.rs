//! Day-partitioned CSV journal of classified readings.
//!
//! Every append opens the day's segment, takes a non-blocking exclusive lock,
//! writes one record and closes the file again. Nothing stays open between
//! calls, so rotating or inspecting yesterday's file is never blocked by the
//! service. If the segment is held by someone else the entry is dropped with
//! `LogError::Busy`.
//!
//! Segments are keyed by the host's local calendar date at append time, not
//! by the reading's own timestamp.

use chrono::{DateTime, Local, NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::model::{LogEntry, LogError};

/// Default segment directory, relative to the working directory.
pub const DEFAULT_JOURNAL_DIR: &str = "logs";

/// Default segment file name prefix.
pub const DEFAULT_SEGMENT_PREFIX: &str = "daloy_log_";

#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
    prefix: String,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the segment for `day`, e.g. `logs/daloy_log_2024-07-14.csv`.
    pub fn segment_path(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}{}.csv", self.prefix, day.format("%Y-%m-%d")))
    }

    /// Appends to today's segment (host local date).
    pub fn append(&self, entry: &LogEntry) -> Result<(), LogError> {
        self.append_on(Local::now().date_naive(), entry)
    }

    /// Appends to the segment for `day`. Use this in tests to pin the date.
    pub fn append_on(&self, day: NaiveDate, entry: &LogEntry) -> Result<(), LogError> {
        let path = self.segment_path(day);
        fs::create_dir_all(&self.dir).map_err(|source| LogError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| classify_io(&path, e))?;

        let mut lock = fd_lock::RwLock::new(file);
        let mut guard = lock.try_write().map_err(|e| classify_io(&path, e))?;
        writeln!(guard, "{}", entry.to_record()).map_err(|e| classify_io(&path, e))?;
        guard.flush().map_err(|e| classify_io(&path, e))?;
        Ok(())
    }

    /// Reads every record of a segment, in file order.
    ///
    /// A missing segment reads as empty. Blank lines are skipped.
    pub fn read_segment(&self, day: NaiveDate) -> Result<Vec<LogEntry>, LogError> {
        let path = self.segment_path(day);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(classify_io(&path, e)),
        };

        let mut entries = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| classify_io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = parse_record(&line).map_err(|reason| LogError::Corrupt {
                path: path.clone(),
                line: i + 1,
                reason,
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Checks that the journal directory can be created and written to.
    pub fn probe_writable(&self) -> Result<(), LogError> {
        fs::create_dir_all(&self.dir).map_err(|source| LogError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let probe = self.dir.join(".daloy_probe");
        File::create(&probe)
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|source| LogError::Io {
                path: probe.clone(),
                source,
            })
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_DIR, DEFAULT_SEGMENT_PREFIX)
    }
}

/// Lock contention and sharing violations mean another program has the
/// segment; everything else is a genuine I/O failure.
fn classify_io(path: &Path, e: io::Error) -> LogError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::PermissionDenied => LogError::Busy {
            path: path.to_path_buf(),
        },
        _ => LogError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    }
}

/// Parses one CSV record written by `LogEntry::to_record`.
fn parse_record(line: &str) -> Result<LogEntry, String> {
    let fields: Vec<&str> = line.splitn(5, ',').collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }

    let timestamp = DateTime::parse_from_rfc3339(fields[0].trim())
        .map_err(|e| format!("timestamp: {}", e))?
        .with_timezone(&Utc);
    let number = |name: &str, s: &str| -> Result<f64, String> {
        s.trim()
            .parse::<f64>()
            .map_err(|e| format!("{}: {}", name, e))
    };

    Ok(LogEntry {
        timestamp,
        upstream: number("upstream", fields[1])?,
        downstream: number("downstream", fields[2])?,
        difference: number("difference", fields[3])?,
        status_label: fields[4].trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
