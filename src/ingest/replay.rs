/// Development mode utilities for working with recorded data
///
/// When the device is not plugged in, replay a recorded journal segment
/// through the full pipeline. Each tick yields the next recorded entry,
/// re-stamped with the current time so staleness and journaling behave as
/// they would live.

use chrono::{NaiveDate, Utc};
use std::collections::VecDeque;

use super::ReadingSource;
use crate::journal::Journal;
use crate::logging::DataSource;
use crate::model::{LogEntry, LogError, Reading, SourceError};

pub struct ReplaySource {
    day: NaiveDate,
    pending: VecDeque<LogEntry>,
    /// Start over when the segment runs out instead of going quiet.
    pub looped: bool,
    recorded: Vec<LogEntry>,
}

impl ReplaySource {
    /// Loads the segment recorded on `day`.
    pub fn load(journal: &Journal, day: NaiveDate) -> Result<Self, LogError> {
        let recorded = journal.read_segment(day)?;
        Ok(Self::from_entries(day, recorded))
    }

    pub fn from_entries(day: NaiveDate, recorded: Vec<LogEntry>) -> Self {
        Self {
            day,
            pending: recorded.iter().cloned().collect(),
            looped: false,
            recorded,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl ReadingSource for ReplaySource {
    fn poll(&mut self) -> Result<Option<Reading>, SourceError> {
        if self.pending.is_empty() && self.looped {
            self.pending = self.recorded.iter().cloned().collect();
        }
        let Some(entry) = self.pending.pop_front() else {
            return Ok(None);
        };
        // Replay the device's raw levels; the difference column is kept so a
        // differential deployment sees exactly what was recorded.
        let reading = Reading::new(
            Utc::now(),
            entry.upstream,
            entry.downstream,
            Some(entry.difference),
        )?;
        Ok(Some(reading))
    }

    fn describe(&self) -> String {
        format!(
            "replay {} ({} of {} entries left)",
            self.day,
            self.pending.len(),
            self.recorded.len()
        )
    }

    fn data_source(&self) -> DataSource {
        DataSource::Replay
    }
}
