/// Serial line source.
///
/// The sensor firmware prints `upstream,downstream` once per measurement.
/// A background thread reads lines as they arrive and hands them over a
/// channel, so a tick never blocks waiting for the device. Each poll drains
/// everything received since the last tick and keeps only the newest line.
///
/// The device path must already be configured for the right baud rate
/// (e.g. `stty -F /dev/ttyUSB0 115200 raw`). Use `-` to read stdin.
///
/// When the device disappears the reader thread ends; the next poll reports
/// `SourceError::Unavailable` and the poll after that tries to reopen it.

use chrono::Utc;
use crossbeam_channel::{Receiver, TryRecvError, unbounded};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::thread;

use super::{ReadingSource, parse_line};
use crate::logging::DataSource;
use crate::model::{Reading, SourceError};

/// Path value that selects standard input.
pub const STDIN_PATH: &str = "-";

enum LineEvent {
    Line(String),
    Closed(Option<io::Error>),
}

/// Lines from an arbitrary reader, fed by a dedicated thread.
pub struct LineFeed {
    rx: Receiver<LineEvent>,
}

impl LineFeed {
    pub fn spawn<R: BufRead + Send + 'static>(reader: R) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        thread::Builder::new()
            .name("daloy-serial".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    match line {
                        Ok(l) => {
                            if tx.send(LineEvent::Line(l)).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(LineEvent::Closed(Some(e)));
                            return;
                        }
                    }
                }
                let _ = tx.send(LineEvent::Closed(None));
            })?;
        Ok(Self { rx })
    }

    /// Returns the newest non-blank line received so far, or the reason the
    /// feed closed if it closed with nothing newer to report.
    fn latest(&self) -> Result<Option<String>, String> {
        let mut newest = None;
        loop {
            match self.rx.try_recv() {
                Ok(LineEvent::Line(l)) => {
                    if !l.trim().is_empty() {
                        newest = Some(l);
                    }
                }
                Ok(LineEvent::Closed(err)) => {
                    if newest.is_some() {
                        // Report the final reading now; the closed state is
                        // picked up as a disconnect on the next poll.
                        return Ok(newest);
                    }
                    return Err(match err {
                        Some(e) => format!("read failed: {}", e),
                        None => "end of stream".to_string(),
                    });
                }
                Err(TryRecvError::Empty) => return Ok(newest),
                Err(TryRecvError::Disconnected) => {
                    return match newest {
                        Some(l) => Ok(Some(l)),
                        None => Err("end of stream".to_string()),
                    };
                }
            }
        }
    }
}

pub struct SerialSource {
    path: PathBuf,
    feed: Option<LineFeed>,
}

impl SerialSource {
    /// A source that opens `path` lazily on the first poll.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            feed: None,
        }
    }

    /// A source over an already-open reader. Once it closes, polls fall back
    /// to reopening `path`.
    pub fn from_reader<R: BufRead + Send + 'static>(
        path: impl Into<PathBuf>,
        reader: R,
    ) -> io::Result<Self> {
        Ok(Self {
            path: path.into(),
            feed: Some(LineFeed::spawn(reader)?),
        })
    }

    fn open(&self) -> Result<LineFeed, SourceError> {
        let unavailable = |e: io::Error| {
            SourceError::Unavailable(format!("could not open {}: {}", self.path.display(), e))
        };
        if self.path.as_os_str() == STDIN_PATH {
            return LineFeed::spawn(BufReader::new(io::stdin())).map_err(unavailable);
        }
        let file = File::open(&self.path).map_err(unavailable)?;
        LineFeed::spawn(BufReader::new(file)).map_err(unavailable)
    }
}

impl ReadingSource for SerialSource {
    fn poll(&mut self) -> Result<Option<Reading>, SourceError> {
        let feed = match self.feed.take() {
            Some(feed) => feed,
            None => self.open()?,
        };
        let feed = self.feed.insert(feed);

        match feed.latest() {
            Ok(Some(line)) => Ok(Some(parse_line(&line, Utc::now())?)),
            Ok(None) => Ok(None),
            Err(reason) => {
                self.feed = None;
                Err(SourceError::Unavailable(format!(
                    "{} disconnected: {}",
                    self.path.display(),
                    reason
                )))
            }
        }
    }

    fn describe(&self) -> String {
        format!("serial {}", self.path.display())
    }

    fn data_source(&self) -> DataSource {
        DataSource::Serial
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
