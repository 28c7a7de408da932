/// Structured logging for the canal monitoring service
///
/// Diagnostics go through `tracing`. This module installs the subscriber
/// (console plus an optional plain-text file) and provides the service's
/// source tags and failure classification, so that an expected hiccup such
/// as a busy segment is not reported with the same urgency as a broken
/// mail relay.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::model::{DispatchError, LogError, SourceError};

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Serial,
    Remote,
    Replay,
    Mail,
    Journal,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Serial => write!(f, "SERIAL"),
            DataSource::Remote => write!(f, "REMOTE"),
            DataSource::Replay => write!(f, "REPLAY"),
            DataSource::Mail => write!(f, "MAIL"),
            DataSource::Journal => write!(f, "JOURNAL"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - device unplugged, segment open in a spreadsheet
    Expected,
    /// Unexpected failure - indicates degradation or a configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },
    #[error("cannot open log file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("logger already initialized: {0}")]
    AlreadyInitialized(String),
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. When `log_file` is given, every
/// event is also appended there without ANSI colors.
pub fn init_logger(level: &str, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::Filter {
            filter: level.to_string(),
            reason: e.to_string(),
        })?,
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.display().to_string(),
                    source,
                })?;
            Some(tfmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tfmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

// ---------------------------------------------------------------------------
// Classification helpers
// ---------------------------------------------------------------------------

/// Classifies a reading-source failure.
pub fn classify_source_failure(err: &SourceError) -> FailureType {
    match err {
        // Unplugged cables and a store that has not been written yet are
        // part of normal operation.
        SourceError::Unavailable(_) => FailureType::Expected,
        SourceError::HttpError(code) if *code >= 500 => FailureType::Unknown,
        SourceError::HttpError(_) => FailureType::Unexpected,
        // Line noise on the serial link produces the odd garbled record.
        SourceError::Rejected(_) => FailureType::Unknown,
    }
}

/// Classifies a journal append failure.
pub fn classify_journal_failure(err: &LogError) -> FailureType {
    match err {
        LogError::Busy { .. } => FailureType::Expected,
        LogError::Io { .. } => FailureType::Unexpected,
        LogError::Corrupt { .. } => FailureType::Unexpected,
    }
}

/// Classifies a mail dispatch failure.
pub fn classify_dispatch_failure(err: &DispatchError) -> FailureType {
    match err {
        DispatchError::Address(_) | DispatchError::Build(_) => FailureType::Unexpected,
        DispatchError::Transport(e) if e.is_permanent() => FailureType::Unexpected,
        DispatchError::Transport(_) | DispatchError::Unavailable(_) => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

fn emit(source: DataSource, failure: FailureType, subject: Option<&str>, message: &str) {
    let subject = subject.unwrap_or("-");
    match failure {
        FailureType::Expected => {
            tracing::debug!(%source, %failure, subject, "{}", message)
        }
        FailureType::Unexpected => {
            tracing::error!(%source, %failure, subject, "{}", message)
        }
        FailureType::Unknown => {
            tracing::warn!(%source, %failure, subject, "{}", message)
        }
    }
}

/// Log a reading-source failure with automatic classification
pub fn log_source_failure(source: DataSource, err: &SourceError) {
    let failure = classify_source_failure(err);
    emit(source, failure, None, &format!("poll failed: {}", err));
}

/// Log a dropped journal entry
pub fn log_journal_failure(err: &LogError) {
    let failure = classify_journal_failure(err);
    // A busy segment still loses data, so it is never quieter than a warning.
    let failure = match failure {
        FailureType::Expected => FailureType::Unknown,
        other => other,
    };
    emit(
        DataSource::Journal,
        failure,
        None,
        &format!("entry dropped: {}", err),
    );
}

/// Log a discarded alert email
pub fn log_dispatch_failure(recipient: &str, err: &DispatchError) {
    let failure = classify_dispatch_failure(err);
    emit(
        DataSource::Mail,
        failure,
        Some(recipient),
        &format!("alert discarded: {}", err),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IngestionError;
    use std::path::PathBuf;

    #[test]
    fn test_source_failure_classification() {
        assert_eq!(
            classify_source_failure(&SourceError::Unavailable("device unplugged".into())),
            FailureType::Expected
        );
        assert_eq!(
            classify_source_failure(&SourceError::HttpError(404)),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_source_failure(&SourceError::HttpError(503)),
            FailureType::Unknown
        );
        assert_eq!(
            classify_source_failure(&SourceError::Rejected(IngestionError::MissingField(
                "downstream"
            ))),
            FailureType::Unknown
        );
    }

    #[test]
    fn test_journal_failure_classification() {
        let busy = LogError::Busy {
            path: PathBuf::from("logs/daloy_log_2024-07-14.csv"),
        };
        assert_eq!(classify_journal_failure(&busy), FailureType::Expected);

        let io = LogError::Io {
            path: PathBuf::from("logs"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(classify_journal_failure(&io), FailureType::Unexpected);
    }

    #[test]
    fn test_dispatch_failure_classification() {
        assert_eq!(
            classify_dispatch_failure(&DispatchError::Build("no body".into())),
            FailureType::Unexpected
        );
        assert_eq!(
            classify_dispatch_failure(&DispatchError::Unavailable("relay down".into())),
            FailureType::Unknown
        );
    }

    #[test]
    fn test_display_tags() {
        assert_eq!(DataSource::Journal.to_string(), "JOURNAL");
        assert_eq!(FailureType::Unexpected.to_string(), "UNEXPECTED");
    }
}
