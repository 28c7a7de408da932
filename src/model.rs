/// Core data types for the DALOY canal monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// readings, status tiers, log entries, alert messages, and the error types
/// that flow between ingestion, alerting, and the journal.
///
/// It contains no I/O. The only logic is the validation that turns raw
/// numbers into a `Reading`, since an invalid reading must never exist.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// A single validated sample from the sensor device, in centimeters.
///
/// `difference` is either supplied by the device or derived as
/// `upstream - downstream`. All three values are finite; construct through
/// [`Reading::new`] so that invariant holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub upstream: f64,
    pub downstream: f64,
    pub difference: f64,
}

impl Reading {
    /// Validates raw levels and builds a reading stamped with `timestamp`.
    ///
    /// Returns `IngestionError::NonFinite` if any value is NaN or infinite.
    pub fn new(
        timestamp: DateTime<Utc>,
        upstream: f64,
        downstream: f64,
        difference: Option<f64>,
    ) -> Result<Self, IngestionError> {
        check_finite("upstream", upstream)?;
        check_finite("downstream", downstream)?;
        let difference = match difference {
            Some(d) => {
                check_finite("difference", d)?;
                d
            }
            None => upstream - downstream,
        };

        Ok(Self {
            timestamp,
            upstream,
            downstream,
            difference,
        })
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<(), IngestionError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(IngestionError::NonFinite(field))
    }
}

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

/// Which measurement drives classification.
///
/// A deployment picks exactly one. Segments written under different policies
/// are not comparable, so the policy name is logged at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdPolicy {
    /// Thresholds on the upstream level alone (flood detection).
    Absolute,
    /// Thresholds on `upstream - downstream` (blockage detection).
    Differential,
}

impl fmt::Display for ThresholdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdPolicy::Absolute => write!(f, "absolute"),
            ThresholdPolicy::Differential => write!(f, "differential"),
        }
    }
}

/// Severity tiers, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Tier {
    Normal,
    Elevated,
    Critical,
}

/// A classified status: a tier under a particular policy.
///
/// The policy only changes the wording; the alerting state machine looks at
/// the whole value, so `MODERATE` and `PARTIAL BLOCKAGE` never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Status {
    pub policy: ThresholdPolicy,
    pub tier: Tier,
}

impl Status {
    pub fn new(policy: ThresholdPolicy, tier: Tier) -> Self {
        Self { policy, tier }
    }

    pub fn is_normal(&self) -> bool {
        self.tier == Tier::Normal
    }

    /// Label written to the journal and used in alert subjects.
    pub fn label(&self) -> &'static str {
        match (self.policy, self.tier) {
            (ThresholdPolicy::Absolute, Tier::Normal) => "NORMAL",
            (ThresholdPolicy::Absolute, Tier::Elevated) => "MODERATE",
            (ThresholdPolicy::Absolute, Tier::Critical) => "FLOODED",
            (ThresholdPolicy::Differential, Tier::Normal) => "NORMAL FLOW",
            (ThresholdPolicy::Differential, Tier::Elevated) => "PARTIAL BLOCKAGE",
            (ThresholdPolicy::Differential, Tier::Critical) => "FULL BLOCKAGE",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self.tier {
            Tier::Normal => "✅",
            Tier::Elevated => "⚠️",
            Tier::Critical => "🚨",
        }
    }

    /// Fixed human-readable remark shown next to the reading.
    pub fn remark(&self) -> &'static str {
        match (self.policy, self.tier) {
            (ThresholdPolicy::Absolute, Tier::Normal) => "Water levels are within safe limits.",
            (ThresholdPolicy::Absolute, Tier::Elevated) => "Water level approaching standard.",
            (ThresholdPolicy::Absolute, Tier::Critical) => "Overflow observed. Maintenance needed.",
            (ThresholdPolicy::Differential, Tier::Normal) => {
                "Water is flowing freely between sensors."
            }
            (ThresholdPolicy::Differential, Tier::Elevated) => {
                "Partial blockage suspected. Inspection recommended."
            }
            (ThresholdPolicy::Differential, Tier::Critical) => {
                "Full blockage detected. Clearing needed."
            }
        }
    }

    /// Parses a journal label back into a status. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let (policy, tier) = match label {
            "NORMAL" => (ThresholdPolicy::Absolute, Tier::Normal),
            "MODERATE" => (ThresholdPolicy::Absolute, Tier::Elevated),
            "FLOODED" => (ThresholdPolicy::Absolute, Tier::Critical),
            "NORMAL FLOW" => (ThresholdPolicy::Differential, Tier::Normal),
            "PARTIAL BLOCKAGE" => (ThresholdPolicy::Differential, Tier::Elevated),
            "FULL BLOCKAGE" => (ThresholdPolicy::Differential, Tier::Critical),
            _ => return None,
        };
        Some(Self::new(policy, tier))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.emoji(), self.label())
    }
}

/// A reading together with the status it was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassifiedReading {
    pub reading: Reading,
    pub status: Status,
}

// ---------------------------------------------------------------------------
// Journal and alert records
// ---------------------------------------------------------------------------

/// One row of a day segment. Never mutated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub upstream: f64,
    pub downstream: f64,
    pub difference: f64,
    pub status_label: String,
}

impl LogEntry {
    /// Renders the entry as one CSV record (no trailing newline).
    ///
    /// Column order: timestamp, upstream, downstream, difference, status.
    pub fn to_record(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.upstream,
            self.downstream,
            self.difference,
            self.status_label
        )
    }
}

impl From<&ClassifiedReading> for LogEntry {
    fn from(classified: &ClassifiedReading) -> Self {
        let r = &classified.reading;
        Self {
            timestamp: r.timestamp,
            upstream: r.upstream,
            downstream: r.downstream,
            difference: r.difference,
            status_label: classified.status.label().to_string(),
        }
    }
}

/// An email waiting in the delivery queue. Lost if the process dies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A reading payload that cannot become a `Reading`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestionError {
    /// A required field is absent from the payload.
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// A field is present but is not a JSON number.
    #[error("field {0} is not numeric")]
    NotNumeric(&'static str),
    /// A field parsed but is NaN or infinite.
    #[error("field {0} is not a finite number")]
    NonFinite(&'static str),
    /// The body is not a JSON object at all.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// A serial line that is not `upstream,downstream[,difference]`.
    #[error("malformed line: {0:?}")]
    MalformedLine(String),
}

/// Failures while fetching the next reading from a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Device disconnected or remote store unreachable. Retried next tick.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// Non-2xx response from the remote store.
    #[error("HTTP error: {0}")]
    HttpError(u16),
    /// The source produced something, but it is not a valid reading.
    #[error("reading rejected: {0}")]
    Rejected(#[from] IngestionError),
}

/// Failures appending to, or reading back, a day segment.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Another process holds the segment. The entry is dropped.
    #[error("segment busy: {}", path.display())]
    Busy { path: PathBuf },
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A record read back from a segment could not be parsed.
    #[error("corrupt record at {}:{line}: {reason}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Mail transport failures. Logged by the delivery worker and discarded.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// SMTP transport-level failure (authentication, connection, timeout).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    /// The recipient or sender address could not be parsed.
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),
    /// The MIME message could not be assembled.
    #[error("email build error: {0}")]
    Build(String),
    /// Any other transport that refused the message.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
