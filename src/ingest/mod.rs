//! Reading ingestion.
//!
//! Readings arrive as JSON objects (pushed by the device's HTTP client or
//! pulled from the relay store) or as comma-separated serial lines. Both are
//! validated here; nothing downstream ever sees a half-formed reading.
//!
//! Submodules:
//! - `serial` — line stream from a serial device, a pipe, or stdin.
//! - `remote` — polls a remote HTTP store for its most recent record.
//! - `replay` — replays a recorded journal segment (dev mode).

pub mod remote;
pub mod replay;
pub mod serial;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::logging::DataSource;
use crate::model::{IngestionError, Reading, SourceError};

/// Anything the monitor can poll once per tick.
///
/// `Ok(None)` means "nothing new since the last poll" and is not an error.
pub trait ReadingSource {
    fn poll(&mut self) -> Result<Option<Reading>, SourceError>;

    /// Short description for logs and verification output.
    fn describe(&self) -> String;

    /// Tag used when logging this source's failures.
    fn data_source(&self) -> DataSource {
        DataSource::System
    }
}

impl<S: ReadingSource + ?Sized> ReadingSource for Box<S> {
    fn poll(&mut self) -> Result<Option<Reading>, SourceError> {
        (**self).poll()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn data_source(&self) -> DataSource {
        (**self).data_source()
    }
}

// ---------------------------------------------------------------------------
// JSON payloads
// ---------------------------------------------------------------------------

/// Parses a pushed JSON body into a reading stamped `received_at`.
pub fn parse_payload(body: &str, received_at: DateTime<Utc>) -> Result<Reading, IngestionError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| IngestionError::MalformedPayload(e.to_string()))?;
    reading_from_value(&value, received_at)
}

/// Builds a reading from an already-decoded JSON object.
///
/// `upstream` and `downstream` are required numbers; `difference` is an
/// optional number. Strings that merely look numeric are rejected.
pub fn reading_from_value(
    value: &Value,
    received_at: DateTime<Utc>,
) -> Result<Reading, IngestionError> {
    let obj = value.as_object().ok_or_else(|| {
        IngestionError::MalformedPayload(format!("expected a JSON object, got {}", kind(value)))
    })?;

    let upstream = required_number(obj, "upstream")?;
    let downstream = required_number(obj, "downstream")?;
    let difference = match obj.get("difference") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_f64().ok_or(IngestionError::NotNumeric("difference"))?),
    };

    Reading::new(received_at, upstream, downstream, difference)
}

fn required_number(obj: &Map<String, Value>, field: &'static str) -> Result<f64, IngestionError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(IngestionError::MissingField(field)),
        Some(v) => v.as_f64().ok_or(IngestionError::NotNumeric(field)),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Serial lines
// ---------------------------------------------------------------------------

/// Parses `"<upstream>,<downstream>[,<difference>]"`.
pub fn parse_line(line: &str, received_at: DateTime<Utc>) -> Result<Reading, IngestionError> {
    let parts: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Err(IngestionError::MalformedLine(line.to_string()));
    }

    let number = |s: &str| -> Result<f64, IngestionError> {
        s.parse::<f64>()
            .map_err(|_| IngestionError::MalformedLine(line.to_string()))
    };

    let upstream = number(parts[0])?;
    let downstream = number(parts[1])?;
    let difference = match parts.get(2) {
        Some(d) => Some(number(d)?),
        None => None,
    };

    Reading::new(received_at, upstream, downstream, difference)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
