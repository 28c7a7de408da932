/// Reading staleness detection.
///
/// The device reports roughly once a second. When the serial link drops or
/// the remote store stops updating, the dashboard would otherwise keep
/// showing the last good reading as if it were current. This module lets the
/// snapshot degrade to "stale" instead.
///
/// # Clock injection
/// `is_stale_at` accepts a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally, so staleness is deterministic in tests.

use chrono::{DateTime, Duration, Utc};

use crate::model::Reading;

// ---------------------------------------------------------------------------
// Staleness check
// ---------------------------------------------------------------------------

/// Returns `true` if the reading is older than `max_age` relative to `now`.
///
/// Staleness is strictly greater than the threshold:
///   age > max_age  →  stale
///   age == max_age →  not stale
///
/// A reading stamped in the future (clock skew between device and host) is
/// never stale.
pub fn is_stale_at(reading: &Reading, max_age: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(reading.timestamp) > max_age
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
