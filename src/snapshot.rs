//! Read-only view of the monitor's current state, for the dashboard.
//!
//! Only the monitor writes. Each update builds a new `Snapshot` and
//! swaps the `Arc` in; readers clone the `Arc` and keep a consistent view for
//! as long as they like. Readers only ever wait for a pointer swap, never
//! for the monitor's I/O.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::alert::is_stale_at;
use crate::model::{ClassifiedReading, Status};

/// Default number of points kept for the live chart.
pub const DEFAULT_HISTORY_LEN: usize = 600;

/// What the dashboard should say about the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FeedState {
    /// Nothing received since startup.
    Waiting,
    /// The last poll reached the source.
    Connected,
    /// The last poll failed; the message is shown to the operator.
    Unavailable(String),
}

/// How the latest reading should be displayed at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    NoReading,
    Live,
    Stale,
}

/// One point of the rolling chart buffers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub upstream: f64,
    pub downstream: f64,
    pub difference: f64,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub latest: Option<ClassifiedReading>,
    pub feed: FeedState,
    pub history: VecDeque<HistoryPoint>,
    #[serde(skip)]
    history_len: usize,
}

impl Snapshot {
    fn empty(history_len: usize) -> Self {
        Self {
            latest: None,
            feed: FeedState::Waiting,
            history: VecDeque::with_capacity(history_len.min(DEFAULT_HISTORY_LEN)),
            history_len,
        }
    }

    pub fn current_status(&self) -> Option<Status> {
        self.latest.map(|c| c.status)
    }

    /// Classifies the latest reading's age against `max_age` at `now`.
    pub fn freshness_at(&self, max_age: Duration, now: DateTime<Utc>) -> Freshness {
        match &self.latest {
            None => Freshness::NoReading,
            Some(c) if is_stale_at(&c.reading, max_age, now) => Freshness::Stale,
            Some(_) => Freshness::Live,
        }
    }

    /// Remark to show under the reading, or a waiting/stale notice.
    pub fn remark_at(&self, max_age: Duration, now: DateTime<Utc>) -> String {
        match (self.freshness_at(max_age, now), &self.feed) {
            (Freshness::NoReading, FeedState::Unavailable(reason)) => {
                format!("No data: {}", reason)
            }
            (Freshness::NoReading, _) => "Waiting for sensor readings...".to_string(),
            (Freshness::Stale, _) => "Reading is stale; the sensor has stopped reporting.".to_string(),
            (Freshness::Live, _) => self
                .current_status()
                .map(|s| s.remark().to_string())
                .unwrap_or_default(),
        }
    }

    fn push(&mut self, classified: ClassifiedReading) {
        let r = &classified.reading;
        if self.history_len > 0 {
            while self.history.len() >= self.history_len {
                self.history.pop_front();
            }
            self.history.push_back(HistoryPoint {
                timestamp: r.timestamp,
                upstream: r.upstream,
                downstream: r.downstream,
                difference: r.difference,
                status: classified.status,
            });
        }
        self.latest = Some(classified);
        self.feed = FeedState::Connected;
    }
}

/// Shared handle. Clone it into whatever serves the dashboard.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotHandle {
    pub fn new(history_len: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(Snapshot::empty(history_len)))),
        }
    }

    /// The current snapshot. Never waits on ingestion work.
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.read())
    }

    pub(crate) fn record(&self, classified: ClassifiedReading) {
        self.update(|s| s.push(classified));
    }

    /// The source answered, with or without a new reading. Clears any
    /// earlier failure: back to `Connected` if a reading has been shown,
    /// otherwise back to `Waiting`.
    pub(crate) fn mark_reachable(&self) {
        self.update(|s| {
            s.feed = if s.latest.is_some() {
                FeedState::Connected
            } else {
                FeedState::Waiting
            };
        });
    }

    pub(crate) fn mark_unavailable(&self, reason: String) {
        self.update(|s| s.feed = FeedState::Unavailable(reason));
    }

    /// Copy-on-write update. The upgradable guard serializes writers while
    /// readers keep reading the old snapshot until the final swap.
    fn update(&self, f: impl FnOnce(&mut Snapshot)) {
        let guard = self.inner.upgradable_read();
        let mut next = Snapshot::clone(&guard);
        f(&mut next);
        *RwLockUpgradableReadGuard::upgrade(guard) = Arc::new(next);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
