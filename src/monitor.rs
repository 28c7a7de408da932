//! The ingestion pipeline.
//!
//! One reading at a time: classify, decide whether to alert, hand any alert
//! to the delivery queue, append to the day's journal segment, publish the
//! new snapshot. Nothing in here waits on the mail server, and no failure
//! stops the loop.

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::alert::{AlertCoordinator, compose};
use crate::delivery::AlertQueue;
use crate::ingest::{ReadingSource, parse_payload};
use crate::journal::Journal;
use crate::logging::{self, DataSource};
use crate::model::{ClassifiedReading, IngestionError, LogEntry, Reading, SourceError, ThresholdPolicy};
use crate::snapshot::{Freshness, SnapshotHandle};

/// Age past which the latest reading is reported stale, unless configured.
pub const DEFAULT_STALE_AFTER_SECS: i64 = 10;

/// What one tick of the polling loop did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Ingested(ClassifiedReading),
    /// The source had nothing new.
    Idle,
    /// The source produced a payload that was not a valid reading.
    Rejected,
    /// The source could not be reached.
    Unavailable,
}

pub struct Monitor {
    policy: ThresholdPolicy,
    recipient: Option<String>,
    coordinator: AlertCoordinator,
    alerts: AlertQueue,
    journal: Journal,
    snapshot: SnapshotHandle,
    stale_after: Duration,
    stale_reported: AtomicBool,
}

impl Monitor {
    pub fn new(
        policy: ThresholdPolicy,
        recipient: Option<String>,
        alerts: AlertQueue,
        journal: Journal,
        snapshot: SnapshotHandle,
    ) -> Self {
        let recipient = recipient
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let coordinator = AlertCoordinator::new();
        if let Some(r) = &recipient {
            coordinator.register(r);
        }
        Self {
            policy,
            recipient,
            coordinator,
            alerts,
            journal,
            snapshot,
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS),
            stale_reported: AtomicBool::new(false),
        }
    }

    pub fn with_stale_after(mut self, max_age: Duration) -> Self {
        self.stale_after = max_age;
        self
    }

    pub fn policy(&self) -> ThresholdPolicy {
        self.policy
    }

    pub fn coordinator(&self) -> &AlertCoordinator {
        &self.coordinator
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Read-only handle for the dashboard.
    pub fn snapshot(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    /// Runs one validated reading through the pipeline.
    pub fn ingest(&self, reading: Reading) -> ClassifiedReading {
        let classified = self.policy.classify_reading(&reading);
        let status = classified.status;

        if self
            .coordinator
            .evaluate_optional(self.recipient.as_deref(), status)
        {
            if let Some(recipient) = &self.recipient {
                tracing::info!(
                    source = %DataSource::System,
                    to = %recipient,
                    status = %status.label(),
                    upstream = reading.upstream,
                    downstream = reading.downstream,
                    "status changed; queueing alert"
                );
                self.alerts.enqueue(compose(recipient, status, &reading));
            }
        }

        if let Err(e) = self.journal.append(&LogEntry::from(&classified)) {
            logging::log_journal_failure(&e);
        }

        self.snapshot.record(classified);
        tracing::debug!(
            upstream = reading.upstream,
            downstream = reading.downstream,
            difference = reading.difference,
            status = %status.label(),
            "reading ingested"
        );
        classified
    }

    /// Entry point for pushed JSON bodies. An invalid body is rejected
    /// before it is classified, journaled, or shown.
    pub fn ingest_json(&self, body: &str) -> Result<ClassifiedReading, IngestionError> {
        let reading = parse_payload(body, Utc::now())?;
        Ok(self.ingest(reading))
    }

    /// Polls `source` once and ingests whatever it produced.
    pub fn tick<S: ReadingSource + ?Sized>(&self, source: &mut S) -> TickOutcome {
        let outcome = match source.poll() {
            Ok(Some(reading)) => TickOutcome::Ingested(self.ingest(reading)),
            Ok(None) => {
                self.snapshot.mark_reachable();
                TickOutcome::Idle
            }
            Err(e @ SourceError::Rejected(_)) => {
                // The link is up; only this payload was bad.
                logging::log_source_failure(source.data_source(), &e);
                self.snapshot.mark_reachable();
                TickOutcome::Rejected
            }
            Err(e) => {
                logging::log_source_failure(source.data_source(), &e);
                self.snapshot.mark_unavailable(e.to_string());
                TickOutcome::Unavailable
            }
        };
        self.check_freshness_at(Utc::now());
        outcome
    }

    /// Freshness of the latest reading at `now`. Warns once each time the
    /// feed goes stale.
    pub fn check_freshness_at(&self, now: DateTime<Utc>) -> Freshness {
        let snapshot = self.snapshot.current();
        let freshness = snapshot.freshness_at(self.stale_after, now);
        if freshness == Freshness::Stale {
            if !self.stale_reported.swap(true, Ordering::Relaxed) {
                let age = snapshot
                    .latest
                    .map(|c| (now - c.reading.timestamp).num_seconds())
                    .unwrap_or_default();
                tracing::warn!(
                    source = %DataSource::System,
                    age_secs = age,
                    max_age_secs = self.stale_after.num_seconds(),
                    "latest reading is stale; sensor has stopped reporting"
                );
            }
        } else {
            self.stale_reported.store(false, Ordering::Relaxed);
        }
        freshness
    }

    /// Polls `source` once per tick until the tick channel closes.
    pub fn run<S: ReadingSource + ?Sized>(&self, source: &mut S, ticks: &Receiver<Instant>) {
        tracing::info!(
            source = %DataSource::System,
            feed = %source.describe(),
            policy = %self.policy,
            recipient = self.recipient.as_deref().unwrap_or("-"),
            "monitor started"
        );
        for _ in ticks.iter() {
            self.tick(source);
        }
        tracing::info!(source = %DataSource::System, "tick stream closed; monitor stopping");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryWorker, LogMailer, Mailer};
    use crate::model::{AlertMessage, DispatchError, Tier};
    use crate::snapshot::FeedState;
    use chrono::{Local, NaiveDate};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct Scripted(VecDeque<Result<Option<Reading>, SourceError>>);

    impl ReadingSource for Scripted {
        fn poll(&mut self) -> Result<Option<Reading>, SourceError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[derive(Clone, Default)]
    struct RecordingMailer {
        sent: Arc<Mutex<Vec<AlertMessage>>>,
    }

    impl Mailer for RecordingMailer {
        fn send(&self, message: &AlertMessage) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn monitor(dir: &TempDir, recipient: Option<&str>) -> (Monitor, DeliveryWorker) {
        let (queue, worker) = DeliveryWorker::spawn(LogMailer).unwrap();
        let monitor = Monitor::new(
            ThresholdPolicy::Absolute,
            recipient.map(str::to_string),
            queue,
            Journal::new(dir.path(), "daloy_log_"),
            SnapshotHandle::new(16),
        );
        (monitor, worker)
    }

    fn reading(upstream: f64) -> Reading {
        Reading::new(Utc::now(), upstream, 1.0, None).unwrap()
    }

    /// Entries appended from `day` on. A run that crosses midnight spills
    /// into the next day's segment.
    fn entries_since(journal: &Journal, day: NaiveDate) -> Vec<LogEntry> {
        let mut entries = journal.read_segment(day).unwrap();
        if let Some(next) = day.succ_opt() {
            entries.extend(journal.read_segment(next).unwrap());
        }
        entries
    }

    #[test]
    fn test_ingest_journals_and_publishes() {
        let dir = TempDir::new().unwrap();
        let (monitor, _worker) = monitor(&dir, Some("operator@example.org"));
        let day = Local::now().date_naive();

        let classified = monitor.ingest(reading(5.0));
        assert_eq!(classified.status.tier, Tier::Elevated);

        let entries = entries_since(monitor.journal(), day);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status_label, "MODERATE");

        let snap = monitor.snapshot().current();
        assert_eq!(snap.current_status(), Some(classified.status));
        assert_eq!(
            monitor.coordinator().last_sent("operator@example.org"),
            Some(classified.status)
        );
    }

    #[test]
    fn test_missing_downstream_is_rejected_before_anything_happens() {
        let dir = TempDir::new().unwrap();
        let (monitor, _worker) = monitor(&dir, Some("operator@example.org"));
        let day = Local::now().date_naive();

        let err = monitor.ingest_json(r#"{"upstream": 9.0}"#).unwrap_err();
        assert_eq!(err, IngestionError::MissingField("downstream"));

        assert!(entries_since(monitor.journal(), day).is_empty());
        assert_eq!(monitor.coordinator().last_sent("operator@example.org"), None);
        assert!(monitor.snapshot().current().latest.is_none());
    }

    #[test]
    fn test_no_recipient_still_journals() {
        let dir = TempDir::new().unwrap();
        let (monitor, _worker) = monitor(&dir, Some("   "));
        let day = Local::now().date_naive();
        monitor.ingest(reading(8.0));
        let entries = entries_since(monitor.journal(), day);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status_label, "FLOODED");
    }

    #[test]
    fn test_unwritable_journal_does_not_stop_alerts_or_snapshot() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mailer = RecordingMailer::default();
        let (queue, worker) = DeliveryWorker::spawn(mailer.clone()).unwrap();
        let monitor = Monitor::new(
            ThresholdPolicy::Absolute,
            Some("operator@example.org".to_string()),
            queue,
            Journal::new(&blocker, "daloy_log_"),
            SnapshotHandle::new(16),
        );

        monitor.ingest(reading(5.0));
        monitor.ingest(reading(5.5));
        monitor.ingest(reading(8.0));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.current().history.len(), 3);
        assert!(monitor.journal().append(&LogEntry::from(
            &ThresholdPolicy::Absolute.classify_reading(&reading(1.0))
        ))
        .is_err());

        drop(monitor);
        assert_eq!(worker.join().unwrap().sent, 2);
        let subjects: Vec<String> = mailer
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.subject.clone())
            .collect();
        assert_eq!(
            subjects,
            vec!["⚠️ MODERATE - Kanal Alert", "🚨 FLOODED - Kanal Alert"]
        );
    }

    #[test]
    fn test_tick_outcomes_drive_feed_state() {
        let dir = TempDir::new().unwrap();
        let (monitor, _worker) = monitor(&dir, None);
        let mut source = Scripted(VecDeque::from(vec![
            Err(SourceError::Unavailable("unplugged".into())),
            Ok(Some(reading(1.0))),
            Err(SourceError::Rejected(IngestionError::MalformedLine("x".into()))),
            Ok(None),
        ]));

        assert_eq!(monitor.tick(&mut source), TickOutcome::Unavailable);
        assert_eq!(
            monitor.snapshot().current().feed,
            FeedState::Unavailable("source unavailable: unplugged".to_string())
        );

        assert!(matches!(monitor.tick(&mut source), TickOutcome::Ingested(_)));
        assert_eq!(monitor.tick(&mut source), TickOutcome::Rejected);
        assert_eq!(monitor.snapshot().current().feed, FeedState::Connected);
        assert_eq!(monitor.tick(&mut source), TickOutcome::Idle);
    }

    #[test]
    fn test_recovered_source_with_nothing_new_goes_back_to_waiting() {
        let dir = TempDir::new().unwrap();
        let (monitor, _worker) = monitor(&dir, None);
        let mut source = Scripted(VecDeque::from(vec![
            Err(SourceError::Unavailable("refused".into())),
            Ok(None),
        ]));

        assert_eq!(monitor.tick(&mut source), TickOutcome::Unavailable);
        assert_eq!(monitor.tick(&mut source), TickOutcome::Idle);

        let snap = monitor.snapshot().current();
        assert_eq!(snap.feed, FeedState::Waiting);
        assert_eq!(
            snap.remark_at(Duration::seconds(10), Utc::now()),
            "Waiting for sensor readings..."
        );
    }

    #[test]
    fn test_rejected_payload_clears_earlier_outage() {
        let dir = TempDir::new().unwrap();
        let (monitor, _worker) = monitor(&dir, None);
        let mut source = Scripted(VecDeque::from(vec![
            Ok(Some(reading(2.0))),
            Err(SourceError::Unavailable("refused".into())),
            Err(SourceError::Rejected(IngestionError::MalformedLine("2.0".into()))),
        ]));

        monitor.tick(&mut source);
        monitor.tick(&mut source);
        assert_eq!(monitor.tick(&mut source), TickOutcome::Rejected);
        assert_eq!(monitor.snapshot().current().feed, FeedState::Connected);
    }

    #[test]
    fn test_freshness_follows_configured_age() {
        let dir = TempDir::new().unwrap();
        let (monitor, _worker) = monitor(&dir, None);
        let monitor = monitor.with_stale_after(Duration::seconds(30));
        assert_eq!(monitor.check_freshness_at(Utc::now()), Freshness::NoReading);

        let at = Utc::now();
        monitor.ingest(Reading::new(at, 2.0, 1.0, None).unwrap());

        assert_eq!(
            monitor.check_freshness_at(at + Duration::seconds(20)),
            Freshness::Live
        );
        assert_eq!(
            monitor.check_freshness_at(at + Duration::seconds(31)),
            Freshness::Stale
        );
        // Stays stale on later checks without a new reading.
        assert_eq!(
            monitor.check_freshness_at(at + Duration::seconds(60)),
            Freshness::Stale
        );
    }

    #[test]
    fn test_run_stops_when_ticks_close() {
        let dir = TempDir::new().unwrap();
        let (monitor, _worker) = monitor(&dir, None);
        let day = Local::now().date_naive();
        let mut source = Scripted(VecDeque::from(vec![
            Ok(Some(reading(2.0))),
            Ok(Some(reading(3.0))),
            Ok(Some(reading(4.0))),
        ]));

        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..3 {
            tx.send(Instant::now()).unwrap();
        }
        drop(tx);
        monitor.run(&mut source, &rx);

        let ups: Vec<f64> = entries_since(monitor.journal(), day)
            .iter()
            .map(|e| e.upstream)
            .collect();
        assert_eq!(ups, vec![2.0, 3.0, 4.0]);
    }
}
