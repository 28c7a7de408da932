//! Edge-triggered alert decisions, one state per recipient.
//!
//! A recipient is alerted when the status enters a non-normal tier it was not
//! already alerted for. Staying in that tier is silent; returning to normal
//! clears the memory so the next excursion alerts again; escalating (or
//! de-escalating) between non-normal tiers alerts once per new tier.
//!
//! The whole check-and-set runs under one lock, so two readings evaluated
//! concurrently for the same recipient can never both observe the stale
//! `last_status_sent` and double-send.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::model::{AlertMessage, Reading, Status};

/// Alert memory for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertState {
    pub recipient: String,
    pub last_status_sent: Option<Status>,
}

impl AlertState {
    fn new(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            last_status_sent: None,
        }
    }

    /// Applies one status to this state. Returns `true` if an alert is due.
    fn observe(&mut self, status: Status) -> bool {
        if status.is_normal() {
            self.last_status_sent = None;
            return false;
        }
        if self.last_status_sent == Some(status) {
            return false;
        }
        self.last_status_sent = Some(status);
        true
    }
}

#[derive(Debug, Default)]
pub struct AlertCoordinator {
    states: Mutex<HashMap<String, AlertState>>,
}

impl AlertCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty state for `recipient` if none exists yet.
    pub fn register(&self, recipient: &str) {
        self.states
            .lock()
            .entry(recipient.to_string())
            .or_insert_with(|| AlertState::new(recipient));
    }

    /// Decides whether `status` warrants a dispatch to `recipient`, and
    /// records the decision. Unknown recipients are registered on the fly.
    pub fn evaluate(&self, recipient: &str, status: Status) -> bool {
        let mut states = self.states.lock();
        let state = states
            .entry(recipient.to_string())
            .or_insert_with(|| AlertState::new(recipient));
        state.observe(status)
    }

    /// Like `evaluate`, but a missing recipient is a no-op rather than an
    /// error: nothing is registered and nothing is dispatched.
    pub fn evaluate_optional(&self, recipient: Option<&str>, status: Status) -> bool {
        match recipient {
            Some(r) if !r.trim().is_empty() => self.evaluate(r, status),
            _ => false,
        }
    }

    pub fn last_sent(&self, recipient: &str) -> Option<Status> {
        self.states
            .lock()
            .get(recipient)
            .and_then(|s| s.last_status_sent)
    }

    pub fn state(&self, recipient: &str) -> Option<AlertState> {
        self.states.lock().get(recipient).cloned()
    }
}

/// Builds the email for a status transition.
pub fn compose(recipient: &str, status: Status, reading: &Reading) -> AlertMessage {
    let body = format!(
        "{}\n\nUpstream:   {:.2} cm\nDownstream: {:.2} cm\nDifference: {:.2} cm\nRecorded:   {}",
        status.remark(),
        reading.upstream,
        reading.downstream,
        reading.difference,
        reading.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    AlertMessage {
        recipient: recipient.to_string(),
        subject: format!("{} - Kanal Alert", status),
        body,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
