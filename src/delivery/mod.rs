//! Background alert delivery.
//!
//! The monitor never talks to the mail server. It pushes `AlertMessage`s onto
//! an unbounded channel and a single worker thread sends them one at a time.
//! A failed send is logged and dropped: no retry, no error back to the
//! monitor, and the next message is attempted normally.
//!
//! The queue has no bound. If the relay stays down the backlog grows; it is
//! exposed through [`AlertQueue::backlog`] and logged past
//! [`BACKLOG_WARN_THRESHOLD`] so the growth is visible rather than silent.

pub mod smtp;

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::io;
use std::thread::{self, JoinHandle};

use crate::logging::{self, DataSource};
use crate::model::{AlertMessage, DispatchError};

pub use smtp::{EmailConfig, SmtpMailer};

/// Backlog size above which every enqueue logs a warning.
pub const BACKLOG_WARN_THRESHOLD: usize = 50;

/// The mail transport capability: send one message to one address.
pub trait Mailer: Send + 'static {
    fn send(&self, message: &AlertMessage) -> Result<(), DispatchError>;
}

/// Dry-run transport used when SMTP is not configured.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &AlertMessage) -> Result<(), DispatchError> {
        tracing::warn!(
            source = %DataSource::Mail,
            to = %message.recipient,
            subject = %message.subject,
            "SMTP not configured; alert logged instead of sent"
        );
        Ok(())
    }
}

/// Outcome counters reported when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: u64,
    pub failed: u64,
}

/// Producer handle for the alert queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AlertQueue {
    tx: Sender<AlertMessage>,
}

impl AlertQueue {
    /// Queues a message for delivery. Never blocks.
    pub fn enqueue(&self, message: AlertMessage) {
        let recipient = message.recipient.clone();
        if self.tx.send(message).is_err() {
            // Worker thread is gone (panicked); nothing left to deliver with.
            tracing::error!(
                source = %DataSource::Mail,
                to = %recipient,
                "delivery worker stopped; alert dropped"
            );
            return;
        }

        let backlog = self.tx.len();
        if backlog > BACKLOG_WARN_THRESHOLD {
            tracing::warn!(
                source = %DataSource::Mail,
                backlog,
                "alert queue is growing; mail transport may be failing or slow"
            );
        }
    }

    /// Messages queued but not yet picked up by the worker.
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

/// Handle on the worker thread.
pub struct DeliveryWorker {
    handle: JoinHandle<DeliveryStats>,
}

impl DeliveryWorker {
    /// Starts the worker thread and returns the queue that feeds it.
    pub fn spawn<M: Mailer>(mailer: M) -> io::Result<(AlertQueue, DeliveryWorker)> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("daloy-delivery".to_string())
            .spawn(move || drain(mailer, rx))?;
        Ok((AlertQueue { tx }, DeliveryWorker { handle }))
    }

    /// Waits for the worker to finish. It finishes once every `AlertQueue`
    /// clone has been dropped and the remaining messages are processed.
    pub fn join(self) -> thread::Result<DeliveryStats> {
        self.handle.join()
    }
}

fn drain<M: Mailer>(mailer: M, rx: Receiver<AlertMessage>) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    for message in rx.iter() {
        match mailer.send(&message) {
            Ok(()) => {
                stats.sent += 1;
                tracing::info!(
                    source = %DataSource::Mail,
                    to = %message.recipient,
                    subject = %message.subject,
                    "alert sent"
                );
            }
            Err(e) => {
                stats.failed += 1;
                logging::log_dispatch_failure(&message.recipient, &e);
            }
        }
    }
    tracing::debug!(source = %DataSource::Mail, ?stats, "delivery worker exiting");
    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
