//! Alert email delivery via SMTP.
//!
//! [`SmtpMailer`] wraps the blocking `lettre` transport. The relay is reached
//! over implicit TLS (port 465 by default, as Gmail and most hosted relays
//! expect). Credentials never live in the config file: they come from
//! `SMTP_USER` / `SMTP_PASSWORD`, typically via `.env`.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Deserialize;
use std::time::Duration;

use super::Mailer;
use crate::model::{AlertMessage, DispatchError};

/// Default SMTP port (implicit TLS).
pub const DEFAULT_SMTP_PORT: u16 = 465;

const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// `[smtp]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    /// SMTP relay hostname, e.g. `smtp.gmail.com`.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// RFC 5322 "From" address.
    pub from: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub user: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl EmailConfig {
    /// Fills `user` / `password` from `SMTP_USER` / `SMTP_PASSWORD`.
    pub fn with_env_credentials(mut self) -> Self {
        self.user = std::env::var("SMTP_USER").ok().filter(|s| !s.is_empty());
        self.password = std::env::var("SMTP_PASSWORD").ok().filter(|s| !s.is_empty());
        self
    }
}

pub struct SmtpMailer {
    config: EmailConfig,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Result<Self, DispatchError> {
        let mut builder = SmtpTransport::relay(&config.host)?
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(user), Some(pass)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }

    /// Opens and closes a connection to the relay.
    pub fn test_connection(&self) -> Result<bool, DispatchError> {
        Ok(self.transport.test_connection()?)
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }
}

/// Assembles the MIME message for an alert.
pub fn build_message(from: &str, message: &AlertMessage) -> Result<Message, DispatchError> {
    Message::builder()
        .from(from.parse()?)
        .to(message.recipient.parse()?)
        .subject(message.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())
        .map_err(|e| DispatchError::Build(e.to_string()))
}

impl Mailer for SmtpMailer {
    fn send(&self, message: &AlertMessage) -> Result<(), DispatchError> {
        let email = build_message(&self.config.from, message)?;
        self.transport.send(&email)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
