/// Service configuration
///
/// Loaded from a TOML file (default `daloy.toml`). Secrets stay out of the
/// file: SMTP credentials and an optional recipient override are read from
/// the environment, which `main` populates from `.env` via `dotenv`.
///
/// ```toml
/// [source]
/// kind = "serial"          # "serial" | "remote" | "replay"
/// path = "/dev/ttyUSB0"
///
/// [monitor]
/// poll_interval_ms = 1000
/// policy = "absolute"      # or "differential"
///
/// [alerts]
/// recipient = "operator@example.org"
///
/// [smtp]
/// host = "smtp.gmail.com"
/// from = "canal.monitoring@example.org"
/// ```

use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::delivery::EmailConfig;
use crate::journal::{DEFAULT_JOURNAL_DIR, DEFAULT_SEGMENT_PREFIX, Journal};
use crate::model::ThresholdPolicy;
use crate::snapshot::DEFAULT_HISTORY_LEN;

/// Environment variable that overrides `[alerts] recipient`.
pub const RECIPIENT_ENV: &str = "DALOY_ALERT_RECIPIENT";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    /// Absent section means alerts are logged, not mailed.
    pub smtp: Option<EmailConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Line stream from a serial device (or `-` for stdin).
    Serial { path: PathBuf },
    /// HTTP relay polled for its most recent record.
    Remote {
        url: String,
        #[serde(default = "default_request_timeout_ms")]
        timeout_ms: u64,
    },
    /// Replay of a recorded journal day.
    Replay {
        day: NaiveDate,
        #[serde(default)]
        looped: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub policy: ThresholdPolicy,
    /// Points kept in the dashboard's rolling chart buffers.
    pub history_len: usize,
    /// A reading older than this is shown as stale.
    pub stale_after_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            policy: ThresholdPolicy::Absolute,
            history_len: DEFAULT_HISTORY_LEN,
            stale_after_secs: 10,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertsConfig {
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JournalConfig {
    pub dir: PathBuf,
    pub prefix: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_JOURNAL_DIR),
            prefix: DEFAULT_SEGMENT_PREFIX.to_string(),
        }
    }
}

impl JournalConfig {
    pub fn journal(&self) -> Journal {
        Journal::new(self.dir.clone(), self.prefix.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` overrides it.
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    2000
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Reads, parses, applies environment overrides, and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Pulls secrets and overrides from the process environment.
    pub fn apply_env(&mut self) {
        if let Ok(recipient) = std::env::var(RECIPIENT_ENV) {
            self.alerts.recipient = Some(recipient);
        }
        if let Some(smtp) = self.smtp.take() {
            self.smtp = Some(smtp.with_env_credentials());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.monitor.history_len == 0 {
            return Err(ConfigError::Invalid(
                "monitor.history_len must be positive".to_string(),
            ));
        }
        match &self.source {
            SourceConfig::Serial { path } if path.as_os_str().is_empty() => {
                return Err(ConfigError::Invalid("source.path is empty".to_string()));
            }
            SourceConfig::Remote { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                return Err(ConfigError::Invalid(format!(
                    "source.url must be an http(s) URL, got {:?}",
                    url
                )));
            }
            SourceConfig::Remote { timeout_ms: 0, .. } => {
                return Err(ConfigError::Invalid(
                    "source.timeout_ms must be positive".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(r) = self.recipient() {
            if !r.contains('@') {
                return Err(ConfigError::Invalid(format!(
                    "alerts.recipient is not an email address: {:?}",
                    r
                )));
            }
        }
        Ok(())
    }

    /// Recipient to alert, if any. Blank values count as none.
    pub fn recipient(&self) -> Option<&str> {
        self.alerts
            .recipient
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [source]
        kind = "serial"
        path = "/dev/ttyUSB0"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).expect("minimal config should parse");
        assert_eq!(
            config.source,
            SourceConfig::Serial {
                path: PathBuf::from("/dev/ttyUSB0")
            }
        );
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.monitor.policy, ThresholdPolicy::Absolute);
        assert_eq!(config.journal.dir, PathBuf::from("logs"));
        assert_eq!(config.journal.prefix, "daloy_log_");
        assert_eq!(config.smtp, None);
        assert_eq!(config.recipient(), None);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            [source]
            kind = "remote"
            url = "http://192.168.1.20:5000/data"
            timeout_ms = 800

            [monitor]
            poll_interval_ms = 2000
            policy = "differential"
            history_len = 120
            stale_after_secs = 30

            [alerts]
            recipient = "operator@example.org"

            [journal]
            dir = "/var/lib/daloy"
            prefix = "kanal_"

            [smtp]
            host = "smtp.gmail.com"
            from = "canal.monitoring@example.org"

            [logging]
            level = "debug"
            file = "/var/log/daloy.log"
        "#;
        let config = Config::parse(text).expect("full config should parse");
        assert_eq!(
            config.source,
            SourceConfig::Remote {
                url: "http://192.168.1.20:5000/data".to_string(),
                timeout_ms: 800
            }
        );
        assert_eq!(config.monitor.policy, ThresholdPolicy::Differential);
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.monitor.stale_after(), chrono::Duration::seconds(30));
        assert_eq!(config.recipient(), Some("operator@example.org"));
        assert_eq!(config.journal.journal().dir(), Path::new("/var/lib/daloy"));
        assert_eq!(config.smtp.as_ref().map(|s| s.port), Some(465));
        assert_eq!(config.logging.level, "debug");
        config.validate().expect("full config is valid");
    }

    #[test]
    fn test_replay_source_parses_day() {
        let text = r#"
            [source]
            kind = "replay"
            day = "2024-07-14"
            looped = true
        "#;
        let config = Config::parse(text).unwrap();
        assert_eq!(
            config.source,
            SourceConfig::Replay {
                day: NaiveDate::from_ymd_opt(2024, 7, 14).unwrap(),
                looped: true
            }
        );
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let text = format!("{}\n[monitor]\npolicy = \"relative\"\n", MINIMAL);
        assert!(matches!(Config::parse(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let text = format!("{}\n[alerts]\nrecipients = [\"a@b.c\"]\n", MINIMAL);
        assert!(matches!(Config::parse(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::parse(MINIMAL).unwrap();
        config.monitor.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::parse(MINIMAL).unwrap();
        config.alerts.recipient = Some("operator".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config::parse(
            "[source]\nkind = \"remote\"\nurl = \"ftp://relay/data\"\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_blank_recipient_counts_as_none() {
        let mut config = Config::parse(MINIMAL).unwrap();
        config.alerts.recipient = Some("   ".to_string());
        assert_eq!(config.recipient(), None);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let result = Config::load(Path::new("/nonexistent/daloy.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
