//! Deployment Verification Module
//!
//! Checks a loaded configuration against the real world before the service
//! is left running unattended: can the reading source be reached, can the
//! journal be written, can the SMTP relay be reached, and is anyone going to
//! receive the alerts.
//!
//! Run with `daloy_service verify` (add `--json` for the machine-readable report).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::time::Duration;

use crate::config::{Config, SourceConfig};
use crate::delivery::{EmailConfig, SmtpMailer};
use crate::ingest::remote::RemoteSource;
use crate::ingest::serial::STDIN_PATH;
use crate::journal::Journal;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub source: ComponentCheck,
    pub journal: ComponentCheck,
    pub smtp: ComponentCheck,
    pub recipient: ComponentCheck,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub working: usize,
    pub degraded: usize,
    pub failed: usize,
}

/// Result of checking one part of the deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    /// What was checked, e.g. the device path or relay host.
    pub target: String,
    pub status: VerificationStatus,
    pub detail: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl ComponentCheck {
    fn new(name: &str, target: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            target: target.into(),
            status: VerificationStatus::Failed,
            detail: None,
            error_message: None,
        }
    }

    fn success(mut self, detail: impl Into<String>) -> Self {
        self.status = VerificationStatus::Success;
        self.detail = Some(detail.into());
        self
    }

    fn partial(mut self, detail: impl Into<String>) -> Self {
        self.status = VerificationStatus::PartialSuccess;
        self.detail = Some(detail.into());
        self
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = VerificationStatus::Failed;
        self.error_message = Some(error.into());
        self
    }
}

// ============================================================================
// Individual checks
// ============================================================================

/// Checks that the configured reading source can be reached.
pub fn verify_source(source: &SourceConfig, journal: &Journal) -> ComponentCheck {
    match source {
        SourceConfig::Serial { path } => {
            let check = ComponentCheck::new("source", format!("serial {}", path.display()));
            if path.as_os_str() == STDIN_PATH {
                return check.success("reading from stdin");
            }
            match File::open(path) {
                Ok(_) => check.success("device opened"),
                Err(e) => check.failed(format!("cannot open device: {}", e)),
            }
        }
        SourceConfig::Remote { url, timeout_ms } => {
            let check = ComponentCheck::new("source", format!("remote {}", url));
            let remote = match RemoteSource::new(url.clone(), Duration::from_millis(*timeout_ms)) {
                Ok(r) => r,
                Err(e) => return check.failed(format!("cannot build HTTP client: {}", e)),
            };
            match remote.fetch_latest() {
                Ok(Some(_)) => check.success("latest record available"),
                Ok(None) => check.partial("store reachable but holds no readings yet"),
                Err(e) => check.failed(e.to_string()),
            }
        }
        SourceConfig::Replay { day, .. } => {
            let path = journal.segment_path(*day);
            let check = ComponentCheck::new("source", format!("replay {}", path.display()));
            match journal.read_segment(*day) {
                Ok(entries) if entries.is_empty() => {
                    check.partial("segment is empty or missing; replay will stay idle")
                }
                Ok(entries) => check.success(format!("{} recorded entries", entries.len())),
                Err(e) => check.failed(e.to_string()),
            }
        }
    }
}

/// Checks that the journal directory accepts writes.
pub fn verify_journal(journal: &Journal) -> ComponentCheck {
    let check = ComponentCheck::new("journal", journal.dir().display().to_string());
    match journal.probe_writable() {
        Ok(()) => check.success("directory writable"),
        Err(e) => check.failed(e.to_string()),
    }
}

/// Checks the SMTP relay. A missing `[smtp]` section is a degraded but
/// legal deployment: alerts are only logged.
pub fn verify_smtp(smtp: Option<&EmailConfig>) -> ComponentCheck {
    let Some(config) = smtp else {
        return ComponentCheck::new("smtp", "-")
            .partial("not configured; alerts will be logged instead of mailed");
    };
    let check = ComponentCheck::new("smtp", format!("{}:{}", config.host, config.port));
    if config.user.is_none() || config.password.is_none() {
        return check.failed("SMTP_USER / SMTP_PASSWORD not set");
    }
    let mailer = match SmtpMailer::new(config.clone()) {
        Ok(m) => m,
        Err(e) => return check.failed(e.to_string()),
    };
    match mailer.test_connection() {
        Ok(true) => check.success("relay accepted connection"),
        Ok(false) => check.failed("relay did not accept the connection"),
        Err(e) => check.failed(e.to_string()),
    }
}

pub fn verify_recipient(recipient: Option<&str>) -> ComponentCheck {
    match recipient {
        Some(r) => ComponentCheck::new("recipient", r).success("alerts enabled"),
        None => ComponentCheck::new("recipient", "-")
            .partial("no recipient; status changes will not be alerted"),
    }
}

// ============================================================================
// Full run
// ============================================================================

pub fn run_verification(config: &Config) -> VerificationReport {
    let journal = config.journal.journal();

    println!("🔍 Verifying deployment...");
    let checks = [
        verify_source(&config.source, &journal),
        verify_journal(&journal),
        verify_smtp(config.smtp.as_ref()),
        verify_recipient(config.recipient()),
    ];
    for check in &checks {
        print_check(check);
    }

    let summary = summarize(&checks);
    let [source, journal, smtp, recipient] = checks;
    VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        source,
        journal,
        smtp,
        recipient,
        summary,
    }
}

fn summarize(checks: &[ComponentCheck]) -> VerificationSummary {
    let mut summary = VerificationSummary {
        total: checks.len(),
        working: 0,
        degraded: 0,
        failed: 0,
    };
    for check in checks {
        match check.status {
            VerificationStatus::Success => summary.working += 1,
            VerificationStatus::PartialSuccess => summary.degraded += 1,
            VerificationStatus::Failed => summary.failed += 1,
        }
    }
    summary
}

fn print_check(check: &ComponentCheck) {
    print!("  {:<10} {} ... ", check.name, check.target);
    match check.status {
        VerificationStatus::Success => {
            println!("✓ OK ({})", check.detail.as_deref().unwrap_or("-"));
        }
        VerificationStatus::PartialSuccess => {
            println!("⚠ {}", check.detail.as_deref().unwrap_or("degraded"));
        }
        VerificationStatus::Failed => {
            println!("✗ FAILED: {}", check.error_message.as_deref().unwrap_or("Unknown"));
        }
    }
}

impl VerificationReport {
    /// True when nothing outright failed.
    pub fn is_deployable(&self) -> bool {
        self.summary.failed == 0
    }
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 VERIFICATION SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!(
        "Checks:   {}/{} working  ({} degraded, {} failed)",
        report.summary.working, report.summary.total, report.summary.degraded, report.summary.failed
    );
    if report.is_deployable() {
        println!("Ready to run.");
    } else {
        println!("Fix the failed checks before deploying.");
    }
    println!("═══════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogEntry, ThresholdPolicy};
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 14).unwrap()
    }

    #[test]
    fn test_journal_check_succeeds_in_temp_dir() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path().join("logs"), "daloy_log_");
        let check = verify_journal(&journal);
        assert_eq!(check.status, VerificationStatus::Success);
    }

    #[test]
    fn test_journal_check_fails_when_dir_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, "not a directory").unwrap();
        let check = verify_journal(&Journal::new(blocker, "daloy_log_"));
        assert_eq!(check.status, VerificationStatus::Failed);
        assert!(check.error_message.is_some());
    }

    #[test]
    fn test_missing_serial_device_fails() {
        let source = SourceConfig::Serial {
            path: PathBuf::from("/nonexistent/ttyUSB9"),
        };
        let check = verify_source(&source, &Journal::default());
        assert_eq!(check.status, VerificationStatus::Failed);
    }

    #[test]
    fn test_stdin_source_passes() {
        let source = SourceConfig::Serial {
            path: PathBuf::from(STDIN_PATH),
        };
        let check = verify_source(&source, &Journal::default());
        assert_eq!(check.status, VerificationStatus::Success);
    }

    #[test]
    fn test_replay_source_counts_entries() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path(), "daloy_log_");
        let source = SourceConfig::Replay {
            day: day(),
            looped: false,
        };
        assert_eq!(
            verify_source(&source, &journal).status,
            VerificationStatus::PartialSuccess
        );

        let reading = crate::model::Reading::new(Utc::now(), 5.0, 2.0, None).unwrap();
        let classified = ThresholdPolicy::Absolute.classify_reading(&reading);
        journal.append_on(day(), &LogEntry::from(&classified)).unwrap();

        let check = verify_source(&source, &journal);
        assert_eq!(check.status, VerificationStatus::Success);
        assert_eq!(check.detail.as_deref(), Some("1 recorded entries"));
    }

    #[test]
    fn test_unconfigured_smtp_is_degraded_not_failed() {
        assert_eq!(verify_smtp(None).status, VerificationStatus::PartialSuccess);
    }

    #[test]
    fn test_smtp_without_credentials_fails_without_connecting() {
        let config = EmailConfig {
            host: "smtp.example.org".to_string(),
            port: 465,
            from: "canal@example.org".to_string(),
            timeout_secs: 1,
            user: None,
            password: None,
        };
        let check = verify_smtp(Some(&config));
        assert_eq!(check.status, VerificationStatus::Failed);
        assert_eq!(check.target, "smtp.example.org:465");
    }

    #[test]
    fn test_summary_counts_and_serializes() {
        let checks = [
            ComponentCheck::new("a", "x").success("ok"),
            ComponentCheck::new("b", "y").partial("meh"),
            ComponentCheck::new("c", "z").failed("no"),
            verify_recipient(Some("operator@example.org")),
        ];
        let summary = summarize(&checks);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.working, 2);
        assert_eq!(summary.degraded, 1);
        assert_eq!(summary.failed, 1);

        let json = serde_json::to_value(&checks[2]).unwrap();
        assert_eq!(json["status"], "Failed");
        assert_eq!(json["error_message"], "no");
    }
}
