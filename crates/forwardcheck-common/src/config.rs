//! Configuration for forwardcheck

use crate::types::{parse_address, DeletionPolicy, MatchStrategy, TimestampSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `FORWARDCHECK__SMTP__PASSWORD`
pub const ENV_PREFIX: &str = "FORWARDCHECK";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Outbound relay
    pub smtp: SmtpConfig,

    /// Destination mailbox
    pub imap: ImapConfig,

    /// Verification settings
    pub check: CheckConfig,

    /// Scheduler settings (daemon mode)
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Result publishing
    #[serde(default)]
    pub report: ReportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Outbound relay (SMTP submission) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay hostname
    pub host: String,

    /// Submission port, upgraded with STARTTLS
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Login name
    pub username: String,

    /// Password (may come from the environment)
    #[serde(default)]
    pub password: String,

    /// Envelope and header sender of the probe
    pub sender: String,

    /// Per-command timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> u64 {
    30
}

/// Destination mailbox (IMAP over implicit TLS) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    /// Mailbox server hostname
    pub host: String,

    /// IMAPS port
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Login name
    pub username: String,

    /// Password (may come from the environment)
    #[serde(default)]
    pub password: String,

    /// Mailbox to poll
    #[serde(default = "default_mailbox")]
    pub mailbox: String,

    /// Upper bound in seconds for login and for each poll cycle's commands
    #[serde(default = "default_imap_timeout")]
    pub timeout_secs: u64,
}

fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_imap_timeout() -> u64 {
    30
}

/// Verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Destination addresses whose forwarding is verified
    pub emails: Vec<String>,

    /// Give up on an address after this many seconds
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,

    /// Pause between mailbox polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Delete inspected messages from the mailbox
    #[serde(default)]
    pub delete_emails: bool,

    /// Coarse server-side candidate filter
    #[serde(default)]
    pub match_strategy: MatchStrategy,

    /// Which inspected messages are deleted when `delete_emails` is set
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Timestamp compared against the verification start
    #[serde(default)]
    pub timestamp_source: TimestampSource,

    /// Fixed part of the probe subject
    #[serde(default = "default_subject_base")]
    pub subject_base: String,

    /// Probe body
    #[serde(default = "default_body")]
    pub body: String,

    /// Maximum addresses verified at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_check_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    5
}

pub fn default_subject_base() -> String {
    "EMail Forward Test - email_forwarding_checker".to_string()
}

pub fn default_body() -> String {
    "This is an automated email to test if configured mail forwarding is working - sent by forwardcheck".to_string()
}

fn default_concurrency() -> usize {
    1
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between verification runs
    #[serde(default = "default_daemon_interval")]
    pub interval_secs: u64,

    /// Run once immediately on startup
    #[serde(default = "default_run_now")]
    pub run_now: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_daemon_interval(),
            run_now: default_run_now(),
        }
    }
}

fn default_daemon_interval() -> u64 {
    3600
}

fn default_run_now() -> bool {
    true
}

/// Reporter backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterKind {
    /// Print the report as JSON
    #[default]
    Stdout,
    /// POST the report to an HTTP endpoint
    Webhook,
    /// Publish the report to an MQTT broker
    Mqtt,
}

/// How a report is split into published messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// One payload holding the whole report
    #[default]
    Aggregate,
    /// One payload per address under `<topic_base>/<address>`
    PerAddress,
}

/// Result publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub kind: ReporterKind,

    /// Endpoint for the webhook reporter
    pub url: Option<String>,

    /// Topic namespace for published keys
    #[serde(default = "default_topic_base")]
    pub topic_base: String,

    #[serde(default)]
    pub mode: PublishMode,

    /// MQTT broker host
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// MQTT broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT credentials, if the broker requires them
    pub username: Option<String>,
    pub password: Option<String>,

    /// Publish timeout in seconds
    #[serde(default = "default_report_timeout")]
    pub timeout_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            kind: ReporterKind::default(),
            url: None,
            topic_base: default_topic_base(),
            mode: PublishMode::default(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            timeout_secs: default_report_timeout(),
        }
    }
}

fn default_topic_base() -> String {
    "email_forwarding_checker".to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_report_timeout() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl CheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Deletion policy in effect, or `None` when cleanup is disabled
    pub fn cleanup(&self) -> Option<DeletionPolicy> {
        self.delete_emails.then_some(self.deletion_policy)
    }
}

impl ImapConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DaemonConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a TOML file, overlaid with `FORWARDCHECK__*`
    /// environment variables.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(crate::Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("check.emails")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        require("smtp.host", &self.smtp.host)?;
        require("smtp.username", &self.smtp.username)?;
        require("smtp.password", &self.smtp.password)?;
        require("imap.host", &self.imap.host)?;
        require("imap.username", &self.imap.username)?;
        require("imap.password", &self.imap.password)?;
        require("imap.mailbox", &self.imap.mailbox)?;
        if self.imap.timeout_secs == 0 {
            return Err(crate::Error::Validation(
                "imap.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if parse_address(&self.smtp.sender).is_none() {
            return Err(crate::Error::Validation(format!(
                "smtp.sender is not an email address: '{}'",
                self.smtp.sender
            )));
        }

        if self.check.emails.is_empty() {
            return Err(crate::Error::Validation(
                "check.emails must list at least one address".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for email in &self.check.emails {
            if parse_address(email).is_none() {
                return Err(crate::Error::Validation(format!(
                    "Invalid email address: '{}'",
                    email
                )));
            }
            if !seen.insert(email.to_ascii_lowercase()) {
                return Err(crate::Error::Validation(format!(
                    "Duplicate email address: '{}'",
                    email
                )));
            }
        }

        if self.check.timeout_secs == 0 {
            return Err(crate::Error::Validation(
                "check.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.check.poll_interval_secs == 0 {
            return Err(crate::Error::Validation(
                "check.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.check.concurrency == 0 {
            return Err(crate::Error::Validation(
                "check.concurrency must be at least 1".to_string(),
            ));
        }
        require("check.subject_base", &self.check.subject_base)?;

        if self.daemon.interval_secs == 0 {
            return Err(crate::Error::Validation(
                "daemon.interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.report.kind == ReporterKind::Webhook {
            match self.report.url.as_deref() {
                Some(url) if !url.trim().is_empty() => {}
                _ => {
                    return Err(crate::Error::Validation(
                        "report.url is required for the webhook reporter".to_string(),
                    ))
                }
            }
        }
        if self.report.kind == ReporterKind::Mqtt {
            require("report.host", &self.report.host)?;
        }

        Ok(())
    }
}

fn require(field: &str, value: &str) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(crate::Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
