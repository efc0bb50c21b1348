//! Configuration for the SMTP transport and the queue drainer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the SMTP session is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain connection, for local relays and test servers
    None,
    /// Upgrade with STARTTLS after connecting
    #[default]
    StartTls,
    /// TLS from the first byte (SMTPS)
    Wrapper,
}

/// Static SMTP relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub tls: TlsMode,

    /// Environment variable holding the SMTP username
    pub username_env: Option<String>,

    /// Environment variable holding the SMTP password
    pub password_env: Option<String>,

    /// Sender address
    #[serde(default = "default_from")]
    pub from: String,

    /// Sender display name
    pub from_name: Option<String>,

    /// Reply-To address
    pub reply_to: Option<String>,

    /// Per-command timeout inside the SMTP session (seconds)
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            tls: TlsMode::default(),
            username_env: None,
            password_env: None,
            from: default_from(),
            from_name: None,
            reply_to: None,
            timeout_secs: default_smtp_timeout(),
        }
    }
}

/// Drainer behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainerConfig {
    /// Whether the scheduled drain job is registered
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron expression with seconds field
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Upper bound on messages taken per drain, 0 for no bound
    #[serde(default)]
    pub max_messages_per_drain: usize,

    /// Deliveries handled at once within one drain
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    /// Deadline for a single direct send (seconds)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl DrainerConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.max_concurrent_deliveries.max(1)
    }

    pub(crate) fn message_limit(&self) -> Option<usize> {
        (self.max_messages_per_drain > 0).then_some(self.max_messages_per_drain)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.send_timeout_secs == 0 {
            return Err("drainer.send_timeout_secs must be greater than 0".to_string());
        }

        if self.schedule.trim().is_empty() {
            return Err("drainer.schedule cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_schedule(),
            max_messages_per_drain: 0,
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from() -> String {
    "no-reply@localhost".to_string()
}

fn default_smtp_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_schedule() -> String {
    "*/5 * * * * *".to_string()
}

fn default_max_concurrent_deliveries() -> usize {
    1
}

fn default_send_timeout() -> u64 {
    60
}
