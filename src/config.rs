use crate::messaging::{MessagingConfig, QueueBackend};
use crate::notifications::{DrainerConfig, SmtpConfig};
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Durable queue settings
    #[serde(default)]
    pub queue: MessagingConfig,

    /// Direct transport settings
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Drain cadence and limits
    #[serde(default)]
    pub drainer: DrainerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load with an explicit override file
    ///
    /// Layers, lowest first: embedded defaults, the file (if present),
    /// `NOTIFY_RELAY__*` environment variables.
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("NOTIFY_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate().map_err(config::ConfigError::Message)?;
        Ok(loaded)
    }

    /// Validate settings that span sections
    pub fn validate(&self) -> Result<(), String> {
        self.drainer.validate()?;

        if self.queue.backend == QueueBackend::Nats {
            self.queue.nats.validate(self.drainer.send_timeout_secs)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Serve `/health` and `/metrics`
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,

    /// Listen address of the health and metrics server
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
            metrics_addr: default_metrics_addr(),
        }
    }
}

fn default_log_level() -> String {
    "notification_relay=info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
