use serde::{Deserialize, Serialize};

/// Cron runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Start triggering jobs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long shutdown waits for a running job (seconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace() -> u64 {
    10
}
