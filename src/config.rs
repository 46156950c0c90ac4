//! Configuration for process control timings

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const ENV_STOP_TIMEOUT: &str = "PROCCTL_STOP_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL: &str = "PROCCTL_POLL_INTERVAL_MS";
pub const ENV_CPU_INTERVAL: &str = "PROCCTL_CPU_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How long `stop` waits after each signal before escalating (in milliseconds)
    pub stop_timeout_ms: u64,

    /// Polling period while waiting for a process to exit (in milliseconds)
    pub poll_interval_ms: u64,

    /// Default CPU sampling window used by the CLI (in milliseconds)
    pub cpu_sample_interval_ms: u64,

    /// How long a freshly launched process may take to show up in the process table (in milliseconds)
    pub launch_settle_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5_000,
            poll_interval_ms: 50,
            cpu_sample_interval_ms: 250,
            launch_settle_ms: 2_000,
        }
    }
}

impl ControllerConfig {
    /// Load defaults and apply `PROCCTL_*` environment overrides
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok());
        config
    }

    /// Apply overrides from any key/value source; invalid values are logged and ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets: [(&str, &mut u64); 3] = [
            (ENV_STOP_TIMEOUT, &mut self.stop_timeout_ms),
            (ENV_POLL_INTERVAL, &mut self.poll_interval_ms),
            (ENV_CPU_INTERVAL, &mut self.cpu_sample_interval_ms),
        ];

        for (key, slot) in targets {
            if let Some(value) = lookup(key) {
                match value.trim().parse::<u64>() {
                    Ok(parsed) => {
                        info!("{} override from environment: {}ms", key, parsed);
                        *slot = parsed;
                    }
                    Err(_) => warn!("Invalid {} value: {}", key, value),
                }
            }
        }

        if self.poll_interval_ms == 0 {
            warn!("Poll interval of 0ms would spin; using 1ms");
            self.poll_interval_ms = 1;
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cpu_sample_interval(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_interval_ms)
    }

    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_ms)
    }
}
