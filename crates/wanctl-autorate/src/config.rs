//! Autorate configuration

use crate::queue::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use wanctl_common::{RetryPolicy, WanctlError, WanctlResult};
use wanctl_signal::{validate_alpha, BaselineConfig, FallbackConfig};

/// Settings for one WAN's autorate controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutorateConfig {
    /// Hosts probed each cycle; the median of successful replies is used
    pub ping_hosts: Vec<String>,
    /// Echo requests per host
    pub ping_count: u32,
    /// Cycle interval (ms)
    pub interval_ms: u64,
    /// EWMA weight for the load RTT
    pub load_alpha: f64,
    pub baseline: BaselineConfig,
    pub download: QueueConfig,
    pub upload: QueueConfig,
    pub fallback: FallbackConfig,
    pub retry: RetryPolicy,
    /// State file shared with the steering daemon
    pub state_file: PathBuf,
}

impl Default for AutorateConfig {
    fn default() -> Self {
        Self {
            ping_hosts: vec!["1.1.1.1".into(), "8.8.8.8".into(), "9.9.9.9".into()],
            ping_count: 1,
            interval_ms: 5_000,
            load_alpha: 0.3,
            baseline: BaselineConfig::default(),
            download: QueueConfig::default(),
            upload: QueueConfig {
                ceiling_bps: 40_000_000,
                floor_green_bps: 35_000_000,
                floor_yellow_bps: 30_000_000,
                floor_soft_red_bps: 27_000_000,
                floor_red_bps: 25_000_000,
                step_up_bps: 1_000_000,
                ..QueueConfig::default()
            },
            fallback: FallbackConfig::default(),
            retry: RetryPolicy::default(),
            state_file: PathBuf::from("/var/lib/wanctl/wan1_state.json"),
        }
    }
}

impl AutorateConfig {
    pub fn validate(&self) -> WanctlResult<()> {
        if self.ping_hosts.is_empty() {
            return Err(WanctlError::Config("autorate.ping_hosts must not be empty".into()));
        }
        if self.interval_ms == 0 {
            return Err(WanctlError::Config("autorate.interval_ms must be positive".into()));
        }
        validate_alpha("autorate.load_alpha", self.load_alpha)?;
        self.baseline.validate()?;
        self.download.validate()?;
        self.upload.validate()?;
        self.fallback.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        AutorateConfig::default().validate().unwrap();
    }

    #[test]
    fn test_bad_alpha_rejected() {
        let config = AutorateConfig {
            load_alpha: 1.5,
            ..AutorateConfig::default()
        };
        assert!(matches!(config.validate(), Err(WanctlError::Config(_))));
    }
}
