//! Steering configuration

use crate::confidence::ConfidenceConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use wanctl_common::{RetryPolicy, WanctlError, WanctlResult};
use wanctl_signal::{BaselineValidator, CongestionThresholds, FallbackConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    pub ping_hosts: Vec<String>,
    pub ping_count: u32,
    /// Cycle interval (ms)
    pub interval_ms: u64,
    /// Consecutive RED samples to steer away
    pub red_samples_required: u32,
    /// Consecutive GREEN samples to steer back
    pub green_samples_required: u32,
    pub thresholds: CongestionThresholds,
    /// Read CAKE stats from this queue; `None` means RTT-only
    pub cake_queue: Option<String>,
    /// Autorate state file holding `ewma.baseline_rtt`
    pub autorate_state_file: PathBuf,
    pub min_baseline_ms: f64,
    pub max_baseline_ms: f64,
    /// Baseline change (ms) worth an info log
    pub baseline_change_log_ms: f64,
    pub state_file: PathBuf,
    pub fallback: FallbackConfig,
    pub retry: RetryPolicy,
    pub confidence: ConfidenceConfig,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            ping_hosts: vec!["1.1.1.1".into()],
            ping_count: 3,
            interval_ms: 2_000,
            red_samples_required: 2,
            green_samples_required: 15,
            thresholds: CongestionThresholds::default(),
            cake_queue: Some("WAN-Download".into()),
            autorate_state_file: PathBuf::from("/var/lib/wanctl/wan1_state.json"),
            min_baseline_ms: 10.0,
            max_baseline_ms: 60.0,
            baseline_change_log_ms: 5.0,
            state_file: PathBuf::from("/var/lib/wanctl/steering_state.json"),
            fallback: FallbackConfig::default(),
            retry: RetryPolicy::default(),
            confidence: ConfidenceConfig::default(),
        }
    }
}

impl SteeringConfig {
    pub fn validate(&self) -> WanctlResult<()> {
        if self.ping_hosts.is_empty() {
            return Err(WanctlError::Config("steering.ping_hosts must not be empty".into()));
        }
        if self.interval_ms == 0 {
            return Err(WanctlError::Config("steering.interval_ms must be positive".into()));
        }
        if self.red_samples_required == 0 || self.green_samples_required == 0 {
            return Err(WanctlError::Config(
                "steering sample requirements must be at least 1".into(),
            ));
        }
        if !(self.min_baseline_ms > 0.0 && self.min_baseline_ms < self.max_baseline_ms) {
            return Err(WanctlError::Config(format!(
                "steering baseline bounds must satisfy 0 < min < max, got [{}, {}]",
                self.min_baseline_ms, self.max_baseline_ms
            )));
        }
        self.thresholds.validate()?;
        self.fallback.validate()?;
        self.confidence.validate()
    }

    pub fn validator(&self) -> BaselineValidator {
        BaselineValidator::new(self.min_baseline_ms, self.max_baseline_ms)
    }
}
