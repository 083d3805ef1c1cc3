//! Latency signal processing
//!
//! Turns raw RTT samples and CAKE counters into the inputs the rate and
//! steering controllers act on.
//!
//! # Features
//!
//! - Baseline RTT EWMA that freezes while the link is loaded
//! - Bounds validation for baselines loaded from disk or another daemon
//! - Pure GREEN/YELLOW/RED classifier over RTT delta, drops and queue depth
//! - ICMP failure fallback policy

#![warn(missing_docs)]

pub mod assessment;
pub mod baseline;
pub mod fallback;

pub use assessment::{assess_congestion_state, CongestionSignals, CongestionThresholds};
pub use baseline::{BaselineConfig, BaselineRttManager, BaselineState, BaselineUpdate, BaselineValidator};
pub use fallback::{FallbackConfig, FallbackDecision, FallbackMode, HardFailure, IcmpFallback};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instantaneous congestion classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CongestionState {
    /// No congestion evidence
    Green,
    /// Early warning
    Yellow,
    /// Congested
    Red,
}

impl CongestionState {
    /// Upper-case label used in logs and persisted state
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        }
    }
}

impl fmt::Display for CongestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponentially weighted moving average step
///
/// `new = (1 - alpha) * old + alpha * sample`
#[inline]
pub fn ewma_update(old: f64, sample: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * old + alpha * sample
}

/// Reject alpha values outside `[0, 1]`
pub fn validate_alpha(name: &str, alpha: f64) -> wanctl_common::WanctlResult<()> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(wanctl_common::WanctlError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, alpha
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewma_weights() {
        assert_eq!(ewma_update(10.0, 20.0, 0.0), 10.0);
        assert_eq!(ewma_update(10.0, 20.0, 1.0), 20.0);
        assert!((ewma_update(50.0, 48.0, 0.2) - 49.6).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_validation() {
        assert!(validate_alpha("alpha", 0.3).is_ok());
        assert!(validate_alpha("alpha", 1.2).is_err());
        assert!(validate_alpha("alpha", f64::NAN).is_err());
    }
}
