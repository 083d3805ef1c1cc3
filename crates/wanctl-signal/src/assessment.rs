//! Multi-signal congestion classification
//!
//! Any single signal over its threshold escalates the state. Sample-count
//! confirmation belongs to the caller.

use crate::{validate_alpha, CongestionState};
use serde::{Deserialize, Serialize};
use wanctl_common::{WanctlError, WanctlResult};

/// One cycle's worth of congestion evidence
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CongestionSignals {
    /// Raw `rtt - baseline` (ms)
    pub rtt_delta: f64,
    /// Smoothed RTT delta (ms)
    pub rtt_delta_ewma: f64,
    /// CAKE drops since the previous read
    pub cake_drops: u64,
    /// Instantaneous queue depth (packets)
    pub queued_packets: u64,
    /// Smoothed queue depth (packets)
    pub queue_ewma: f64,
    /// Baseline the deltas were computed against (ms)
    pub baseline_rtt: f64,
}

/// Classifier thresholds and smoothing weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CongestionThresholds {
    /// Raw delta above this is at least YELLOW
    pub green_rtt_ms: f64,
    /// Smoothed delta above this is YELLOW
    pub yellow_rtt_ms: f64,
    /// Smoothed delta above this is RED
    pub red_rtt_ms: f64,
    /// Drops per cycle at or above this are RED; 0 disables
    pub min_drops_red: u64,
    /// Smoothed queue depth at or above this is YELLOW
    pub min_queue_yellow: f64,
    /// Smoothed queue depth at or above this is RED
    pub min_queue_red: f64,
    /// EWMA weight for the RTT delta
    pub rtt_ewma_alpha: f64,
    /// EWMA weight for queue depth
    pub queue_ewma_alpha: f64,
}

impl Default for CongestionThresholds {
    fn default() -> Self {
        Self {
            green_rtt_ms: 5.0,
            yellow_rtt_ms: 15.0,
            red_rtt_ms: 30.0,
            min_drops_red: 10,
            min_queue_yellow: 10.0,
            min_queue_red: 50.0,
            rtt_ewma_alpha: 0.3,
            queue_ewma_alpha: 0.4,
        }
    }
}

impl CongestionThresholds {
    /// Check ordering invariants
    pub fn validate(&self) -> WanctlResult<()> {
        if !(self.green_rtt_ms <= self.yellow_rtt_ms && self.yellow_rtt_ms < self.red_rtt_ms) {
            return Err(WanctlError::Config(format!(
                "congestion thresholds must satisfy green <= yellow < red, got {} / {} / {}",
                self.green_rtt_ms, self.yellow_rtt_ms, self.red_rtt_ms
            )));
        }
        if !(self.min_queue_yellow < self.min_queue_red) {
            return Err(WanctlError::Config(format!(
                "queue thresholds must satisfy yellow < red, got {} / {}",
                self.min_queue_yellow, self.min_queue_red
            )));
        }
        validate_alpha("rtt_ewma_alpha", self.rtt_ewma_alpha)?;
        validate_alpha("queue_ewma_alpha", self.queue_ewma_alpha)
    }
}

/// Classify one snapshot of signals
pub fn assess_congestion_state(
    signals: &CongestionSignals,
    thresholds: &CongestionThresholds,
) -> CongestionState {
    let drops_red = thresholds.min_drops_red > 0 && signals.cake_drops >= thresholds.min_drops_red;
    if signals.rtt_delta_ewma > thresholds.red_rtt_ms
        || drops_red
        || signals.queue_ewma >= thresholds.min_queue_red
    {
        return CongestionState::Red;
    }

    if signals.rtt_delta_ewma > thresholds.yellow_rtt_ms
        || signals.queue_ewma >= thresholds.min_queue_yellow
        || signals.rtt_delta > thresholds.green_rtt_ms
    {
        return CongestionState::Yellow;
    }

    CongestionState::Green
}
