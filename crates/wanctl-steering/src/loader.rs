//! Baseline hand-off from the autorate daemon
//!
//! Steering never measures its own baseline; it reads `ewma.baseline_rtt`
//! from the autorate state file each cycle.

use std::path::PathBuf;
use wanctl_common::StateFile;
use wanctl_signal::BaselineValidator;

/// Reads and validates the autorate baseline
#[derive(Debug, Clone)]
pub struct BaselineRttLoader {
    source: StateFile,
    validator: BaselineValidator,
    change_threshold_ms: f64,
    last_loaded: Option<f64>,
}

impl BaselineRttLoader {
    pub fn new(path: impl Into<PathBuf>, validator: BaselineValidator, change_threshold_ms: f64) -> Self {
        Self {
            source: StateFile::new(path),
            validator,
            change_threshold_ms,
            last_loaded: None,
        }
    }

    /// Last value that passed validation
    pub fn last_loaded(&self) -> Option<f64> {
        self.last_loaded
    }

    /// Read the current baseline; `None` when missing or out of bounds
    pub fn load(&mut self) -> Option<f64> {
        let value = self.source.peek_value()?;
        let baseline = value.pointer("/ewma/baseline_rtt").and_then(|v| v.as_f64())?;
        if !self.validator.validate(baseline) {
            return None;
        }

        match self.last_loaded {
            Some(previous) if (baseline - previous).abs() > self.change_threshold_ms => {
                tracing::info!(
                    previous_ms = previous,
                    baseline_ms = baseline,
                    "baseline RTT changed significantly"
                );
            }
            None => tracing::info!(baseline_ms = baseline, "baseline RTT loaded"),
            _ => {}
        }
        self.last_loaded = Some(baseline);
        Some(baseline)
    }
}
