//! CAKE read health
//!
//! Three strikes: warn on the first failure, error and enter degraded mode on
//! the third, debug after that. One success clears everything.

use wanctl_common::WanctlError;

/// Consecutive failures that enter degraded mode
pub const DEGRADED_AFTER: u32 = 3;

/// Level a failure was logged at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Debug,
    Warn,
    Error,
}

/// Failure tracker for the CAKE stats read path
#[derive(Debug, Clone, Default)]
pub struct CakeReadHealth {
    failures: u32,
    degraded: bool,
}

impl CakeReadHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume with a persisted failure count
    pub fn with_failures(failures: u32) -> Self {
        Self {
            failures,
            degraded: failures >= DEGRADED_AFTER,
        }
    }

    pub fn record_failure(&mut self, error: &WanctlError) -> LogSeverity {
        self.failures = self.failures.saturating_add(1);
        match self.failures {
            1 => {
                tracing::warn!(error = %error, "CAKE stats read failed");
                LogSeverity::Warn
            }
            DEGRADED_AFTER => {
                self.degraded = true;
                tracing::error!(
                    failures = self.failures,
                    error = %error,
                    "CAKE stats unavailable, entering degraded mode (RTT-only decisions)"
                );
                LogSeverity::Error
            }
            n => {
                tracing::debug!(failures = n, error = %error, "CAKE stats read failed");
                LogSeverity::Debug
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.degraded {
            tracing::info!(failures = self.failures, "CAKE stats recovered, leaving degraded mode");
        }
        self.failures = 0;
        self.degraded = false;
    }

    /// RTT-only mode
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
