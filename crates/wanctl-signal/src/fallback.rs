//! ICMP failure fallback
//!
//! When ping fails outright, a secondary connectivity check separates
//! "ICMP blocked, link up" from "link down". Only the former consults the
//! configured mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use wanctl_common::{ConnectivityCheck, WanctlError, WanctlResult};

/// Behaviour while ICMP is failing on a live link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Last RTT on cycle 1, freeze up to `max_cycles`, then hard failure
    GracefulDegradation,
    /// Always freeze
    Freeze,
    /// Always substitute the last RTT
    UseLastRtt,
}

/// Fallback tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Disabled means every probe failure is a hard failure
    pub enabled: bool,
    /// Mode applied while the link is still up
    pub mode: FallbackMode,
    /// Failure cycles tolerated in graceful mode
    pub max_cycles: u32,
    /// Gateway to ping as a connectivity check
    pub gateway: Option<String>,
    /// `host:port` targets for TCP connectivity checks
    pub tcp_targets: Vec<String>,
    /// TCP connect timeout (ms)
    pub tcp_timeout_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: FallbackMode::GracefulDegradation,
            max_cycles: 3,
            gateway: None,
            tcp_targets: vec!["1.1.1.1:443".into(), "8.8.8.8:443".into()],
            tcp_timeout_ms: 1_000,
        }
    }
}

impl FallbackConfig {
    /// Check invariants
    pub fn validate(&self) -> WanctlResult<()> {
        if self.mode == FallbackMode::GracefulDegradation && self.max_cycles == 0 {
            return Err(WanctlError::Config(
                "fallback.max_cycles must be at least 1 in graceful_degradation mode".into(),
            ));
        }
        if self.enabled && self.gateway.is_none() && self.tcp_targets.is_empty() {
            return Err(WanctlError::Config(
                "fallback needs a gateway or tcp_targets for its connectivity check".into(),
            ));
        }
        Ok(())
    }
}

/// Why a cycle must not act
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardFailure {
    /// Connectivity check failed too
    ConnectivityLost,
    /// Graceful mode ran out of cycles
    CyclesExhausted(u32),
    /// Fallback disabled
    Disabled,
}

impl fmt::Display for HardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectivityLost => f.write_str("total connectivity loss"),
            Self::CyclesExhausted(n) => write!(f, "ICMP failing for {} cycles", n),
            Self::Disabled => f.write_str("ICMP failed and fallback is disabled"),
        }
    }
}

/// What the caller does with a failed probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallbackDecision {
    /// Continue the cycle with this RTT (ms)
    Substitute(f64),
    /// Skip rate/steering decisions this cycle
    Freeze,
    /// Link unusable this cycle
    HardFailure(HardFailure),
}

/// Failure-cycle tracker for one WAN
#[derive(Debug, Clone)]
pub struct IcmpFallback {
    config: FallbackConfig,
    failure_cycles: u32,
    last_rtt: Option<f64>,
}

impl IcmpFallback {
    /// Create tracker
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            failure_cycles: 0,
            last_rtt: None,
        }
    }

    /// Record a successful measurement
    pub fn record_success(&mut self, rtt_ms: f64) {
        if self.failure_cycles > 0 {
            tracing::info!(failed_cycles = self.failure_cycles, rtt_ms, "ICMP recovered");
        }
        self.failure_cycles = 0;
        self.last_rtt = Some(rtt_ms);
    }

    /// Decide after a failed measurement, given the connectivity check result
    pub fn on_failure(&mut self, link_up: bool) -> FallbackDecision {
        if !self.config.enabled {
            return FallbackDecision::HardFailure(HardFailure::Disabled);
        }
        if !link_up {
            tracing::error!(failed_cycles = self.failure_cycles, "ICMP and connectivity checks failed");
            return FallbackDecision::HardFailure(HardFailure::ConnectivityLost);
        }

        self.failure_cycles = self.failure_cycles.saturating_add(1);
        let cycles = self.failure_cycles;
        let last = self.last_rtt;

        let decision = match self.config.mode {
            FallbackMode::Freeze => FallbackDecision::Freeze,
            FallbackMode::UseLastRtt => last.map_or(FallbackDecision::Freeze, FallbackDecision::Substitute),
            FallbackMode::GracefulDegradation => {
                if cycles == 1 {
                    last.map_or(FallbackDecision::Freeze, FallbackDecision::Substitute)
                } else if cycles <= self.config.max_cycles {
                    FallbackDecision::Freeze
                } else {
                    FallbackDecision::HardFailure(HardFailure::CyclesExhausted(cycles))
                }
            }
        };

        if cycles == 1 {
            tracing::warn!(mode = ?self.config.mode, ?decision, "ICMP failed but link is up");
        } else {
            tracing::debug!(failed_cycles = cycles, ?decision, "ICMP still failing");
        }
        decision
    }

    /// Run the connectivity check and decide
    pub async fn resolve(&mut self, check: &dyn ConnectivityCheck) -> FallbackDecision {
        if !self.config.enabled {
            return FallbackDecision::HardFailure(HardFailure::Disabled);
        }
        let link_up = check.check().await;
        self.on_failure(link_up)
    }

    /// Consecutive failed cycles with the link up
    pub fn failure_cycles(&self) -> u32 {
        self.failure_cycles
    }

    /// Last successful RTT (ms)
    pub fn last_rtt(&self) -> Option<f64> {
        self.last_rtt
    }

    /// Seed the last RTT, e.g. from persisted load RTT
    pub fn set_last_rtt(&mut self, rtt_ms: f64) {
        self.last_rtt = Some(rtt_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn fallback(mode: FallbackMode) -> IcmpFallback {
        let mut f = IcmpFallback::new(FallbackConfig {
            mode,
            ..FallbackConfig::default()
        });
        f.record_success(24.0);
        f
    }

    #[test]
    fn test_graceful_progression() {
        let mut f = fallback(FallbackMode::GracefulDegradation);
        assert_eq!(f.on_failure(true), FallbackDecision::Substitute(24.0));
        assert_eq!(f.on_failure(true), FallbackDecision::Freeze);
        assert_eq!(f.on_failure(true), FallbackDecision::Freeze);
        assert_eq!(
            f.on_failure(true),
            FallbackDecision::HardFailure(HardFailure::CyclesExhausted(4))
        );
    }

    #[test]
    fn test_freeze_and_last_rtt_modes() {
        let mut freeze = fallback(FallbackMode::Freeze);
        for _ in 0..10 {
            assert_eq!(freeze.on_failure(true), FallbackDecision::Freeze);
        }

        let mut last = fallback(FallbackMode::UseLastRtt);
        for _ in 0..10 {
            assert_eq!(last.on_failure(true), FallbackDecision::Substitute(24.0));
        }
    }

    #[test]
    fn test_connectivity_loss_does_not_count() {
        let mut f = fallback(FallbackMode::GracefulDegradation);
        assert_eq!(
            f.on_failure(false),
            FallbackDecision::HardFailure(HardFailure::ConnectivityLost)
        );
        assert_eq!(f.failure_cycles(), 0);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut f = fallback(FallbackMode::GracefulDegradation);
        f.on_failure(true);
        f.on_failure(true);
        f.record_success(26.0);
        assert_eq!(f.failure_cycles(), 0);
        assert_eq!(f.on_failure(true), FallbackDecision::Substitute(26.0));
    }

    #[test]
    fn test_no_last_rtt_freezes() {
        let mut f = IcmpFallback::new(FallbackConfig {
            mode: FallbackMode::UseLastRtt,
            ..FallbackConfig::default()
        });
        assert_eq!(f.on_failure(true), FallbackDecision::Freeze);
    }

    struct Link(bool);

    #[async_trait]
    impl ConnectivityCheck for Link {
        async fn check(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_resolve_uses_connectivity_check() {
        let mut f = fallback(FallbackMode::GracefulDegradation);
        assert_eq!(
            tokio_test::block_on(f.resolve(&Link(true))),
            FallbackDecision::Substitute(24.0)
        );
        assert_eq!(
            tokio_test::block_on(f.resolve(&Link(false))),
            FallbackDecision::HardFailure(HardFailure::ConnectivityLost)
        );
    }

    #[test]
    fn test_disabled_is_always_hard_failure() {
        let mut f = IcmpFallback::new(FallbackConfig {
            enabled: false,
            ..FallbackConfig::default()
        });
        assert_eq!(f.on_failure(true), FallbackDecision::HardFailure(HardFailure::Disabled));
    }
}
