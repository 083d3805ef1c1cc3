//! Baseline RTT tracking
//!
//! The baseline is the idle RTT of a link. It only moves while the link is
//! idle (`load_rtt - baseline < update_threshold`); under load it is frozen
//! so queueing delay never leaks into the reference point.

use crate::{ewma_update, validate_alpha};
use serde::{Deserialize, Serialize};
use wanctl_common::{WanctlError, WanctlResult};

/// Baseline tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// EWMA weight of a new idle sample
    pub alpha: f64,
    /// Load delta (ms) at or above which the baseline is frozen
    pub update_threshold_ms: f64,
    /// Lowest plausible baseline (ms)
    pub min_baseline_ms: f64,
    /// Highest plausible baseline (ms)
    pub max_baseline_ms: f64,
    /// Seed used before any state is restored
    pub initial_baseline_ms: Option<f64>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            alpha: 0.02,
            update_threshold_ms: 3.0,
            min_baseline_ms: 10.0,
            max_baseline_ms: 60.0,
            initial_baseline_ms: None,
        }
    }
}

impl BaselineConfig {
    /// Check invariants
    pub fn validate(&self) -> WanctlResult<()> {
        validate_alpha("baseline.alpha", self.alpha)?;
        if !(self.update_threshold_ms > 0.0) {
            return Err(WanctlError::Config(format!(
                "baseline.update_threshold_ms must be positive, got {}",
                self.update_threshold_ms
            )));
        }
        if !(self.min_baseline_ms > 0.0 && self.min_baseline_ms < self.max_baseline_ms) {
            return Err(WanctlError::Config(format!(
                "baseline bounds must satisfy 0 < min < max, got [{}, {}]",
                self.min_baseline_ms, self.max_baseline_ms
            )));
        }
        Ok(())
    }

    /// Validator using these bounds
    pub fn validator(&self) -> BaselineValidator {
        BaselineValidator::new(self.min_baseline_ms, self.max_baseline_ms)
    }
}

/// Bounds check for baselines from untrusted sources
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineValidator {
    min_ms: f64,
    max_ms: f64,
}

impl BaselineValidator {
    /// Create validator for `[min_ms, max_ms]`
    pub fn new(min_ms: f64, max_ms: f64) -> Self {
        Self { min_ms, max_ms }
    }

    /// `true` when `value` lies within the bounds. Out-of-range values are
    /// rejected, never clamped.
    pub fn validate(&self, value: f64) -> bool {
        if value.is_finite() && value >= self.min_ms && value <= self.max_ms {
            return true;
        }
        tracing::warn!(
            baseline_ms = value,
            min_ms = self.min_ms,
            max_ms = self.max_ms,
            "baseline RTT outside plausible bounds, ignoring"
        );
        false
    }

    /// Lower bound (ms)
    pub fn min_ms(&self) -> f64 {
        self.min_ms
    }

    /// Upper bound (ms)
    pub fn max_ms(&self) -> f64 {
        self.max_ms
    }
}

impl Default for BaselineValidator {
    fn default() -> Self {
        BaselineConfig::default().validator()
    }
}

/// Outcome of one baseline update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaselineUpdate {
    /// No baseline existed; seeded from the sample
    Initialized(f64),
    /// Link idle; baseline moved toward the sample
    Updated {
        /// Baseline before the update
        previous: f64,
        /// Baseline after the update
        current: f64,
    },
    /// Link loaded; baseline unchanged
    Frozen {
        /// `load_rtt - baseline` that triggered the freeze
        delta: f64,
    },
    /// Sample was not a usable RTT (negative or non-finite); baseline unchanged
    Rejected {
        /// Offending sample
        candidate: f64,
    },
}

/// Persisted form of the baseline
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineState {
    /// Baseline in ms, if established
    pub baseline_rtt: Option<f64>,
}

/// Idle-RTT tracker for one WAN
#[derive(Debug, Clone)]
pub struct BaselineRttManager {
    baseline: Option<f64>,
    alpha: f64,
    update_threshold: f64,
    validator: BaselineValidator,
}

impl BaselineRttManager {
    /// Create from config; an out-of-range initial baseline is dropped
    pub fn new(config: &BaselineConfig) -> Self {
        let validator = config.validator();
        let baseline = config.initial_baseline_ms.filter(|v| validator.validate(*v));
        Self {
            baseline,
            alpha: config.alpha,
            update_threshold: config.update_threshold_ms,
            validator,
        }
    }

    /// Current baseline, if established
    #[inline]
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Update the baseline from a measured RTT unless the link is loaded.
    ///
    /// Live samples are not bounds-checked; the validator only guards
    /// values restored from disk or set from outside.
    pub fn update_baseline_ewma(&mut self, measured_rtt: f64, load_rtt: f64) -> BaselineUpdate {
        if !(measured_rtt.is_finite() && measured_rtt >= 0.0) {
            return BaselineUpdate::Rejected { candidate: measured_rtt };
        }
        let Some(previous) = self.baseline else {
            self.baseline = Some(measured_rtt);
            tracing::info!(baseline_ms = measured_rtt, "baseline RTT initialized");
            return BaselineUpdate::Initialized(measured_rtt);
        };

        let delta = load_rtt - previous;
        if !(delta < self.update_threshold) {
            tracing::trace!(delta_ms = delta, baseline_ms = previous, "baseline frozen under load");
            return BaselineUpdate::Frozen { delta };
        }

        let current = ewma_update(previous, measured_rtt, self.alpha);
        self.baseline = Some(current);
        BaselineUpdate::Updated { previous, current }
    }

    /// `current_rtt - baseline`, or `0.0` without a baseline
    #[inline]
    pub fn get_delta(&self, current_rtt: f64) -> f64 {
        match self.baseline {
            Some(b) => current_rtt - b,
            None => 0.0,
        }
    }

    /// Explicit override; returns `false` when the value fails validation
    pub fn set_baseline(&mut self, value: f64) -> bool {
        if !self.validator.validate(value) {
            return false;
        }
        self.baseline = Some(value);
        true
    }

    /// Snapshot for persistence
    pub fn to_state(&self) -> BaselineState {
        BaselineState {
            baseline_rtt: self.baseline,
        }
    }

    /// Restore from persistence. `None` and out-of-range values keep the
    /// current baseline.
    pub fn restore(&mut self, state: &BaselineState) {
        if let Some(value) = state.baseline_rtt {
            if self.validator.validate(value) {
                self.baseline = Some(value);
            }
        }
    }

    /// Validator in use
    pub fn validator(&self) -> &BaselineValidator {
        &self.validator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manager(baseline: f64, alpha: f64) -> BaselineRttManager {
        BaselineRttManager::new(&BaselineConfig {
            alpha,
            initial_baseline_ms: Some(baseline),
            ..BaselineConfig::default()
        })
    }

    #[test]
    fn test_idle_update_moves_toward_sample() {
        let mut m = manager(50.0, 0.2);
        let update = m.update_baseline_ewma(48.0, 52.0);
        assert!(matches!(update, BaselineUpdate::Updated { .. }));
        assert!((m.baseline().unwrap() - 49.6).abs() < 1e-9);
    }

    #[test]
    fn test_loaded_link_freezes_baseline() {
        let mut m = manager(50.0, 0.2);
        let update = m.update_baseline_ewma(40.0, 100.0);
        assert_eq!(update, BaselineUpdate::Frozen { delta: 50.0 });
        assert_eq!(m.baseline(), Some(50.0));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut m = manager(25.0, 0.2);
        assert!(matches!(m.update_baseline_ewma(20.0, 28.0), BaselineUpdate::Frozen { .. }));
        assert_eq!(m.baseline(), Some(25.0));
    }

    #[test]
    fn test_first_sample_seeds_baseline() {
        let mut m = BaselineRttManager::new(&BaselineConfig::default());
        assert_eq!(m.get_delta(30.0), 0.0);
        assert_eq!(m.update_baseline_ewma(22.0, 22.0), BaselineUpdate::Initialized(22.0));
        assert_eq!(m.get_delta(30.0), 8.0);
    }

    #[test]
    fn test_out_of_bounds_rejected_not_clamped() {
        let mut m = BaselineRttManager::new(&BaselineConfig::default());
        assert!(!m.set_baseline(75.0));
        assert_eq!(m.baseline(), None);

        m.restore(&BaselineState { baseline_rtt: Some(5.0) });
        assert_eq!(m.baseline(), None);

        let v = BaselineValidator::default();
        assert!(v.validate(10.0));
        assert!(v.validate(60.0));
        assert!(!v.validate(60.01));
        assert!(!v.validate(f64::NAN));
    }

    #[test]
    fn test_fast_link_tracks_below_plausible_bounds() {
        let mut m = BaselineRttManager::new(&BaselineConfig {
            alpha: 0.5,
            ..BaselineConfig::default()
        });
        assert_eq!(m.update_baseline_ewma(8.0, 8.0), BaselineUpdate::Initialized(8.0));

        let mut m = manager(11.0, 0.5);
        assert_eq!(
            m.update_baseline_ewma(5.0, 11.0),
            BaselineUpdate::Updated { previous: 11.0, current: 8.0 }
        );
        assert_eq!(m.baseline(), Some(8.0));
        // Bounds still apply to persisted values
        assert!(!m.clone().set_baseline(8.0));
    }

    #[test]
    fn test_unusable_sample_rejected() {
        let mut m = manager(20.0, 0.5);
        assert!(matches!(
            m.update_baseline_ewma(f64::NAN, 20.0),
            BaselineUpdate::Rejected { .. }
        ));
        assert!(matches!(
            m.update_baseline_ewma(-1.0, 20.0),
            BaselineUpdate::Rejected { .. }
        ));
        assert_eq!(m.baseline(), Some(20.0));
    }

    #[test]
    fn test_state_round_trip() {
        let m = manager(31.5, 0.2);
        let mut restored = BaselineRttManager::new(&BaselineConfig::default());
        restored.restore(&m.to_state());
        assert_eq!(restored.baseline(), Some(31.5));

        // None in restored state keeps the prior value
        restored.restore(&BaselineState::default());
        assert_eq!(restored.baseline(), Some(31.5));
    }

    #[test]
    fn test_config_validation() {
        assert!(BaselineConfig::default().validate().is_ok());
        let bad = BaselineConfig {
            min_baseline_ms: 60.0,
            max_baseline_ms: 10.0,
            ..BaselineConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad_alpha = BaselineConfig {
            alpha: -0.1,
            ..BaselineConfig::default()
        };
        assert!(bad_alpha.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_idle_moves_strictly_toward_measured(
            baseline in 15.0f64..55.0,
            measured in 0.1f64..200.0,
            load_offset in -20.0f64..2.99,
            alpha in 0.01f64..0.99,
        ) {
            prop_assume!((measured - baseline).abs() > 1e-6);
            let mut m = manager(baseline, alpha);
            m.update_baseline_ewma(measured, baseline + load_offset);
            let after = m.baseline().unwrap();
            prop_assert!((after - measured).abs() < (baseline - measured).abs());
            prop_assert!((after - baseline).signum() == (measured - baseline).signum());
        }

        #[test]
        fn prop_loaded_leaves_baseline_exactly(
            baseline in 10.0f64..60.0,
            measured in 0.0f64..500.0,
            load_offset in 3.01f64..500.0,
            alpha in 0.0f64..=1.0,
        ) {
            let mut m = manager(baseline, alpha);
            m.update_baseline_ewma(measured, baseline + load_offset);
            prop_assert_eq!(m.baseline(), Some(baseline));
        }
    }
}
