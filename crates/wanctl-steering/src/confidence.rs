//! Confidence-scored steering overlay
//!
//! A 0-100 score from weighted, normalized signals replaces the binary RED
//! trigger. Timers gate every action:
//!
//! - degrade sustain: score >= `act_threshold` for `degrade_sustain_secs`
//!   before steering turns on
//! - hold-down: steering stays on for at least `hold_down_secs`
//! - recovery sustain: score <= `recover_threshold` for
//!   `recovery_sustain_secs` before steering turns off
//! - flap brake: `flap_max_flips` flips within `flap_window_secs` pin the
//!   current state for `flap_hold_secs`
//!
//! Time is injected so the controller is deterministic under test.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use wanctl_common::{RouterControl, WanctlError, WanctlResult};
use wanctl_signal::{CongestionSignals, CongestionState};

/// Longest accepted timer (30 days)
pub const MAX_TIMER_SECS: u64 = 30 * 24 * 3600;

/// Signal weights; only their ratios matter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub rtt: f64,
    pub cake_red: f64,
    pub drops: f64,
    pub queue: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            rtt: 0.4,
            cake_red: 0.25,
            drops: 0.2,
            queue: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub enabled: bool,
    /// Log `WOULD_*` instead of touching the router
    pub dry_run: bool,
    pub weights: ConfidenceWeights,
    /// Smoothed RTT delta (ms) that maps to a full RTT signal
    pub rtt_delta_full_scale_ms: f64,
    /// Drops per cycle that map to a full drop signal
    pub drops_full_scale: f64,
    /// Smoothed queue depth that maps to a full queue signal
    pub queue_full_scale: f64,
    pub act_threshold: f64,
    pub recover_threshold: f64,
    pub degrade_sustain_secs: u64,
    pub hold_down_secs: u64,
    pub recovery_sustain_secs: u64,
    pub flap_window_secs: u64,
    pub flap_max_flips: u32,
    pub flap_hold_secs: u64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
            weights: ConfidenceWeights::default(),
            rtt_delta_full_scale_ms: 40.0,
            drops_full_scale: 20.0,
            queue_full_scale: 60.0,
            act_threshold: 55.0,
            recover_threshold: 20.0,
            degrade_sustain_secs: 4,
            hold_down_secs: 60,
            recovery_sustain_secs: 30,
            flap_window_secs: 600,
            flap_max_flips: 4,
            flap_hold_secs: 900,
        }
    }
}

impl ConfidenceConfig {
    pub fn validate(&self) -> WanctlResult<()> {
        let w = &self.weights;
        let weights = [w.rtt, w.cake_red, w.drops, w.queue];
        if weights.iter().any(|x| !(*x >= 0.0 && x.is_finite())) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(WanctlError::Config(
                "confidence weights must be non-negative with a positive sum".into(),
            ));
        }
        if !(0.0 <= self.recover_threshold
            && self.recover_threshold < self.act_threshold
            && self.act_threshold <= 100.0)
        {
            return Err(WanctlError::Config(format!(
                "confidence thresholds must satisfy 0 <= recover < act <= 100, got {} / {}",
                self.recover_threshold, self.act_threshold
            )));
        }
        for (name, scale) in [
            ("rtt_delta_full_scale_ms", self.rtt_delta_full_scale_ms),
            ("drops_full_scale", self.drops_full_scale),
            ("queue_full_scale", self.queue_full_scale),
        ] {
            if !(scale > 0.0) {
                return Err(WanctlError::Config(format!("confidence.{} must be positive", name)));
            }
        }
        for (name, secs) in [
            ("degrade_sustain_secs", self.degrade_sustain_secs),
            ("hold_down_secs", self.hold_down_secs),
            ("recovery_sustain_secs", self.recovery_sustain_secs),
            ("flap_window_secs", self.flap_window_secs),
            ("flap_hold_secs", self.flap_hold_secs),
        ] {
            if secs > MAX_TIMER_SECS {
                return Err(WanctlError::Config(format!(
                    "confidence.{} must be at most {} seconds, got {}",
                    name, MAX_TIMER_SECS, secs
                )));
            }
        }
        if self.flap_max_flips == 0 {
            return Err(WanctlError::Config("confidence.flap_max_flips must be at least 1".into()));
        }
        Ok(())
    }
}

/// Router action the overlay wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteeringAction {
    Enable,
    Disable,
}

/// Per-cycle output
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceDecision {
    pub score: f64,
    pub action: Option<SteeringAction>,
    pub brake_active: bool,
}

/// Timer state for health readers
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConfidenceSnapshot {
    pub score: f64,
    pub steering_on: bool,
    pub brake_active: bool,
    pub flips_in_window: usize,
}

#[inline]
fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Weighted confidence in `[0, 100]`
pub fn confidence_score(
    config: &ConfidenceConfig,
    signals: &CongestionSignals,
    assessment: CongestionState,
) -> f64 {
    let w = &config.weights;
    let inputs = [
        (w.rtt, unit(signals.rtt_delta_ewma / config.rtt_delta_full_scale_ms)),
        (w.cake_red, if assessment == CongestionState::Red { 1.0 } else { 0.0 }),
        (w.drops, unit(signals.cake_drops as f64 / config.drops_full_scale)),
        (w.queue, unit(signals.queue_ewma / config.queue_full_scale)),
    ];

    let total: f64 = inputs.iter().map(|(w, _)| w.max(0.0)).sum();
    if !(total > 0.0) || !total.is_finite() {
        return 0.0;
    }
    let weighted: f64 = inputs.iter().map(|(w, x)| w.max(0.0) * x).sum();
    unit(weighted / total) * 100.0
}

/// Confidence overlay for one primary WAN
#[derive(Debug, Clone)]
pub struct ConfidenceController {
    config: ConfidenceConfig,
    steering_on: bool,
    score: f64,
    above_since: Option<Instant>,
    below_since: Option<Instant>,
    enabled_at: Option<Instant>,
    flips: VecDeque<Instant>,
    brake_until: Option<Instant>,
}

impl ConfidenceController {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self {
            config,
            steering_on: false,
            score: 0.0,
            above_since: None,
            below_since: None,
            enabled_at: None,
            flips: VecDeque::new(),
            brake_until: None,
        }
    }

    /// Start from a known router state (e.g. after restart)
    pub fn with_steering(mut self, steering_on: bool, now: Instant) -> Self {
        self.steering_on = steering_on;
        self.enabled_at = steering_on.then_some(now);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub fn steering_on(&self) -> bool {
        self.steering_on
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    fn brake_active(&self, now: Instant) -> bool {
        self.brake_until.is_some_and(|until| now < until)
    }

    /// Score the cycle and decide whether the timers allow an action
    pub fn evaluate(
        &mut self,
        signals: &CongestionSignals,
        assessment: CongestionState,
        now: Instant,
    ) -> ConfidenceDecision {
        let score = confidence_score(&self.config, signals, assessment);
        self.score = score;

        if self.brake_active(now) {
            self.above_since = None;
            self.below_since = None;
            return ConfidenceDecision {
                score,
                action: None,
                brake_active: true,
            };
        }
        if self.brake_until.take().is_some() {
            tracing::info!("FLAP_BRAKE released");
        }

        let c = &self.config;
        let action = if !self.steering_on {
            self.below_since = None;
            if score >= c.act_threshold {
                let since = *self.above_since.get_or_insert(now);
                (now.duration_since(since) >= Duration::from_secs(c.degrade_sustain_secs))
                    .then_some(SteeringAction::Enable)
            } else {
                self.above_since = None;
                None
            }
        } else {
            self.above_since = None;
            let held = self
                .enabled_at
                .is_some_and(|at| now.duration_since(at) < Duration::from_secs(c.hold_down_secs));
            if score <= c.recover_threshold {
                let since = *self.below_since.get_or_insert(now);
                let sustained = now.duration_since(since) >= Duration::from_secs(c.recovery_sustain_secs);
                (sustained && !held).then_some(SteeringAction::Disable)
            } else {
                self.below_since = None;
                None
            }
        };

        ConfidenceDecision {
            score,
            action,
            brake_active: false,
        }
    }

    /// Record that `action` took effect (or would have, in dry-run)
    pub fn commit(&mut self, action: SteeringAction, now: Instant) {
        self.steering_on = action == SteeringAction::Enable;
        self.enabled_at = self.steering_on.then_some(now);
        self.above_since = None;
        self.below_since = None;
        self.record_flip(now);
    }

    fn record_flip(&mut self, now: Instant) {
        let window = Duration::from_secs(self.config.flap_window_secs);
        while self
            .flips
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            self.flips.pop_front();
        }
        self.flips.push_back(now);

        if self.flips.len() >= self.config.flap_max_flips as usize {
            let hold = Duration::from_secs(self.config.flap_hold_secs.min(MAX_TIMER_SECS));
            self.brake_until = now.checked_add(hold);
            tracing::warn!(
                flips = self.flips.len(),
                window_secs = self.config.flap_window_secs,
                hold_secs = self.config.flap_hold_secs,
                steering_on = self.steering_on,
                "FLAP_BRAKE engaged, holding current steering state"
            );
            self.flips.clear();
        }
    }

    /// Act on a decision. Dry-run only logs and tracks the shadow state.
    ///
    /// Returns `true` when the action took effect (or was simulated).
    pub async fn apply(
        &mut self,
        action: SteeringAction,
        router: &dyn RouterControl,
        now: Instant,
    ) -> bool {
        if self.config.dry_run {
            match action {
                SteeringAction::Enable => {
                    tracing::info!(score = self.score, "WOULD_ENABLE_STEERING")
                }
                SteeringAction::Disable => {
                    tracing::info!(score = self.score, "WOULD_DISABLE_STEERING")
                }
            }
            self.commit(action, now);
            return true;
        }

        let result = match action {
            SteeringAction::Enable => router.enable_steering().await,
            SteeringAction::Disable => router.disable_steering().await,
        };
        match result {
            Ok(()) => {
                self.commit(action, now);
                true
            }
            Err(e) => {
                tracing::error!(?action, error = %e, "confidence steering action failed, will retry");
                false
            }
        }
    }

    /// Manual override: clear timers and the flap brake
    pub fn reset(&mut self) {
        self.above_since = None;
        self.below_since = None;
        self.enabled_at = None;
        self.flips.clear();
        self.brake_until = None;
        tracing::info!("confidence timers reset");
    }

    pub fn snapshot(&self, now: Instant) -> ConfidenceSnapshot {
        ConfidenceSnapshot {
            score: self.score,
            steering_on: self.steering_on,
            brake_active: self.brake_active(now),
            flips_in_window: self.flips.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> ConfidenceConfig {
        ConfidenceConfig {
            enabled: true,
            dry_run: true,
            degrade_sustain_secs: 4,
            hold_down_secs: 30,
            recovery_sustain_secs: 10,
            flap_window_secs: 300,
            flap_max_flips: 3,
            flap_hold_secs: 600,
            ..ConfidenceConfig::default()
        }
    }

    fn congested() -> CongestionSignals {
        CongestionSignals {
            rtt_delta: 60.0,
            rtt_delta_ewma: 60.0,
            cake_drops: 40,
            queued_packets: 80,
            queue_ewma: 80.0,
            baseline_rtt: 25.0,
        }
    }

    fn quiet() -> CongestionSignals {
        CongestionSignals {
            baseline_rtt: 25.0,
            ..CongestionSignals::default()
        }
    }

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    #[test]
    fn test_score_extremes() {
        let c = config();
        assert_eq!(confidence_score(&c, &congested(), CongestionState::Red), 100.0);
        assert_eq!(confidence_score(&c, &quiet(), CongestionState::Green), 0.0);

        // RTT alone at half scale: 0.4 * 0.5 of the total weight
        let half = CongestionSignals {
            rtt_delta_ewma: 20.0,
            ..quiet()
        };
        assert!((confidence_score(&c, &half, CongestionState::Yellow) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_degrade_sustain_timer() {
        let t0 = Instant::now();
        let mut cc = ConfidenceController::new(config());
        assert_eq!(cc.evaluate(&congested(), CongestionState::Red, t0).action, None);
        assert_eq!(cc.evaluate(&congested(), CongestionState::Red, at(t0, 2)).action, None);
        assert_eq!(
            cc.evaluate(&congested(), CongestionState::Red, at(t0, 4)).action,
            Some(SteeringAction::Enable)
        );
    }

    #[test]
    fn test_dip_restarts_degrade_sustain() {
        let t0 = Instant::now();
        let mut cc = ConfidenceController::new(config());
        cc.evaluate(&congested(), CongestionState::Red, t0);
        cc.evaluate(&quiet(), CongestionState::Green, at(t0, 2));
        assert_eq!(cc.evaluate(&congested(), CongestionState::Red, at(t0, 4)).action, None);
        assert_eq!(
            cc.evaluate(&congested(), CongestionState::Red, at(t0, 8)).action,
            Some(SteeringAction::Enable)
        );
    }

    #[test]
    fn test_hold_down_blocks_early_disable() {
        let t0 = Instant::now();
        let mut cc = ConfidenceController::new(config());
        cc.commit(SteeringAction::Enable, t0);

        // Quiet from t0: recovery sustain met at 10s, hold-down until 30s
        for s in [0, 10, 20, 29] {
            assert_eq!(cc.evaluate(&quiet(), CongestionState::Green, at(t0, s)).action, None);
        }
        assert_eq!(
            cc.evaluate(&quiet(), CongestionState::Green, at(t0, 30)).action,
            Some(SteeringAction::Disable)
        );
    }

    #[test]
    fn test_recovery_sustain_timer() {
        let t0 = Instant::now();
        let mut cc = ConfidenceController::new(config());
        cc.commit(SteeringAction::Enable, t0);

        assert_eq!(cc.evaluate(&quiet(), CongestionState::Green, at(t0, 40)).action, None);
        assert_eq!(cc.evaluate(&quiet(), CongestionState::Green, at(t0, 45)).action, None);
        assert_eq!(
            cc.evaluate(&quiet(), CongestionState::Green, at(t0, 50)).action,
            Some(SteeringAction::Disable)
        );
    }

    #[test]
    fn test_flap_brake_pins_state() {
        let t0 = Instant::now();
        let mut cc = ConfidenceController::new(ConfidenceConfig {
            degrade_sustain_secs: 0,
            hold_down_secs: 0,
            recovery_sustain_secs: 0,
            ..config()
        });

        cc.commit(SteeringAction::Enable, at(t0, 0));
        cc.commit(SteeringAction::Disable, at(t0, 10));
        assert!(!cc.snapshot(at(t0, 10)).brake_active);
        cc.commit(SteeringAction::Enable, at(t0, 20));
        assert!(cc.snapshot(at(t0, 20)).brake_active);

        let d = cc.evaluate(&quiet(), CongestionState::Green, at(t0, 30));
        assert!(d.brake_active);
        assert_eq!(d.action, None);
        assert!(cc.steering_on());

        // After the hold expires decisions resume
        let d = cc.evaluate(&quiet(), CongestionState::Green, at(t0, 621));
        assert!(!d.brake_active);
        assert_eq!(d.action, Some(SteeringAction::Disable));
    }

    #[test]
    fn test_flips_outside_window_do_not_count() {
        let t0 = Instant::now();
        let mut cc = ConfidenceController::new(config());
        cc.commit(SteeringAction::Enable, at(t0, 0));
        cc.commit(SteeringAction::Disable, at(t0, 200));
        cc.commit(SteeringAction::Enable, at(t0, 400));
        assert!(!cc.snapshot(at(t0, 400)).brake_active);
        assert_eq!(cc.snapshot(at(t0, 400)).flips_in_window, 2);
    }

    #[test]
    fn test_reset_clears_brake() {
        let t0 = Instant::now();
        let mut cc = ConfidenceController::new(config());
        for (i, a) in [SteeringAction::Enable, SteeringAction::Disable, SteeringAction::Enable]
            .into_iter()
            .enumerate()
        {
            cc.commit(a, at(t0, i as u64));
        }
        assert!(cc.snapshot(at(t0, 5)).brake_active);
        cc.reset();
        assert!(!cc.snapshot(at(t0, 5)).brake_active);
    }

    #[test]
    fn test_validation() {
        assert!(ConfidenceConfig::default().validate().is_ok());
        let inverted = ConfidenceConfig {
            act_threshold: 20.0,
            recover_threshold: 50.0,
            ..ConfidenceConfig::default()
        };
        assert!(inverted.validate().is_err());
        let zero_weights = ConfidenceConfig {
            weights: ConfidenceWeights {
                rtt: 0.0,
                cake_red: 0.0,
                drops: 0.0,
                queue: 0.0,
            },
            ..ConfidenceConfig::default()
        };
        assert!(zero_weights.validate().is_err());
        let endless_hold = ConfidenceConfig {
            flap_hold_secs: u64::MAX,
            ..ConfidenceConfig::default()
        };
        assert!(endless_hold.validate().is_err());
        let month_window = ConfidenceConfig {
            flap_window_secs: MAX_TIMER_SECS,
            ..ConfidenceConfig::default()
        };
        assert!(month_window.validate().is_ok());
    }

    #[test]
    fn test_huge_flap_hold_does_not_overflow() {
        let t0 = Instant::now();
        let mut cc = ConfidenceController::new(ConfidenceConfig {
            flap_max_flips: 1,
            flap_hold_secs: u64::MAX,
            ..config()
        });
        cc.commit(SteeringAction::Enable, t0);
        let snap = cc.snapshot(at(t0, 3600));
        assert!(snap.brake_active);
        assert!(snap.steering_on);
        assert_eq!(
            cc.evaluate(&quiet(), CongestionState::Green, at(t0, 7200)).action,
            None
        );
    }

    fn any_f64() -> impl Strategy<Value = f64> {
        prop_oneof![
            any::<f64>(),
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            -1_000.0f64..1_000.0,
        ]
    }

    proptest! {
        #[test]
        fn prop_score_bounded(
            delta in any_f64(),
            ewma in any_f64(),
            queue in any_f64(),
            drops in any::<u64>(),
            red in any::<bool>(),
        ) {
            let signals = CongestionSignals {
                rtt_delta: delta,
                rtt_delta_ewma: ewma,
                cake_drops: drops,
                queued_packets: 0,
                queue_ewma: queue,
                baseline_rtt: 25.0,
            };
            let state = if red { CongestionState::Red } else { CongestionState::Green };
            let score = confidence_score(&config(), &signals, state);
            prop_assert!((0.0..=100.0).contains(&score));
        }
    }
}
