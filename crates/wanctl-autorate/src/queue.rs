//! Per-direction bandwidth hysteresis
//!
//! Down-moves happen on the first bad sample. Up-moves need
//! `green_required` consecutive GREEN samples and then climb by a fixed step
//! each cycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use wanctl_common::{Direction, WanctlError, WanctlResult};

/// Queue zone derived from the RTT delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    #[default]
    Green,
    Yellow,
    SoftRed,
    Red,
}

impl Zone {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::SoftRed => "SOFT_RED",
            Self::Red => "RED",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delta thresholds in ms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueThresholds {
    pub target_ms: f64,
    pub warn_ms: f64,
    /// Only consulted by the 4-state controller
    pub hard_red_ms: f64,
}

impl Default for QueueThresholds {
    fn default() -> Self {
        Self {
            target_ms: 15.0,
            warn_ms: 45.0,
            hard_red_ms: 80.0,
        }
    }
}

impl QueueThresholds {
    /// `target < warn < hard_red`
    pub fn validate(&self) -> WanctlResult<()> {
        if self.target_ms > 0.0 && self.target_ms < self.warn_ms && self.warn_ms < self.hard_red_ms {
            return Ok(());
        }
        Err(WanctlError::Config(format!(
            "queue thresholds must satisfy 0 < target < warn < hard_red, got {} / {} / {}",
            self.target_ms, self.warn_ms, self.hard_red_ms
        )))
    }
}

/// Rate limits and step sizes for one direction, all rates in bits/sec
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub ceiling_bps: u64,
    pub floor_green_bps: u64,
    pub floor_yellow_bps: u64,
    pub floor_soft_red_bps: u64,
    pub floor_red_bps: u64,
    /// Added per cycle once GREEN is sustained
    pub step_up_bps: u64,
    /// Multiplier for RED and SOFT_RED
    pub factor_down: f64,
    /// Gentler multiplier for YELLOW
    pub factor_down_yellow: f64,
    /// Consecutive GREEN samples before stepping up
    pub green_required: u32,
    pub thresholds: QueueThresholds,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ceiling_bps: 900_000_000,
            floor_green_bps: 550_000_000,
            floor_yellow_bps: 350_000_000,
            floor_soft_red_bps: 275_000_000,
            floor_red_bps: 200_000_000,
            step_up_bps: 10_000_000,
            factor_down: 0.85,
            factor_down_yellow: 0.96,
            green_required: 5,
            thresholds: QueueThresholds::default(),
        }
    }
}

impl QueueConfig {
    /// Floors ordered, factors in `(0, 1]`, non-zero sample requirement
    pub fn validate(&self) -> WanctlResult<()> {
        let ordered = self.floor_red_bps <= self.floor_soft_red_bps
            && self.floor_soft_red_bps <= self.floor_yellow_bps
            && self.floor_yellow_bps <= self.floor_green_bps
            && self.floor_green_bps <= self.ceiling_bps;
        if !ordered {
            return Err(WanctlError::Config(format!(
                "floors must satisfy red <= soft_red <= yellow <= green <= ceiling, got {} / {} / {} / {} / {}",
                self.floor_red_bps,
                self.floor_soft_red_bps,
                self.floor_yellow_bps,
                self.floor_green_bps,
                self.ceiling_bps
            )));
        }
        for (name, factor) in [
            ("factor_down", self.factor_down),
            ("factor_down_yellow", self.factor_down_yellow),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(WanctlError::Config(format!(
                    "{} must be within (0, 1], got {}",
                    name, factor
                )));
            }
        }
        if self.green_required == 0 {
            return Err(WanctlError::Config("green_required must be at least 1".into()));
        }
        self.thresholds.validate()
    }
}

/// Persisted controller state
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueState {
    pub current_rate: u64,
    pub green_streak: u32,
    pub soft_red_streak: u32,
    pub red_streak: u32,
    pub zone: Zone,
}

/// Result of one adjustment: zone, new rate, reason when the zone changed
pub type Adjustment = (Zone, u64, Option<String>);

/// Hysteresis controller for one direction
#[derive(Debug, Clone)]
pub struct QueueController {
    direction: Direction,
    config: QueueConfig,
    current_rate: u64,
    green_streak: u32,
    soft_red_streak: u32,
    red_streak: u32,
    zone: Zone,
}

impl QueueController {
    /// Create a controller starting at the ceiling
    pub fn new(direction: Direction, config: QueueConfig) -> WanctlResult<Self> {
        config.validate()?;
        Ok(Self {
            direction,
            current_rate: config.ceiling_bps,
            config,
            green_streak: 0,
            soft_red_streak: 0,
            red_streak: 0,
            zone: Zone::Green,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn current_rate(&self) -> u64 {
        self.current_rate
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn green_streak(&self) -> u32 {
        self.green_streak
    }

    /// 3-state adjustment (GREEN / YELLOW / RED)
    pub fn adjust(&mut self, baseline_rtt: f64, load_rtt: f64) -> Adjustment {
        let delta = load_rtt - baseline_rtt;
        let t = self.config.thresholds;
        let (zone, reason) = if delta <= t.target_ms {
            (Zone::Green, format!("RTT delta {:.1}ms within target threshold {}ms", delta, t.target_ms))
        } else if delta <= t.warn_ms {
            (Zone::Yellow, format!("RTT delta {:.1}ms exceeded target threshold {}ms", delta, t.target_ms))
        } else {
            (Zone::Red, format!("RTT delta {:.1}ms exceeded warn threshold {}ms", delta, t.warn_ms))
        };
        self.apply(zone, reason)
    }

    /// 4-state adjustment (GREEN / YELLOW / SOFT_RED / RED)
    pub fn adjust_4state(&mut self, baseline_rtt: f64, load_rtt: f64) -> Adjustment {
        let delta = load_rtt - baseline_rtt;
        let t = self.config.thresholds;
        let (zone, reason) = if delta <= t.target_ms {
            (Zone::Green, format!("RTT delta {:.1}ms within target threshold {}ms", delta, t.target_ms))
        } else if delta <= t.warn_ms {
            (Zone::Yellow, format!("RTT delta {:.1}ms exceeded target threshold {}ms", delta, t.target_ms))
        } else if delta <= t.hard_red_ms {
            (Zone::SoftRed, format!("RTT delta {:.1}ms exceeded warn threshold {}ms", delta, t.warn_ms))
        } else {
            (Zone::Red, format!("RTT delta {:.1}ms exceeded hard_red threshold {}ms", delta, t.hard_red_ms))
        };
        self.apply(zone, reason)
    }

    fn apply(&mut self, zone: Zone, reason: String) -> Adjustment {
        let c = &self.config;
        self.green_streak = if zone == Zone::Green { self.green_streak.saturating_add(1) } else { 0 };
        self.soft_red_streak = if zone == Zone::SoftRed { self.soft_red_streak.saturating_add(1) } else { 0 };
        self.red_streak = if zone == Zone::Red { self.red_streak.saturating_add(1) } else { 0 };

        let rate = self.current_rate;
        self.current_rate = match zone {
            Zone::Red => scale(rate, c.factor_down).max(c.floor_red_bps),
            Zone::SoftRed => scale(rate, c.factor_down).max(c.floor_soft_red_bps),
            Zone::Yellow => scale(rate, c.factor_down_yellow).max(c.floor_yellow_bps),
            Zone::Green if self.green_streak >= c.green_required => rate
                .saturating_add(c.step_up_bps)
                .max(c.floor_green_bps)
                .min(c.ceiling_bps),
            Zone::Green => rate,
        };

        let changed = zone != self.zone;
        self.zone = zone;
        (zone, self.current_rate, changed.then_some(reason))
    }

    pub fn state(&self) -> QueueState {
        QueueState {
            current_rate: self.current_rate,
            green_streak: self.green_streak,
            soft_red_streak: self.soft_red_streak,
            red_streak: self.red_streak,
            zone: self.zone,
        }
    }

    /// Restore persisted state; the rate is clamped into the configured range
    pub fn restore(&mut self, state: &QueueState) {
        self.current_rate = if state.current_rate == 0 {
            self.config.ceiling_bps
        } else {
            state.current_rate.clamp(self.config.floor_red_bps, self.config.ceiling_bps)
        };
        self.green_streak = state.green_streak;
        self.soft_red_streak = state.soft_red_streak;
        self.red_streak = state.red_streak;
        self.zone = state.zone;
    }
}

#[inline]
fn scale(rate: u64, factor: f64) -> u64 {
    (rate as f64 * factor) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> QueueConfig {
        QueueConfig {
            ceiling_bps: 100_000_000,
            floor_green_bps: 60_000_000,
            floor_yellow_bps: 40_000_000,
            floor_soft_red_bps: 30_000_000,
            floor_red_bps: 20_000_000,
            step_up_bps: 5_000_000,
            factor_down: 0.5,
            factor_down_yellow: 0.9,
            green_required: 3,
            thresholds: QueueThresholds {
                target_ms: 15.0,
                warn_ms: 45.0,
                hard_red_ms: 80.0,
            },
        }
    }

    fn controller() -> QueueController {
        QueueController::new(Direction::Download, config()).unwrap()
    }

    #[test]
    fn test_red_reason_names_delta_and_warn_threshold() {
        let mut q = controller();
        let (zone, rate, reason) = q.adjust(22.0, 70.0);
        assert_eq!(zone, Zone::Red);
        assert_eq!(rate, 50_000_000);
        let reason = reason.unwrap();
        assert!(reason.contains("48.0ms"), "{}", reason);
        assert!(reason.contains("warn threshold 45ms"), "{}", reason);
    }

    #[test]
    fn test_four_state_zones() {
        let mut q = controller();
        assert_eq!(q.adjust_4state(20.0, 30.0).0, Zone::Green);
        assert_eq!(q.adjust_4state(20.0, 50.0).0, Zone::Yellow);
        assert_eq!(q.adjust_4state(20.0, 90.0).0, Zone::SoftRed);
        assert_eq!(q.adjust_4state(20.0, 101.0).0, Zone::Red);
        // Boundaries are inclusive on the lower zone
        assert_eq!(q.adjust_4state(20.0, 35.0).0, Zone::Green);
        assert_eq!(q.adjust_4state(20.0, 65.0).0, Zone::Yellow);
        assert_eq!(q.adjust_4state(20.0, 100.0).0, Zone::SoftRed);
    }

    #[test]
    fn test_down_moves_are_immediate_and_floored() {
        let mut q = controller();
        assert_eq!(q.adjust_4state(20.0, 90.0).1, 50_000_000);
        assert_eq!(q.adjust_4state(20.0, 90.0).1, 30_000_000);
        assert_eq!(q.adjust_4state(20.0, 200.0).1, 20_000_000);
        assert_eq!(q.adjust_4state(20.0, 200.0).1, 20_000_000);
    }

    #[test]
    fn test_yellow_is_gentler() {
        let mut q = controller();
        let (_, rate, _) = q.adjust(20.0, 40.0);
        assert_eq!(rate, 90_000_000);
    }

    #[test]
    fn test_single_green_after_red_does_not_raise_rate() {
        let mut q = controller();
        let (_, red_rate, _) = q.adjust(20.0, 100.0);
        let (zone, rate, reason) = q.adjust(20.0, 21.0);
        assert_eq!(zone, Zone::Green);
        assert_eq!(rate, red_rate);
        assert!(reason.is_some());
    }

    #[test]
    fn test_sustained_green_steps_up_to_ceiling() {
        let mut q = controller();
        q.adjust(20.0, 100.0);
        q.adjust(20.0, 100.0);
        assert_eq!(q.current_rate(), 25_000_000);

        q.adjust(20.0, 21.0);
        q.adjust(20.0, 21.0);
        assert_eq!(q.current_rate(), 25_000_000);
        // Third GREEN meets green_required; first step lands on the green floor
        assert_eq!(q.adjust(20.0, 21.0).1, 60_000_000);
        assert_eq!(q.adjust(20.0, 21.0).1, 65_000_000);

        for _ in 0..20 {
            q.adjust(20.0, 21.0);
        }
        assert_eq!(q.current_rate(), 100_000_000);
    }

    #[test]
    fn test_non_green_resets_green_streak() {
        let mut q = controller();
        q.adjust(20.0, 21.0);
        q.adjust(20.0, 21.0);
        assert_eq!(q.green_streak(), 2);
        q.adjust(20.0, 40.0);
        assert_eq!(q.green_streak(), 0);
    }

    #[test]
    fn test_reason_only_on_zone_change() {
        let mut q = controller();
        assert!(q.adjust(20.0, 100.0).2.is_some());
        assert!(q.adjust(20.0, 100.0).2.is_none());
    }

    #[test]
    fn test_floor_ordering_enforced() {
        let bad = QueueConfig {
            floor_yellow_bps: 70_000_000,
            ..config()
        };
        assert!(QueueController::new(Direction::Upload, bad).is_err());

        let above_ceiling = QueueConfig {
            floor_green_bps: 120_000_000,
            ..config()
        };
        assert!(above_ceiling.validate().is_err());

        let thresholds = QueueConfig {
            thresholds: QueueThresholds {
                target_ms: 50.0,
                warn_ms: 45.0,
                hard_red_ms: 80.0,
            },
            ..config()
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_restore_clamps_rate() {
        let mut q = controller();
        q.restore(&QueueState {
            current_rate: 5_000_000_000,
            green_streak: 2,
            soft_red_streak: 0,
            red_streak: 0,
            zone: Zone::Green,
        });
        assert_eq!(q.current_rate(), 100_000_000);
        assert_eq!(q.green_streak(), 2);
    }
}
