//! GOOD/DEGRADED steering state machine
//!
//! Entering DEGRADED takes `red_samples_required` consecutive RED
//! assessments; leaving it takes `green_samples_required` consecutive GREEN
//! ones. A transition only commits once the router accepted it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wanctl_common::{MetricsSink, RingBuffer, RouterControl};
use wanctl_signal::CongestionState;

/// Bound on every history the machine keeps
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SteeringState {
    /// Primary WAN carries everything
    #[default]
    Good,
    /// Latency-sensitive traffic steered to the alternate WAN
    Degraded,
}

impl SteeringState {
    /// `{PRIMARY}_GOOD` / `{PRIMARY}_DEGRADED`
    pub fn label(&self, primary: &str) -> String {
        match self {
            Self::Good => format!("{}_GOOD", primary.to_uppercase()),
            Self::Degraded => format!("{}_DEGRADED", primary.to_uppercase()),
        }
    }

    /// Inverse of [`SteeringState::label`]; unknown labels are `Good`
    pub fn from_label(label: &str) -> Self {
        if label.ends_with("_DEGRADED") {
            Self::Degraded
        } else {
            Self::Good
        }
    }
}

/// A confirmed transition waiting for the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransition {
    pub from: SteeringState,
    pub to: SteeringState,
    pub enable_steering: bool,
    pub reason: String,
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// Steering decision process for one primary WAN
#[derive(Debug, Clone)]
pub struct SteeringStateMachine {
    primary: String,
    state: SteeringState,
    bad_count: u32,
    good_count: u32,
    red_samples_required: u32,
    green_samples_required: u32,
    history_rtt: RingBuffer<f64>,
    history_delta: RingBuffer<f64>,
    transitions: RingBuffer<TransitionRecord>,
}

impl SteeringStateMachine {
    pub fn new(primary: &str, red_samples_required: u32, green_samples_required: u32) -> Self {
        Self {
            primary: primary.to_string(),
            state: SteeringState::Good,
            bad_count: 0,
            good_count: 0,
            red_samples_required: red_samples_required.max(1),
            green_samples_required: green_samples_required.max(1),
            history_rtt: RingBuffer::new(HISTORY_LIMIT),
            history_delta: RingBuffer::new(HISTORY_LIMIT),
            transitions: RingBuffer::new(HISTORY_LIMIT),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn state(&self) -> SteeringState {
        self.state
    }

    pub fn state_label(&self) -> String {
        self.state.label(&self.primary)
    }

    pub fn bad_count(&self) -> u32 {
        self.bad_count
    }

    pub fn good_count(&self) -> u32 {
        self.good_count
    }

    pub fn history_rtt(&self) -> &RingBuffer<f64> {
        &self.history_rtt
    }

    pub fn history_delta(&self) -> &RingBuffer<f64> {
        &self.history_delta
    }

    pub fn transitions(&self) -> &RingBuffer<TransitionRecord> {
        &self.transitions
    }

    /// Feed one assessment; returns a transition once the streak is met
    pub fn observe(
        &mut self,
        assessment: CongestionState,
        rtt_ms: f64,
        delta_ms: f64,
    ) -> Option<PendingTransition> {
        self.history_rtt.push(rtt_ms);
        self.history_delta.push(delta_ms);

        match self.state {
            SteeringState::Good => {
                self.good_count = 0;
                if assessment == CongestionState::Red {
                    self.bad_count = self.bad_count.saturating_add(1);
                } else {
                    self.bad_count = 0;
                }
                (self.bad_count >= self.red_samples_required).then(|| PendingTransition {
                    from: SteeringState::Good,
                    to: SteeringState::Degraded,
                    enable_steering: true,
                    reason: format!(
                        "{} consecutive RED samples (delta {:.1}ms)",
                        self.bad_count, delta_ms
                    ),
                })
            }
            SteeringState::Degraded => {
                self.bad_count = 0;
                if assessment == CongestionState::Green {
                    self.good_count = self.good_count.saturating_add(1);
                } else {
                    self.good_count = 0;
                }
                (self.good_count >= self.green_samples_required).then(|| PendingTransition {
                    from: SteeringState::Degraded,
                    to: SteeringState::Good,
                    enable_steering: false,
                    reason: format!(
                        "{} consecutive GREEN samples (delta {:.1}ms)",
                        self.good_count, delta_ms
                    ),
                })
            }
        }
    }

    /// Push the transition to the router and commit it on success.
    ///
    /// On failure state and counters are untouched, so the next cycle
    /// re-attempts the same transition.
    pub async fn execute_steering_transition(
        &mut self,
        transition: &PendingTransition,
        router: &dyn RouterControl,
        metrics: &dyn MetricsSink,
    ) -> bool {
        let result = if transition.enable_steering {
            router.enable_steering().await
        } else {
            router.disable_steering().await
        };

        let from = transition.from.label(&self.primary);
        let to = transition.to.label(&self.primary);
        if let Err(e) = result {
            tracing::error!(%from, %to, error = %e, "steering transition failed, will retry");
            return false;
        }

        self.commit(transition);
        tracing::warn!(%from, %to, reason = %transition.reason, "steering state changed");
        metrics.record_state_transition(&self.primary, &from, &to, &transition.reason);
        true
    }

    fn commit(&mut self, transition: &PendingTransition) {
        self.transitions.push(TransitionRecord {
            timestamp: Utc::now(),
            from: transition.from.label(&self.primary),
            to: transition.to.label(&self.primary),
            reason: transition.reason.clone(),
        });
        self.state = transition.to;
        self.bad_count = 0;
        self.good_count = 0;
    }

    /// Restore persisted fields
    pub fn restore(
        &mut self,
        state: SteeringState,
        bad_count: u32,
        good_count: u32,
        history_rtt: &[f64],
        history_delta: &[f64],
        transitions: &[TransitionRecord],
    ) {
        self.state = state;
        self.bad_count = bad_count;
        self.good_count = good_count;
        self.history_rtt = RingBuffer::from_iter_bounded(HISTORY_LIMIT, history_rtt.iter().copied());
        self.history_delta = RingBuffer::from_iter_bounded(HISTORY_LIMIT, history_delta.iter().copied());
        self.transitions = RingBuffer::from_iter_bounded(HISTORY_LIMIT, transitions.iter().cloned());
    }
}
