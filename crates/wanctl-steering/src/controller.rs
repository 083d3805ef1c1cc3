//! One steering cycle
//!
//! reload baseline → measure RTT → delta + EWMA → CAKE read → assess →
//! state machine or confidence overlay → router → persist → metrics

use crate::cake_health::CakeReadHealth;
use crate::confidence::{ConfidenceController, ConfidenceSnapshot, SteeringAction};
use crate::config::SteeringConfig;
use crate::loader::BaselineRttLoader;
use crate::machine::{PendingTransition, SteeringState, SteeringStateMachine};
use crate::state::SteeringRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use wanctl_common::probe::measure_hosts;
use wanctl_common::{
    CakeStatsSource, ConnectivityCheck, MetricsSink, RouterControl, RttSource, StateFile,
    WanctlResult,
};
use wanctl_signal::{
    assess_congestion_state, ewma_update, CongestionSignals, CongestionState, FallbackDecision,
    HardFailure, IcmpFallback,
};

/// External collaborators of the steering controller
#[derive(Clone)]
pub struct SteeringDeps {
    pub rtt: Arc<dyn RttSource>,
    pub cake: Arc<dyn CakeStatsSource>,
    pub router: Arc<dyn RouterControl>,
    pub connectivity: Arc<dyn ConnectivityCheck>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// What a cycle did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SteeringOutcome {
    /// Autorate has not published a usable baseline yet
    NoBaseline,
    /// ICMP failing on a live link; no decision
    Frozen,
    /// Link unusable; no decision
    HardFailure(HardFailure),
    Evaluated {
        assessment: CongestionState,
        state: SteeringState,
        transitioned: bool,
    },
}

/// Read-only view published after every cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct SteeringSnapshot {
    pub primary: String,
    pub state: String,
    pub assessment: Option<CongestionState>,
    pub rtt_ms: Option<f64>,
    pub baseline_rtt: Option<f64>,
    pub rtt_delta_ewma: f64,
    pub queue_ewma: f64,
    pub bad_count: u32,
    pub good_count: u32,
    pub cake_degraded: bool,
    pub confidence: Option<ConfidenceSnapshot>,
    pub last_outcome: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Steering controller for one primary WAN
pub struct SteeringController {
    primary: String,
    config: SteeringConfig,
    deps: SteeringDeps,
    loader: BaselineRttLoader,
    baseline: Option<f64>,
    machine: SteeringStateMachine,
    confidence: Option<ConfidenceController>,
    cake_health: CakeReadHealth,
    fallback: IcmpFallback,
    rtt_delta_ewma: f64,
    queue_ewma: f64,
    last_rtt: Option<f64>,
    last_assessment: Option<CongestionState>,
    state_file: StateFile,
}

impl SteeringController {
    pub fn new(primary: &str, config: SteeringConfig, deps: SteeringDeps) -> WanctlResult<Self> {
        config.validate()?;
        let mut controller = Self {
            primary: primary.to_string(),
            loader: BaselineRttLoader::new(
                &config.autorate_state_file,
                config.validator(),
                config.baseline_change_log_ms,
            ),
            baseline: None,
            machine: SteeringStateMachine::new(
                primary,
                config.red_samples_required,
                config.green_samples_required,
            ),
            confidence: None,
            cake_health: CakeReadHealth::new(),
            fallback: IcmpFallback::new(config.fallback.clone()),
            rtt_delta_ewma: 0.0,
            queue_ewma: 0.0,
            last_rtt: None,
            last_assessment: None,
            state_file: StateFile::new(&config.state_file),
            config,
            deps,
        };

        if let Some(record) = controller.state_file.load::<SteeringRecord>() {
            controller.restore(&record);
        }
        if controller.config.confidence.enabled {
            let steering_on = controller.machine.state() == SteeringState::Degraded;
            controller.confidence = Some(
                ConfidenceController::new(controller.config.confidence.clone())
                    .with_steering(steering_on, Instant::now()),
            );
        }
        Ok(controller)
    }

    fn restore(&mut self, record: &SteeringRecord) {
        self.machine.restore(
            SteeringState::from_label(&record.current_state),
            record.bad_count,
            record.good_count,
            &record.history_rtt,
            &record.history_delta,
            &record.transitions,
        );
        self.baseline = record
            .baseline_rtt
            .filter(|b| self.config.validator().validate(*b));
        self.cake_health = CakeReadHealth::with_failures(record.cake_read_failures);
        self.rtt_delta_ewma = finite_or_zero(record.rtt_delta_ewma);
        self.queue_ewma = finite_or_zero(record.queue_ewma);
        tracing::info!(
            primary = %self.primary,
            state = %self.machine.state_label(),
            "restored steering state"
        );
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn config(&self) -> &SteeringConfig {
        &self.config
    }

    pub fn machine(&self) -> &SteeringStateMachine {
        &self.machine
    }

    pub fn confidence(&self) -> Option<&ConfidenceController> {
        self.confidence.as_ref()
    }

    pub fn cake_health(&self) -> &CakeReadHealth {
        &self.cake_health
    }

    pub fn rtt_delta_ewma(&self) -> f64 {
        self.rtt_delta_ewma
    }

    pub fn queue_ewma(&self) -> f64 {
        self.queue_ewma
    }

    /// Manual override of the confidence timers
    pub fn reset_confidence(&mut self) {
        if let Some(conf) = self.confidence.as_mut() {
            conf.reset();
        }
    }

    pub async fn run_cycle(&mut self, now: Instant) -> WanctlResult<SteeringOutcome> {
        if let Some(loaded) = self.loader.load() {
            self.baseline = Some(loaded);
        }
        let Some(baseline) = self.baseline else {
            tracing::warn!(
                path = %self.config.autorate_state_file.display(),
                "no valid baseline RTT from autorate yet"
            );
            return Ok(SteeringOutcome::NoBaseline);
        };

        let rtt = match measure_hosts(
            self.deps.rtt.as_ref(),
            &self.config.ping_hosts,
            self.config.ping_count,
            &self.config.retry,
        )
        .await
        {
            Ok(rtt) => {
                self.fallback.record_success(rtt);
                rtt
            }
            Err(e) => {
                tracing::warn!(error = %e, "RTT measurement failed");
                match self.fallback.resolve(self.deps.connectivity.as_ref()).await {
                    FallbackDecision::Substitute(rtt) => rtt,
                    FallbackDecision::Freeze => return Ok(SteeringOutcome::Frozen),
                    FallbackDecision::HardFailure(reason) => {
                        tracing::error!(%reason, "skipping steering decision");
                        return Ok(SteeringOutcome::HardFailure(reason));
                    }
                }
            }
        };
        self.last_rtt = Some(rtt);

        let delta = rtt - baseline;
        let t = self.config.thresholds;
        self.rtt_delta_ewma = ewma_update(self.rtt_delta_ewma, delta, t.rtt_ewma_alpha);

        let (cake_drops, queued_packets, cake_ok) = self.read_cake().await;
        if cake_ok {
            self.queue_ewma = ewma_update(self.queue_ewma, queued_packets as f64, t.queue_ewma_alpha);
        }

        let signals = CongestionSignals {
            rtt_delta: delta,
            rtt_delta_ewma: self.rtt_delta_ewma,
            cake_drops,
            queued_packets,
            // RTT-only while CAKE reads fail
            queue_ewma: if cake_ok { self.queue_ewma } else { 0.0 },
            baseline_rtt: baseline,
        };
        let assessment = assess_congestion_state(&signals, &t);
        self.last_assessment = Some(assessment);
        tracing::debug!(
            rtt_ms = rtt,
            delta_ms = delta,
            delta_ewma_ms = self.rtt_delta_ewma,
            queue_ewma = self.queue_ewma,
            drops = cake_drops,
            %assessment,
            "steering sample"
        );

        let pending = self.machine.observe(assessment, rtt, delta);
        let transitioned = self.decide(pending, &signals, assessment, now).await;

        self.persist();
        self.record_metrics(assessment);

        Ok(SteeringOutcome::Evaluated {
            assessment,
            state: self.machine.state(),
            transitioned,
        })
    }

    /// Returns (drops, queued packets, read succeeded).
    ///
    /// A single read per cycle; transport retries belong to the adapter.
    async fn read_cake(&mut self) -> (u64, u64, bool) {
        let Some(queue) = self.config.cake_queue.as_deref() else {
            return (0, 0, false);
        };
        match self.deps.cake.read_stats(queue).await {
            Ok(stats) => {
                self.cake_health.record_success();
                (stats.dropped, stats.queued_packets, true)
            }
            Err(e) => {
                self.cake_health.record_failure(&e);
                (0, 0, false)
            }
        }
    }

    async fn decide(
        &mut self,
        pending: Option<PendingTransition>,
        signals: &CongestionSignals,
        assessment: CongestionState,
        now: Instant,
    ) -> bool {
        let router = self.deps.router.as_ref();
        let metrics = self.deps.metrics.as_ref();

        let live_confidence = match self.confidence.as_mut() {
            Some(conf) => {
                let decision = conf.evaluate(signals, assessment, now);
                match decision.action {
                    Some(action) if conf.is_dry_run() => {
                        conf.apply(action, router, now).await;
                    }
                    Some(action) => {
                        let to = match action {
                            SteeringAction::Enable => SteeringState::Degraded,
                            SteeringAction::Disable => SteeringState::Good,
                        };
                        let from = self.machine.state();
                        if from == to {
                            conf.commit(action, now);
                        } else {
                            let transition = PendingTransition {
                                from,
                                to,
                                enable_steering: action == SteeringAction::Enable,
                                reason: format!("confidence {:.0}", decision.score),
                            };
                            if self
                                .machine
                                .execute_steering_transition(&transition, router, metrics)
                                .await
                            {
                                conf.commit(action, now);
                                return true;
                            }
                        }
                    }
                    None => {}
                }
                !conf.is_dry_run()
            }
            None => false,
        };

        if live_confidence {
            return false;
        }
        match pending {
            Some(transition) => {
                self.machine
                    .execute_steering_transition(&transition, router, metrics)
                    .await
            }
            None => false,
        }
    }

    fn record(&self) -> SteeringRecord {
        SteeringRecord {
            current_state: self.machine.state_label(),
            bad_count: self.machine.bad_count(),
            good_count: self.machine.good_count(),
            baseline_rtt: self.baseline,
            history_rtt: self.machine.history_rtt().to_vec(),
            history_delta: self.machine.history_delta().to_vec(),
            transitions: self.machine.transitions().to_vec(),
            cake_read_failures: self.cake_health.failures(),
            rtt_delta_ewma: self.rtt_delta_ewma,
            queue_ewma: self.queue_ewma,
            timestamp: Some(Utc::now()),
        }
    }

    fn persist(&self) {
        match self.state_file.save(&self.record()) {
            Ok(_) => {}
            Err(e) => tracing::warn!(
                error = %e,
                path = %self.state_file.path().display(),
                "failed to save steering state"
            ),
        }
    }

    fn record_metrics(&self, assessment: CongestionState) {
        let m = &self.deps.metrics;
        let labels = [("wan", self.primary.as_str())];
        let steering = f64::from(u8::from(self.machine.state() == SteeringState::Degraded));
        m.record_metric("wanctl_steering_enabled", steering, &labels);
        m.record_metric("wanctl_rtt_delta_ewma_ms", self.rtt_delta_ewma, &labels);
        m.record_metric("wanctl_queue_ewma_packets", self.queue_ewma, &labels);
        m.record_metric(
            "wanctl_congestion_state",
            match assessment {
                CongestionState::Green => 0.0,
                CongestionState::Yellow => 1.0,
                CongestionState::Red => 2.0,
            },
            &labels,
        );
        m.record_metric(
            "wanctl_cake_degraded",
            f64::from(u8::from(self.cake_health.is_degraded())),
            &labels,
        );
        if let Some(conf) = &self.confidence {
            m.record_metric("wanctl_confidence_score", conf.score(), &labels);
        }
    }

    pub fn snapshot(&self, outcome: &SteeringOutcome, now: Instant) -> SteeringSnapshot {
        let last_outcome = match outcome {
            SteeringOutcome::NoBaseline => "no baseline".to_string(),
            SteeringOutcome::Frozen => "frozen".to_string(),
            SteeringOutcome::HardFailure(reason) => format!("hard failure: {}", reason),
            SteeringOutcome::Evaluated { transitioned: true, .. } => "transitioned".to_string(),
            SteeringOutcome::Evaluated { .. } => "evaluated".to_string(),
        };
        SteeringSnapshot {
            primary: self.primary.clone(),
            state: self.machine.state_label(),
            assessment: self.last_assessment,
            rtt_ms: self.last_rtt,
            baseline_rtt: self.baseline,
            rtt_delta_ewma: self.rtt_delta_ewma,
            queue_ewma: self.queue_ewma,
            bad_count: self.machine.bad_count(),
            good_count: self.machine.good_count(),
            cake_degraded: self.cake_health.is_degraded(),
            confidence: self.confidence.as_ref().map(|c| c.snapshot(now)),
            last_outcome,
            updated_at: Some(Utc::now()),
        }
    }
}

#[inline]
fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}
