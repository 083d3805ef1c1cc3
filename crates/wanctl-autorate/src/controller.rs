//! One WAN's autorate control cycle
//!
//! measure RTT → load EWMA → baseline → download 4-state / upload 3-state →
//! apply limits if changed → persist if dirty → metrics

use crate::config::AutorateConfig;
use crate::queue::{QueueController, Zone};
use crate::state::{AutorateState, EwmaState, LastApplied};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use wanctl_common::probe::measure_hosts;
use wanctl_common::{
    ConnectivityCheck, Direction, MetricsSink, RouterControl, RttSource, StateFile, WanctlResult,
};
use wanctl_signal::{
    ewma_update, BaselineRttManager, BaselineState, FallbackDecision, HardFailure, IcmpFallback,
};

/// External collaborators of the autorate controller
#[derive(Clone)]
pub struct AutorateDeps {
    pub rtt: Arc<dyn RttSource>,
    pub router: Arc<dyn RouterControl>,
    pub connectivity: Arc<dyn ConnectivityCheck>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// What a cycle did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Rates evaluated; `applied` when new limits reached the router
    Adjusted {
        rtt_ms: f64,
        download_bps: u64,
        upload_bps: u64,
        applied: bool,
    },
    /// ICMP failing on a live link; nothing evaluated
    Frozen,
    /// Link unusable; nothing evaluated
    HardFailure(HardFailure),
}

/// Read-only view published after every cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutorateSnapshot {
    pub wan: String,
    pub baseline_rtt: Option<f64>,
    pub load_rtt: Option<f64>,
    pub download_zone: Zone,
    pub download_bps: u64,
    pub upload_zone: Zone,
    pub upload_bps: u64,
    pub icmp_failure_cycles: u32,
    pub last_outcome: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Autorate controller for one WAN
pub struct WanController {
    wan: String,
    config: AutorateConfig,
    deps: AutorateDeps,
    baseline: BaselineRttManager,
    load_rtt: Option<f64>,
    download: QueueController,
    upload: QueueController,
    fallback: IcmpFallback,
    last_applied: LastApplied,
    last_persisted: Option<AutorateState>,
    state_file: StateFile,
}

impl WanController {
    /// Build the controller and restore persisted state if present
    pub fn new(wan: &str, config: AutorateConfig, deps: AutorateDeps) -> WanctlResult<Self> {
        config.validate()?;
        let state_file = StateFile::new(&config.state_file);
        let mut controller = Self {
            wan: wan.to_string(),
            baseline: BaselineRttManager::new(&config.baseline),
            load_rtt: None,
            download: QueueController::new(Direction::Download, config.download)?,
            upload: QueueController::new(Direction::Upload, config.upload)?,
            fallback: IcmpFallback::new(config.fallback.clone()),
            last_applied: LastApplied::default(),
            last_persisted: None,
            state_file,
            config,
            deps,
        };

        if let Some(state) = controller.state_file.load::<AutorateState>() {
            controller.restore(&state);
        }
        Ok(controller)
    }

    fn restore(&mut self, state: &AutorateState) {
        self.baseline.restore(&BaselineState {
            baseline_rtt: state.ewma.baseline_rtt,
        });
        self.load_rtt = state.ewma.load_rtt.filter(|v| v.is_finite() && *v > 0.0);
        if let Some(load) = self.load_rtt {
            self.fallback.set_last_rtt(load);
        }
        self.download.restore(&state.download);
        self.upload.restore(&state.upload);
        self.last_applied = state.last_applied;
        self.last_persisted = Some(state.clone());
        tracing::info!(
            wan = %self.wan,
            baseline_ms = ?self.baseline.baseline(),
            download_bps = self.download.current_rate(),
            upload_bps = self.upload.current_rate(),
            "restored autorate state"
        );
    }

    pub fn wan(&self) -> &str {
        &self.wan
    }

    pub fn config(&self) -> &AutorateConfig {
        &self.config
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline.baseline()
    }

    pub fn load_rtt(&self) -> Option<f64> {
        self.load_rtt
    }

    pub fn download(&self) -> &QueueController {
        &self.download
    }

    pub fn upload(&self) -> &QueueController {
        &self.upload
    }

    /// Run one cycle. Errors here are unexpected; routine failures are
    /// reported through the outcome and logs.
    pub async fn run_cycle(&mut self) -> WanctlResult<CycleOutcome> {
        let measured = measure_hosts(
            self.deps.rtt.as_ref(),
            &self.config.ping_hosts,
            self.config.ping_count,
            &self.config.retry,
        )
        .await;

        let (rtt, fresh) = match measured {
            Ok(rtt) => {
                self.fallback.record_success(rtt);
                (rtt, true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "RTT measurement failed");
                match self.fallback.resolve(self.deps.connectivity.as_ref()).await {
                    FallbackDecision::Substitute(rtt) => (rtt, false),
                    FallbackDecision::Freeze => {
                        self.record_failure_metrics();
                        return Ok(CycleOutcome::Frozen);
                    }
                    FallbackDecision::HardFailure(reason) => {
                        tracing::error!(%reason, "skipping rate decision");
                        self.record_failure_metrics();
                        return Ok(CycleOutcome::HardFailure(reason));
                    }
                }
            }
        };

        let load_rtt = match self.load_rtt {
            Some(previous) => ewma_update(previous, rtt, self.config.load_alpha),
            None => rtt,
        };
        self.load_rtt = Some(load_rtt);

        // Substituted samples carry no new information about the idle RTT
        if fresh {
            self.baseline.update_baseline_ewma(rtt, load_rtt);
        }
        let baseline = self.baseline.baseline().unwrap_or(load_rtt);

        let dl_from = self.download.zone();
        let (dl_zone, dl_rate, dl_reason) = self.download.adjust_4state(baseline, load_rtt);
        let ul_from = self.upload.zone();
        let (ul_zone, ul_rate, ul_reason) = self.upload.adjust(baseline, load_rtt);

        if let Some(reason) = dl_reason {
            self.log_transition(Direction::Download, dl_from, dl_zone, &reason);
        }
        if let Some(reason) = ul_reason {
            self.log_transition(Direction::Upload, ul_from, ul_zone, &reason);
        }

        let applied = self.apply_limits(dl_rate, ul_rate).await;
        self.persist_if_dirty();
        self.record_metrics(rtt, load_rtt, baseline);

        Ok(CycleOutcome::Adjusted {
            rtt_ms: rtt,
            download_bps: dl_rate,
            upload_bps: ul_rate,
            applied,
        })
    }

    fn log_transition(&self, direction: Direction, from: Zone, to: Zone, reason: &str) {
        tracing::info!(%direction, from = %from, to = %to, reason, "queue zone changed");
        let wan = format!("{}/{}", self.wan, direction);
        self.deps
            .metrics
            .record_state_transition(&wan, from.as_str(), to.as_str(), reason);
    }

    /// Push limits when they differ from what the router last accepted
    async fn apply_limits(&mut self, dl_rate: u64, ul_rate: u64) -> bool {
        if self.last_applied.dl_rate == Some(dl_rate) && self.last_applied.ul_rate == Some(ul_rate) {
            return false;
        }
        match self.deps.router.set_limits(dl_rate, ul_rate).await {
            Ok(()) => {
                tracing::debug!(download_bps = dl_rate, upload_bps = ul_rate, "limits applied");
                self.last_applied = LastApplied {
                    dl_rate: Some(dl_rate),
                    ul_rate: Some(ul_rate),
                };
                true
            }
            Err(e) => {
                // last_applied unchanged so the next cycle retries
                tracing::error!(error = %e, download_bps = dl_rate, upload_bps = ul_rate, "failed to apply limits");
                false
            }
        }
    }

    fn current_state(&self) -> AutorateState {
        AutorateState {
            ewma: EwmaState {
                baseline_rtt: self.baseline.baseline(),
                load_rtt: self.load_rtt,
            },
            download: self.download.state(),
            upload: self.upload.state(),
            last_applied: self.last_applied,
            timestamp: None,
        }
    }

    fn persist_if_dirty(&mut self) {
        let mut state = self.current_state();
        if self
            .last_persisted
            .as_ref()
            .is_some_and(|saved| saved.same_content(&state))
        {
            return;
        }
        state.timestamp = Some(Utc::now());
        match self.state_file.save(&state) {
            Ok(true) => self.last_persisted = Some(state),
            // Lock busy; retried next cycle because the record is still dirty
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, path = %self.state_file.path().display(), "failed to save state"),
        }
    }

    fn record_metrics(&self, rtt: f64, load_rtt: f64, baseline: f64) {
        let m = &self.deps.metrics;
        let wan = [("wan", self.wan.as_str())];
        m.record_metric("wanctl_rtt_ms", rtt, &wan);
        m.record_metric("wanctl_load_rtt_ms", load_rtt, &wan);
        m.record_metric("wanctl_baseline_rtt_ms", baseline, &wan);
        m.record_metric("wanctl_rtt_delta_ms", load_rtt - baseline, &wan);
        for q in [&self.download, &self.upload] {
            let direction = q.direction().to_string();
            let labels = [("wan", self.wan.as_str()), ("direction", direction.as_str())];
            m.record_metric("wanctl_rate_bps", q.current_rate() as f64, &labels);
        }
        m.record_metric(
            "wanctl_icmp_failure_cycles",
            f64::from(self.fallback.failure_cycles()),
            &wan,
        );
    }

    fn record_failure_metrics(&self) {
        self.deps.metrics.record_metric(
            "wanctl_icmp_failure_cycles",
            f64::from(self.fallback.failure_cycles()),
            &[("wan", self.wan.as_str())],
        );
    }

    /// Immutable view for health readers
    pub fn snapshot(&self, outcome: &CycleOutcome) -> AutorateSnapshot {
        let last_outcome = match outcome {
            CycleOutcome::Adjusted { applied: true, .. } => "applied".to_string(),
            CycleOutcome::Adjusted { applied: false, .. } => "unchanged".to_string(),
            CycleOutcome::Frozen => "frozen".to_string(),
            CycleOutcome::HardFailure(reason) => format!("hard failure: {}", reason),
        };
        AutorateSnapshot {
            wan: self.wan.clone(),
            baseline_rtt: self.baseline.baseline(),
            load_rtt: self.load_rtt,
            download_zone: self.download.zone(),
            download_bps: self.download.current_rate(),
            upload_zone: self.upload.zone(),
            upload_bps: self.upload.current_rate(),
            icmp_failure_cycles: self.fallback.failure_cycles(),
            last_outcome,
            updated_at: Some(Utc::now()),
        }
    }
}
