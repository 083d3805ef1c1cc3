//! End-to-end autorate cycles against in-memory collaborators

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wanctl_autorate::{
    AutorateConfig, AutorateDaemon, AutorateDeps, CycleOutcome, QueueConfig, QueueThresholds,
    WanController, Zone,
};
use wanctl_common::{
    ConnectivityCheck, MemoryMetrics, RetryPolicy, RouterControl, RttSource, WanctlError,
    WanctlResult,
};
use wanctl_signal::{BaselineConfig, FallbackConfig, FallbackMode, HardFailure};

/// Pops one scripted RTT per call; `None` is a probe failure
struct ScriptedRtt {
    script: Mutex<VecDeque<Option<f64>>>,
}

impl ScriptedRtt {
    fn new(samples: &[Option<f64>]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(samples.iter().copied().collect()),
        })
    }
}

#[async_trait]
impl RttSource for ScriptedRtt {
    async fn measure_rtt(&self, host: &str, _count: u32) -> WanctlResult<f64> {
        match self.script.lock().pop_front().flatten() {
            Some(rtt) => Ok(rtt),
            None => Err(WanctlError::Probe {
                message: format!("no reply from {}", host),
                retryable: false,
            }),
        }
    }
}

#[derive(Default)]
struct RecordingRouter {
    limits: Mutex<Vec<(u64, u64)>>,
    fail_next: Mutex<u32>,
}

#[async_trait]
impl RouterControl for RecordingRouter {
    async fn enable_steering(&self) -> WanctlResult<()> {
        Ok(())
    }

    async fn disable_steering(&self) -> WanctlResult<()> {
        Ok(())
    }

    async fn set_limits(&self, download_bps: u64, upload_bps: u64) -> WanctlResult<()> {
        let mut fail = self.fail_next.lock();
        if *fail > 0 {
            *fail -= 1;
            return Err(WanctlError::Router("queue not found".into()));
        }
        self.limits.lock().push((download_bps, upload_bps));
        Ok(())
    }
}

struct Link(bool);

#[async_trait]
impl ConnectivityCheck for Link {
    async fn check(&self) -> bool {
        self.0
    }
}

fn config(state_file: &Path) -> AutorateConfig {
    let queue = QueueConfig {
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
    };
    AutorateConfig {
        ping_hosts: vec!["1.1.1.1".into()],
        ping_count: 1,
        interval_ms: 1_000,
        load_alpha: 1.0,
        baseline: BaselineConfig {
            alpha: 0.2,
            ..BaselineConfig::default()
        },
        download: queue,
        upload: queue,
        fallback: FallbackConfig {
            mode: FallbackMode::GracefulDegradation,
            max_cycles: 2,
            ..FallbackConfig::default()
        },
        retry: RetryPolicy::none(),
        state_file: state_file.to_path_buf(),
    }
}

struct Harness {
    router: Arc<RecordingRouter>,
    metrics: Arc<MemoryMetrics>,
    controller: WanController,
}

fn harness(state_file: &Path, samples: &[Option<f64>], link_up: bool) -> Harness {
    let router = Arc::new(RecordingRouter::default());
    let metrics = Arc::new(MemoryMetrics::new());
    let deps = AutorateDeps {
        rtt: ScriptedRtt::new(samples),
        router: router.clone(),
        connectivity: Arc::new(Link(link_up)),
        metrics: metrics.clone(),
    };
    let controller = WanController::new("wan1", config(state_file), deps).unwrap();
    Harness {
        router,
        metrics,
        controller,
    }
}

#[tokio::test]
async fn test_congestion_cuts_rate_and_freezes_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(&dir.path().join("state.json"), &[Some(20.0), Some(120.0)], true);

    let first = h.controller.run_cycle().await.unwrap();
    assert!(matches!(first, CycleOutcome::Adjusted { applied: true, download_bps: 100_000_000, .. }));
    assert_eq!(h.controller.baseline(), Some(20.0));

    h.controller.run_cycle().await.unwrap();
    assert_eq!(h.controller.baseline(), Some(20.0));
    assert_eq!(h.controller.download().zone(), Zone::Red);
    assert_eq!(h.controller.upload().zone(), Zone::Red);
    assert_eq!(
        h.router.limits.lock().clone(),
        vec![(100_000_000, 100_000_000), (50_000_000, 50_000_000)]
    );

    let transitions = h.metrics.transitions();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].wan, "wan1/download");
    assert_eq!(transitions[0].to, "RED");
    assert!(transitions[0].reason.contains("100.0ms"));
}

#[tokio::test]
async fn test_fast_link_below_baseline_bounds_is_still_shaped() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(
        &dir.path().join("state.json"),
        &[Some(8.0), Some(7.0), Some(150.0)],
        true,
    );

    h.controller.run_cycle().await.unwrap();
    assert_eq!(h.controller.baseline(), Some(8.0));
    h.controller.run_cycle().await.unwrap();
    assert!((h.controller.baseline().unwrap() - 7.8).abs() < 1e-9);

    h.controller.run_cycle().await.unwrap();
    assert!((h.controller.baseline().unwrap() - 7.8).abs() < 1e-9);
    assert_eq!(h.controller.download().zone(), Zone::Red);
    assert_eq!(h.controller.download().current_rate(), 50_000_000);
}

#[tokio::test]
async fn test_unchanged_limits_are_not_reapplied() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(&dir.path().join("state.json"), &[Some(20.0), Some(21.0)], true);

    h.controller.run_cycle().await.unwrap();
    let second = h.controller.run_cycle().await.unwrap();
    assert!(matches!(second, CycleOutcome::Adjusted { applied: false, .. }));
    assert_eq!(h.router.limits.lock().len(), 1);
}

#[tokio::test]
async fn test_failed_apply_is_retried_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(&dir.path().join("state.json"), &[Some(20.0), Some(21.0)], true);
    *h.router.fail_next.lock() = 1;

    let first = h.controller.run_cycle().await.unwrap();
    assert!(matches!(first, CycleOutcome::Adjusted { applied: false, .. }));

    let second = h.controller.run_cycle().await.unwrap();
    assert!(matches!(second, CycleOutcome::Adjusted { applied: true, .. }));
    assert_eq!(h.router.limits.lock().len(), 1);
}

#[tokio::test]
async fn test_icmp_failure_graceful_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(
        &dir.path().join("state.json"),
        &[Some(20.0), None, None, None, None, Some(22.0)],
        true,
    );

    h.controller.run_cycle().await.unwrap();
    assert!(matches!(
        h.controller.run_cycle().await.unwrap(),
        CycleOutcome::Adjusted { rtt_ms, .. } if rtt_ms == 20.0
    ));
    assert_eq!(h.controller.run_cycle().await.unwrap(), CycleOutcome::Frozen);
    assert_eq!(
        h.controller.run_cycle().await.unwrap(),
        CycleOutcome::HardFailure(HardFailure::CyclesExhausted(3))
    );
    h.controller.run_cycle().await.unwrap();
    assert!(matches!(
        h.controller.run_cycle().await.unwrap(),
        CycleOutcome::Adjusted { rtt_ms, .. } if rtt_ms == 22.0
    ));
    assert_eq!(h.metrics.last_value("wanctl_icmp_failure_cycles"), Some(0.0));
}

#[tokio::test]
async fn test_connectivity_loss_is_hard_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(&dir.path().join("state.json"), &[None], false);
    assert_eq!(
        h.controller.run_cycle().await.unwrap(),
        CycleOutcome::HardFailure(HardFailure::ConnectivityLost)
    );
    assert!(h.router.limits.lock().is_empty());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let mut h = harness(&path, &[Some(24.0), Some(130.0)], true);
        h.controller.run_cycle().await.unwrap();
        h.controller.run_cycle().await.unwrap();
    }

    let h = harness(&path, &[], true);
    assert_eq!(h.controller.baseline(), Some(24.0));
    assert_eq!(h.controller.load_rtt(), Some(130.0));
    assert_eq!(h.controller.download().current_rate(), 50_000_000);
    assert_eq!(h.controller.download().zone(), Zone::Red);
}

#[tokio::test]
async fn test_out_of_range_persisted_baseline_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, br#"{"version": 2, "ewma": {"baseline_rtt": 250.0, "load_rtt": 250.0}}"#).unwrap();

    let h = harness(&path, &[], true);
    assert_eq!(h.controller.baseline(), None);
}

#[tokio::test(start_paused = true)]
async fn test_daemon_publishes_snapshots_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let samples: Vec<Option<f64>> = vec![Some(20.0); 50];
    let h = harness(&dir.path().join("state.json"), &samples, true);

    let daemon = AutorateDaemon::new(h.controller);
    let snapshot = daemon.snapshot_handle();
    assert_eq!(snapshot.load().last_outcome, "starting");

    let (tx, rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(daemon.run(rx));

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    tx.send(true).unwrap();
    task.await.unwrap().unwrap();

    let snap = snapshot.load();
    assert_eq!(snap.wan, "wan1");
    assert_eq!(snap.baseline_rtt, Some(20.0));
    assert_eq!(snap.download_zone, Zone::Green);
    assert!(snap.updated_at.is_some());
    assert!(h.metrics.samples("wanctl_rtt_ms").len() >= 3);
}
