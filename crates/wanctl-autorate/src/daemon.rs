//! Autorate daemon loop

use crate::controller::{AutorateSnapshot, CycleOutcome, WanController};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;
use wanctl_common::WanctlResult;

/// Drives a [`WanController`] on a fixed interval
pub struct AutorateDaemon {
    controller: WanController,
    interval: Duration,
    snapshot: Arc<ArcSwap<AutorateSnapshot>>,
}

impl AutorateDaemon {
    pub fn new(controller: WanController) -> Self {
        let interval = Duration::from_millis(controller.config().interval_ms);
        let snapshot = Arc::new(ArcSwap::from_pointee(AutorateSnapshot {
            wan: controller.wan().to_string(),
            baseline_rtt: controller.baseline(),
            load_rtt: controller.load_rtt(),
            download_zone: controller.download().zone(),
            download_bps: controller.download().current_rate(),
            upload_zone: controller.upload().zone(),
            upload_bps: controller.upload().current_rate(),
            last_outcome: "starting".into(),
            ..AutorateSnapshot::default()
        }));
        Self {
            controller,
            interval,
            snapshot,
        }
    }

    /// Handle for health readers; always holds a complete snapshot
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<AutorateSnapshot>> {
        self.snapshot.clone()
    }

    pub fn controller(&self) -> &WanController {
        &self.controller
    }

    /// One cycle inside the WAN span, then publish the snapshot
    pub async fn tick(&mut self) -> WanctlResult<CycleOutcome> {
        let span = tracing::info_span!("autorate", wan = %self.controller.wan());
        let outcome = self.controller.run_cycle().instrument(span).await?;
        self.snapshot
            .store(Arc::new(self.controller.snapshot(&outcome)));
        Ok(outcome)
    }

    /// Run until `shutdown` goes true. A cycle in flight always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WanctlResult<()> {
        tracing::info!(
            wan = %self.controller.wan(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting autorate daemon"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                tracing::error!(wan = %self.controller.wan(), error = %e, "autorate cycle failed");
            }
        }

        tracing::info!(wan = %self.controller.wan(), "autorate daemon stopped");
        Ok(())
    }
}
