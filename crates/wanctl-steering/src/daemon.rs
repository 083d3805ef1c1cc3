//! Steering daemon loop

use crate::controller::{SteeringController, SteeringOutcome, SteeringSnapshot};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;
use wanctl_common::WanctlResult;

/// Drives a [`SteeringController`] on a fixed interval
pub struct SteeringDaemon {
    controller: SteeringController,
    interval: Duration,
    snapshot: Arc<ArcSwap<SteeringSnapshot>>,
    reset: Arc<Notify>,
}

impl SteeringDaemon {
    pub fn new(controller: SteeringController) -> Self {
        let interval = Duration::from_millis(controller.config().interval_ms);
        let snapshot = Arc::new(ArcSwap::from_pointee(SteeringSnapshot {
            primary: controller.primary().to_string(),
            state: controller.machine().state_label(),
            rtt_delta_ewma: controller.rtt_delta_ewma(),
            queue_ewma: controller.queue_ewma(),
            cake_degraded: controller.cake_health().is_degraded(),
            last_outcome: "starting".into(),
            ..SteeringSnapshot::default()
        }));
        Self {
            controller,
            interval,
            snapshot,
            reset: Arc::new(Notify::new()),
        }
    }

    pub fn snapshot_handle(&self) -> Arc<ArcSwap<SteeringSnapshot>> {
        self.snapshot.clone()
    }

    /// `notify_one` clears the confidence timers and flap brake before the
    /// next cycle
    pub fn reset_handle(&self) -> Arc<Notify> {
        self.reset.clone()
    }

    pub fn controller(&self) -> &SteeringController {
        &self.controller
    }

    pub async fn tick(&mut self) -> WanctlResult<SteeringOutcome> {
        let span = tracing::info_span!("steering", primary = %self.controller.primary());
        let now = Instant::now();
        let outcome = self.controller.run_cycle(now).instrument(span).await?;
        self.snapshot
            .store(Arc::new(self.controller.snapshot(&outcome, now)));
        Ok(outcome)
    }

    /// Run until `shutdown` goes true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WanctlResult<()> {
        tracing::info!(
            primary = %self.controller.primary(),
            interval_ms = self.interval.as_millis() as u64,
            dry_run = self.controller.confidence().is_some_and(|c| c.is_dry_run()),
            "Starting steering daemon"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let reset = self.reset.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = reset.notified() => {
                    tracing::info!(primary = %self.controller.primary(), "operator reset of confidence timers");
                    self.controller.reset_confidence();
                    continue;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                tracing::error!(primary = %self.controller.primary(), error = %e, "steering cycle failed");
            }
        }

        tracing::info!(primary = %self.controller.primary(), "steering daemon stopped");
        Ok(())
    }
}
