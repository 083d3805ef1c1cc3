//! Collaborator interfaces consumed by the controllers
//!
//! The decision engine only sees these traits; concrete implementations live
//! in [`crate::acl`] and [`crate::probe`].

use crate::WanctlResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// CAKE queue statistics for one read
///
/// `dropped`, `packets` and `bytes` are deltas since the previous read;
/// `queued_packets` and `queued_bytes` are instantaneous.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CakeStats {
    pub dropped: u64,
    pub queued_packets: u64,
    pub queued_bytes: u64,
    pub packets: u64,
    pub bytes: u64,
}

/// Active RTT measurement
#[async_trait]
pub trait RttSource: Send + Sync {
    /// Measure RTT to `host` in milliseconds using `count` probes
    async fn measure_rtt(&self, host: &str, count: u32) -> WanctlResult<f64>;
}

/// CAKE statistics reader
#[async_trait]
pub trait CakeStatsSource: Send + Sync {
    /// Read stats for `queue`
    async fn read_stats(&self, queue: &str) -> WanctlResult<CakeStats>;
}

/// Router-side effects
///
/// An `Err` means the change was not applied; callers must not advance state.
#[async_trait]
pub trait RouterControl: Send + Sync {
    /// Route latency-sensitive traffic to the alternate WAN
    async fn enable_steering(&self) -> WanctlResult<()>;

    /// Route latency-sensitive traffic back to the primary WAN
    async fn disable_steering(&self) -> WanctlResult<()>;

    /// Apply CAKE bandwidth limits in bits/sec
    async fn set_limits(&self, download_bps: u64, upload_bps: u64) -> WanctlResult<()>;
}

/// Secondary reachability check used when ICMP probing fails
#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    /// `true` when the link still carries traffic
    async fn check(&self) -> bool;
}
