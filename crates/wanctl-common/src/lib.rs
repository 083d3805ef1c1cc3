//! wanctl Common - shared plumbing for the autorate and steering daemons
//!
//! This crate provides:
//! - Error taxonomy with a retryable/non-retryable split
//! - Injected metrics sinks (no process-wide registry)
//! - Retry policy with exponential backoff and jitter
//! - Fixed-capacity ring buffer for bounded histories
//! - Atomic, lock-protected state files with schema migration
//! - Narrow collaborator traits (RTT, CAKE stats, router control)
//! - RouterOS adapter, transports and probes implementing those traits
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                  autorate / steering daemons                  │
//! └───────┬──────────────┬───────────────┬───────────────┬────────┘
//!         │ RttSource    │ CakeStats     │ RouterControl │ StateFile
//! ┌───────▼──────┐ ┌─────▼───────────────▼──────┐ ┌──────▼────────┐
//! │ PingRttSource│ │     acl::RouterOs          │ │ flock + rename│
//! └──────────────┘ └─────────────┬──────────────┘ └───────────────┘
//!                  ┌─────────────▼──────────────┐
//!                  │ FailoverTransport ssh↔rest │
//!                  └────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acl;
pub mod error;
pub mod history;
pub mod metrics;
pub mod probe;
pub mod retry;
pub mod router;
pub mod state;
pub mod transport;

pub use error::*;
pub use history::RingBuffer;
pub use metrics::{MemoryMetrics, MetricsSink, NoopMetrics, RecorderMetrics};
pub use retry::RetryPolicy;
pub use router::{CakeStats, CakeStatsSource, ConnectivityCheck, RouterControl, RttSource};
pub use state::{StateFile, VersionedState};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Traffic direction of a shaped queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// WAN → LAN
    Download,
    /// LAN → WAN
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Upload => f.write_str("upload"),
        }
    }
}
