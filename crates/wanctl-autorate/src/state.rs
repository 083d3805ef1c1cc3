//! Autorate persisted state (schema v2)
//!
//! ```json
//! {
//!   "version": 2,
//!   "ewma": {"baseline_rtt": 24.1, "load_rtt": 26.3},
//!   "download": {"current_rate": 850000000, "green_streak": 4, "soft_red_streak": 0, "red_streak": 0, "zone": "GREEN"},
//!   "upload": {...},
//!   "last_applied": {"dl_rate": 850000000, "ul_rate": 38000000},
//!   "timestamp": "2026-01-01T00:00:00Z"
//! }
//! ```

use crate::queue::QueueState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wanctl_common::VersionedState;

/// Smoothed RTTs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EwmaState {
    pub baseline_rtt: Option<f64>,
    pub load_rtt: Option<f64>,
}

/// Limits last pushed to the router
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastApplied {
    pub dl_rate: Option<u64>,
    pub ul_rate: Option<u64>,
}

/// Full autorate record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutorateState {
    pub ewma: EwmaState,
    pub download: QueueState,
    pub upload: QueueState,
    pub last_applied: LastApplied,
    pub timestamp: Option<DateTime<Utc>>,
}

impl AutorateState {
    /// Equality ignoring the timestamp, used for dirty tracking
    pub fn same_content(&self, other: &Self) -> bool {
        self.ewma == other.ewma
            && self.download == other.download
            && self.upload == other.upload
            && self.last_applied == other.last_applied
    }
}

impl VersionedState for AutorateState {
    const VERSION: u32 = 2;

    fn migrate(mut value: Value, from_version: u32) -> Value {
        if from_version >= 2 {
            return value;
        }
        let Some(root) = value.as_object_mut() else {
            return value;
        };

        // v1 had no SOFT_RED zone
        for direction in ["download", "upload"] {
            if let Some(queue) = root.get_mut(direction).and_then(Value::as_object_mut) {
                queue.entry("soft_red_streak").or_insert(Value::from(0));
            }
        }

        // v1 kept only the baseline; seed the load EWMA from it
        if let Some(ewma) = root.get_mut("ewma").and_then(Value::as_object_mut) {
            let seed = ewma.get("baseline_rtt").cloned().unwrap_or(Value::Null);
            let missing = ewma.get("load_rtt").map_or(true, Value::is_null);
            if missing {
                ewma.insert("load_rtt".into(), seed);
            }
        }
        value
    }
}
