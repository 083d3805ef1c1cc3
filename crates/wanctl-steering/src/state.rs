//! Steering persisted state (schema v2)

use crate::machine::{TransitionRecord, HISTORY_LIMIT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wanctl_common::VersionedState;

/// Full steering record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringRecord {
    /// `{PRIMARY}_GOOD` or `{PRIMARY}_DEGRADED`
    pub current_state: String,
    pub bad_count: u32,
    pub good_count: u32,
    pub baseline_rtt: Option<f64>,
    pub history_rtt: Vec<f64>,
    pub history_delta: Vec<f64>,
    pub transitions: Vec<TransitionRecord>,
    pub cake_read_failures: u32,
    pub rtt_delta_ewma: f64,
    pub queue_ewma: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl VersionedState for SteeringRecord {
    const VERSION: u32 = 2;

    fn migrate(mut value: Value, from_version: u32) -> Value {
        if from_version >= 2 {
            return value;
        }
        let Some(root) = value.as_object_mut() else {
            return value;
        };

        // v1 called it "state"
        if !root.contains_key("current_state") {
            if let Some(state) = root.remove("state") {
                root.insert("current_state".into(), state);
            }
        }
        root.entry("rtt_delta_ewma").or_insert(Value::from(0.0));
        root.entry("queue_ewma").or_insert(Value::from(0.0));
        root.entry("cake_read_failures").or_insert(Value::from(0));

        // v1 histories were unbounded
        for key in ["history_rtt", "history_delta", "transitions"] {
            if let Some(list) = root.get_mut(key).and_then(Value::as_array_mut) {
                if list.len() > HISTORY_LIMIT {
                    let excess = list.len() - HISTORY_LIMIT;
                    list.drain(..excess);
                }
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wanctl_common::StateFile;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("steering_state.json"));
        let record = SteeringRecord {
            current_state: "WAN1_DEGRADED".into(),
            bad_count: 0,
            good_count: 4,
            baseline_rtt: Some(24.0),
            history_rtt: vec![25.0, 61.5],
            history_delta: vec![1.0, 37.5],
            transitions: vec![TransitionRecord {
                timestamp: Utc::now(),
                from: "WAN1_GOOD".into(),
                to: "WAN1_DEGRADED".into(),
                reason: "2 consecutive RED samples (delta 37.5ms)".into(),
            }],
            cake_read_failures: 1,
            rtt_delta_ewma: 12.25,
            queue_ewma: 7.5,
            timestamp: Some(Utc::now()),
        };
        assert!(file.save(&record).unwrap());
        assert_eq!(file.load::<SteeringRecord>(), Some(record));
    }

    #[test]
    fn test_v1_migration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steering_state.json");
        let history: Vec<f64> = (0..80).map(f64::from).collect();
        let doc = serde_json::json!({
            "state": "WAN1_DEGRADED",
            "bad_count": 0,
            "good_count": 3,
            "history_rtt": history,
        });
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let record = StateFile::new(&path).load::<SteeringRecord>().unwrap();
        assert_eq!(record.current_state, "WAN1_DEGRADED");
        assert_eq!(record.good_count, 3);
        assert_eq!(record.cake_read_failures, 0);
        assert_eq!(record.history_rtt.len(), HISTORY_LIMIT);
        assert_eq!(record.history_rtt[0], 30.0);
    }
}
