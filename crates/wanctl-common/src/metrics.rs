//! Metrics sinks
//!
//! Controllers receive a `MetricsSink` at construction instead of touching a
//! process-wide registry. Every method is fire-and-forget.

use parking_lot::RwLock;

/// Destination for controller metrics
pub trait MetricsSink: Send + Sync {
    /// Record a gauge-style sample
    fn record_metric(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Record a state transition for audit
    fn record_state_transition(&self, wan: &str, from: &str, to: &str, reason: &str);
}

/// Sink used when metrics are disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_metric(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    fn record_state_transition(&self, _wan: &str, _from: &str, _to: &str, _reason: &str) {}
}

/// Sink forwarding to the `metrics` facade
///
/// Whatever recorder the binary installs (or none) receives the samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl MetricsSink for RecorderMetrics {
    fn record_metric(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let labels: Vec<metrics::Label> = labels
            .iter()
            .map(|(k, v)| metrics::Label::new(k.to_string(), v.to_string()))
            .collect();
        metrics::gauge!(name.to_string(), labels).set(value);
    }

    fn record_state_transition(&self, wan: &str, from: &str, to: &str, _reason: &str) {
        let labels = vec![
            metrics::Label::new("wan", wan.to_string()),
            metrics::Label::new("from", from.to_string()),
            metrics::Label::new("to", to.to_string()),
        ];
        metrics::counter!("wanctl_state_transitions_total", labels).increment(1);
    }
}

/// Recorded sample
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub labels: Vec<(String, String)>,
}

/// Recorded transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionSample {
    pub wan: String,
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// In-memory sink (for testing and development)
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    samples: RwLock<Vec<MetricSample>>,
    transitions: RwLock<Vec<TransitionSample>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// All samples recorded under `name`
    pub fn samples(&self, name: &str) -> Vec<MetricSample> {
        self.samples
            .read()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /// Most recent value recorded under `name`
    pub fn last_value(&self, name: &str) -> Option<f64> {
        self.samples
            .read()
            .iter()
            .rev()
            .find(|s| s.name == name)
            .map(|s| s.value)
    }

    /// All recorded transitions
    pub fn transitions(&self) -> Vec<TransitionSample> {
        self.transitions.read().clone()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record_metric(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.samples.write().push(MetricSample {
            name: name.to_string(),
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    fn record_state_transition(&self, wan: &str, from: &str, to: &str, reason: &str) {
        self.transitions.write().push(TransitionSample {
            wan: wan.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        });
    }
}
