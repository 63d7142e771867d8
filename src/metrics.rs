//! Metrics collaborator seam
//!
//! The pipeline reports counters and timing observations through this
//! trait; the backend is external. The sink is constructed explicitly
//! and passed into the queue and handler -- no process-global state.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

/// Counters keyed by name+labels, histograms keyed by operation
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, labels: &[(&str, &str)]);
    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Default sink: surfaces metrics as structured log events
#[derive(Debug, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        debug!(metric = name, ?labels, "increment");
    }

    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        debug!(metric = name, ?labels, value, "observe");
    }
}

/// In-memory sink for tests and the `scan` command
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<String, u64>>,
    observations: Mutex<Vec<(String, f64)>>,
}

impl RecordingMetrics {
    /// Total count for a metric name, across all label sets
    pub fn counter(&self, name: &str) -> u64 {
        let counters = self.counters.lock().unwrap();
        counters
            .iter()
            .filter(|(k, _)| k.split('{').next() == Some(name))
            .map(|(_, v)| *v)
            .sum()
    }

    /// Count for an exact name+labels combination
    pub fn counter_with(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = keyed(name, labels);
        *self.counters.lock().unwrap().get(&key).unwrap_or(&0)
    }

    /// All recorded observations for a metric name
    pub fn observations(&self, name: &str) -> Vec<f64> {
        self.observations
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let key = keyed(name, labels);
        *self.counters.lock().unwrap().entry(key).or_insert(0) += 1;
    }

    fn observe(&self, name: &str, _labels: &[(&str, &str)], value: f64) {
        self.observations
            .lock()
            .unwrap()
            .push((name.to_string(), value));
    }
}

fn keyed(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return format!("{name}{{}}");
    }
    let rendered: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}
