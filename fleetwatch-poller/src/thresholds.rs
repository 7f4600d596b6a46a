//! Threshold evaluation
//!
//! Pure mapping from samples to alerts. A metric alerts when its value is
//! strictly greater than the threshold. No deduplication, no hysteresis:
//! every call stands alone.

use serde::{Deserialize, Serialize};

use crate::model::{Alert, MetricKind, MetricsSample};

/// Alert thresholds in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: 85.0,
            memory: 90.0,
            disk: 80.0,
        }
    }
}

impl Thresholds {
    pub fn for_metric(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Disk => self.disk,
        }
    }
}

/// Alerts for every sample, in sample order then CPU, Memory, Disk
pub fn evaluate(samples: &[MetricsSample], thresholds: &Thresholds) -> Vec<Alert> {
    samples
        .iter()
        .flat_map(|sample| {
            MetricKind::ALL.into_iter().filter_map(move |metric| {
                let value = sample.value(metric);
                let threshold = thresholds.for_metric(metric);
                (value > threshold).then(|| Alert {
                    host_id: sample.host_id.clone(),
                    metric,
                    value,
                    threshold,
                    timestamp: sample.timestamp,
                })
            })
        })
        .collect()
}
