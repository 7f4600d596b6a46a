//! Shared data model for a polling run
//!
//! Samples are produced by the collection scheduler, alerts by the
//! threshold evaluator. Both are plain values, never mutated once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource metric tracked per host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    #[serde(rename = "CPU")]
    Cpu,
    Memory,
    Disk,
}

impl MetricKind {
    /// Evaluation order used by the threshold evaluator
    pub const ALL: [MetricKind; 3] = [MetricKind::Cpu, MetricKind::Memory, MetricKind::Disk];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU",
            MetricKind::Memory => "Memory",
            MetricKind::Disk => "Disk",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(MetricKind::Cpu),
            "memory" | "mem" | "ram" => Ok(MetricKind::Memory),
            "disk" => Ok(MetricKind::Disk),
            other => Err(format!("unknown metric '{other}' (expected CPU, Memory or Disk)")),
        }
    }
}

/// One CPU/Memory/Disk measurement of a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub host_id: String,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricsSample {
    pub fn value(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Cpu => self.cpu_pct,
            MetricKind::Memory => self.mem_pct,
            MetricKind::Disk => self.disk_pct,
        }
    }
}

/// A sample value above its configured threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub host_id: String,
    pub metric: MetricKind,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_parsing_is_case_insensitive() {
        assert_eq!("cpu".parse::<MetricKind>().unwrap(), MetricKind::Cpu);
        assert_eq!("MEMORY".parse::<MetricKind>().unwrap(), MetricKind::Memory);
        assert_eq!(" Disk ".parse::<MetricKind>().unwrap(), MetricKind::Disk);
        assert!("swap".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_metric_serializes_with_display_names() {
        assert_eq!(serde_json::to_string(&MetricKind::Cpu).unwrap(), "\"CPU\"");
        assert_eq!(serde_json::to_string(&MetricKind::Memory).unwrap(), "\"Memory\"");
    }
}
