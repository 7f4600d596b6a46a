//! Remote metrics probe
//!
//! One fixed shell script is executed on each host. It prints raw
//! `key=value` lines and the percentages are computed locally:
//! - CPU: 1-minute load average divided by core count
//! - Memory: (MemTotal - MemAvailable) / MemTotal
//! - Disk: used-percent of the root filesystem

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::model::MetricsSample;

/// Script run on every host by the collection scheduler
pub const PROBE_SCRIPT: &str = concat!(
    "printf 'cores=%s\\n' \"$(nproc)\"; ",
    "printf 'load=%s\\n' \"$(cut -d ' ' -f1 /proc/loadavg)\"; ",
    "awk '/^MemTotal:/{print \"mem_total_kb=\" $2} /^MemAvailable:/{print \"mem_available_kb=\" $2}' /proc/meminfo; ",
    "df -P / | awk 'NR==2{sub(\"%\",\"\",$5); print \"disk_used_pct=\" $5}'"
);

#[derive(Debug, Error, PartialEq)]
pub enum ProbeError {
    #[error("probe output is missing '{0}'")]
    MissingField(&'static str),
    #[error("probe field '{field}' has invalid value '{value}'")]
    InvalidValue { field: &'static str, value: String },
}

/// Raw figures reported by the probe script
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReading {
    pub cores: u32,
    pub load_one: f64,
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub disk_used_pct: f64,
}

impl ProbeReading {
    pub fn parse(output: &str) -> Result<Self, ProbeError> {
        let fields: HashMap<&str, &str> = output
            .lines()
            .filter_map(|line| line.trim().split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();

        let reading = ProbeReading {
            cores: field(&fields, "cores")?,
            load_one: field(&fields, "load")?,
            mem_total_kb: field(&fields, "mem_total_kb")?,
            mem_available_kb: field(&fields, "mem_available_kb")?,
            disk_used_pct: field(&fields, "disk_used_pct")?,
        };

        if reading.cores == 0 {
            return Err(ProbeError::InvalidValue {
                field: "cores",
                value: "0".to_string(),
            });
        }
        if reading.mem_total_kb == 0 {
            return Err(ProbeError::InvalidValue {
                field: "mem_total_kb",
                value: "0".to_string(),
            });
        }
        Ok(reading)
    }

    pub fn cpu_pct(&self) -> f64 {
        clamp_pct(self.load_one / self.cores as f64 * 100.0)
    }

    pub fn mem_pct(&self) -> f64 {
        let used = self.mem_total_kb.saturating_sub(self.mem_available_kb);
        clamp_pct(used as f64 / self.mem_total_kb as f64 * 100.0)
    }

    pub fn disk_pct(&self) -> f64 {
        clamp_pct(self.disk_used_pct)
    }

    pub fn into_sample(self, host_id: &str, timestamp: DateTime<Utc>) -> MetricsSample {
        MetricsSample {
            host_id: host_id.to_string(),
            cpu_pct: self.cpu_pct(),
            mem_pct: self.mem_pct(),
            disk_pct: self.disk_pct(),
            timestamp,
        }
    }
}

fn field<T: std::str::FromStr>(fields: &HashMap<&str, &str>, name: &'static str) -> Result<T, ProbeError> {
    let raw = fields.get(name).ok_or(ProbeError::MissingField(name))?;
    raw.parse().map_err(|_| ProbeError::InvalidValue {
        field: name,
        value: raw.to_string(),
    })
}

// Load average can exceed the core count on a saturated host.
fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
