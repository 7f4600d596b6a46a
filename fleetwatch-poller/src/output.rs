//! JSON Lines output streams
//!
//! Samples and alerts can be appended to files, one JSON object per line,
//! for adapters that persist or forward them.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::OutputSettings;
use crate::model::{Alert, MetricsSample};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to encode record for {path}: {source}")]
    Encode {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct JsonLinesOutput {
    metrics_path: Option<PathBuf>,
    alerts_path: Option<PathBuf>,
}

impl JsonLinesOutput {
    pub fn new(settings: &OutputSettings) -> Self {
        Self {
            metrics_path: settings.metrics_path.clone(),
            alerts_path: settings.alerts_path.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.metrics_path.is_some() || self.alerts_path.is_some()
    }

    /// Append samples; a no-op without `metrics_path`
    pub fn write_samples(&self, samples: &[MetricsSample]) -> Result<usize, OutputError> {
        match &self.metrics_path {
            Some(path) => append_lines(path, samples),
            None => Ok(0),
        }
    }

    /// Append alerts; a no-op without `alerts_path`
    pub fn write_alerts(&self, alerts: &[Alert]) -> Result<usize, OutputError> {
        match &self.alerts_path {
            Some(path) => append_lines(path, alerts),
            None => Ok(0),
        }
    }
}

fn append_lines<T: Serialize>(path: &Path, items: &[T]) -> Result<usize, OutputError> {
    if items.is_empty() {
        return Ok(0);
    }
    let io_err = |source| OutputError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);

    for item in items {
        let line = serde_json::to_string(item).map_err(|source| OutputError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        writeln!(writer, "{}", line).map_err(io_err)?;
    }
    writer.flush().map_err(io_err)?;

    debug!("Appended {} records to {}", items.len(), path.display());
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKind;
    use chrono::Utc;

    fn sample(host: &str) -> MetricsSample {
        MetricsSample {
            host_id: host.to_string(),
            cpu_pct: 12.5,
            mem_pct: 40.0,
            disk_pct: 71.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let output = JsonLinesOutput::new(&OutputSettings {
            metrics_path: Some(dir.path().join("out").join("metrics.jsonl")),
            alerts_path: None,
        });

        assert_eq!(output.write_samples(&[sample("a"), sample("b")]).unwrap(), 2);
        assert_eq!(output.write_samples(&[sample("c")]).unwrap(), 1);

        let content = fs::read_to_string(dir.path().join("out").join("metrics.jsonl")).unwrap();
        let hosts: Vec<String> = content
            .lines()
            .map(|line| serde_json::from_str::<MetricsSample>(line).unwrap().host_id)
            .collect();
        assert_eq!(hosts, ["a", "b", "c"]);
    }

    #[test]
    fn test_disabled_streams_write_nothing() {
        let output = JsonLinesOutput::default();
        assert!(!output.is_enabled());
        assert_eq!(output.write_samples(&[sample("a")]).unwrap(), 0);

        let alert = Alert {
            host_id: "a".into(),
            metric: MetricKind::Cpu,
            value: 97.0,
            threshold: 85.0,
            timestamp: Utc::now(),
        };
        assert_eq!(output.write_alerts(&[alert]).unwrap(), 0);
    }
}
