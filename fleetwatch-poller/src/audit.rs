//! Remediation audit trail
//!
//! Append-only CSV with a fixed header. The header is written once, when the
//! file is created (or found empty). Every record is flushed on its own so a
//! crash after N executions keeps records 1..N.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::model::MetricKind;

pub const AUDIT_COLUMNS: [&str; 10] = [
    "Timestamp",
    "Server",
    "Metric",
    "Value",
    "Threshold",
    "ActionType",
    "Parameters",
    "Success",
    "ExitCode",
    "Message",
];

/// One remediation attempt and its outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Server")]
    pub host_id: String,
    #[serde(rename = "Metric")]
    pub metric: MetricKind,
    #[serde(rename = "Value")]
    pub value: f64,
    #[serde(rename = "Threshold")]
    pub threshold: f64,
    #[serde(rename = "ActionType")]
    pub action_type: String,
    #[serde(rename = "Parameters")]
    pub parameters: String,
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "ExitCode")]
    pub exit_code: i32,
    #[serde(rename = "Message")]
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("audit log {path}: {source}")]
    Csv { path: String, source: csv::Error },
}

/// Destination for audit records, owned by a single writer
pub trait AuditSink: Send {
    /// Make sure the destination exists and carries its header
    fn ensure_ready(&mut self) -> Result<(), AuditError>;

    /// Append and flush one record
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// CSV audit log on disk
pub struct CsvAuditLog {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> AuditError {
        AuditError::Csv {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn open(&self) -> Result<csv::Writer<File>, AuditError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let is_new = file.metadata().map_err(|e| self.io_err(e))?.len() == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(AUDIT_COLUMNS).map_err(|e| self.csv_err(e))?;
            writer.flush().map_err(|e| self.io_err(e))?;
            debug!("Created audit log {}", self.path.display());
        }
        Ok(writer)
    }
}

impl AuditSink for CsvAuditLog {
    fn ensure_ready(&mut self) -> Result<(), AuditError> {
        if self.writer.is_none() {
            self.writer = Some(self.open()?);
        }
        Ok(())
    }

    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        self.ensure_ready()?;
        let path = self.path.display().to_string();
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer.serialize(record).map_err(|source| AuditError::Csv {
            path: path.clone(),
            source,
        })?;
        writer.flush().map_err(|source| AuditError::Io { path, source })
    }
}
