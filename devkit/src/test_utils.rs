/*!
Test harness for pipeline-level tests

Bundles a `MockShell`, a temporary directory for audit and output files and
a `Settings` value with remediation enabled and short timeouts.
*/

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use fleetwatch::audit::{AuditError, AuditRecord, AuditSink, CsvAuditLog};
use fleetwatch::config::{Overrides, Settings};
use fleetwatch::pipeline::Pipeline;
use fleetwatch::remediation::RemediationRule;

use crate::shell_stub::MockShell;

/// Install a test-writer subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Audit sink keeping records in memory, shared between clones
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    ready_calls: Arc<Mutex<usize>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn ready_calls(&self) -> usize {
        *self.ready_calls.lock()
    }
}

impl AuditSink for MemoryAuditSink {
    fn ensure_ready(&mut self) -> Result<(), AuditError> {
        *self.ready_calls.lock() += 1;
        Ok(())
    }

    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

pub struct TestHarness {
    pub shell: Arc<MockShell>,
    pub settings: Settings,
    dir: TempDir,
}

impl TestHarness {
    /// Defaults plus remediation enabled, 2 s task timeout, audit log in a temp dir
    pub fn new() -> anyhow::Result<Self> {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let mut settings = Settings::from_layers(None, |_| None, &Overrides::default(), None)?;
        settings.remediation.enabled = true;
        settings.remediation.default_timeout = Duration::from_secs(2);
        settings.collection.task_timeout = Duration::from_secs(2);
        settings.audit_log_path = dir.path().join("audit.csv");

        Ok(Self {
            shell: Arc::new(MockShell::new()),
            settings,
            dir,
        })
    }

    pub fn with_rules(mut self, rules: Vec<RemediationRule>) -> Self {
        self.settings.remediation.rules = rules;
        self
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.settings.audit_log_path.clone()
    }

    /// Pipeline writing to an in-memory audit sink
    pub fn pipeline(&self) -> (Pipeline<MockShell, MemoryAuditSink>, MemoryAuditSink) {
        let sink = MemoryAuditSink::new();
        let pipeline = Pipeline::new(Arc::clone(&self.shell), sink.clone(), &self.settings);
        (pipeline, sink)
    }

    /// Pipeline writing the CSV audit log under the temp dir
    pub fn csv_pipeline(&self) -> Pipeline<MockShell, CsvAuditLog> {
        Pipeline::new(
            Arc::clone(&self.shell),
            CsvAuditLog::new(self.audit_path()),
            &self.settings,
        )
    }
}
