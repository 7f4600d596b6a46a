//! One collection, evaluation and remediation pass over the fleet

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::collection::{CollectionScheduler, TaskOutcome, TaskState};
use crate::config::Settings;
use crate::execution::RemoteShell;
use crate::hosts::HostRegistry;
use crate::model::{Alert, MetricsSample};
use crate::output::JsonLinesOutput;
use crate::remediation::RemediationEngine;
use crate::thresholds::{evaluate, Thresholds};

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub hosts_total: usize,
    pub unreachable: Vec<String>,
    pub outcomes: Vec<TaskOutcome>,
    pub samples: Vec<MetricsSample>,
    pub alerts: Vec<Alert>,
    pub records: Vec<AuditRecord>,
    /// Commands that would have run, filled only in dry-run mode
    pub planned_commands: Vec<String>,
}

impl RunSummary {
    pub fn count(&self, state: TaskState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn failed_remediations(&self) -> usize {
        self.records.iter().filter(|r| !r.success).count()
    }
}

pub struct Pipeline<S, A> {
    scheduler: CollectionScheduler<S>,
    engine: RemediationEngine<S, A>,
    thresholds: Thresholds,
    task_timeout: Duration,
    output: JsonLinesOutput,
    dry_run: bool,
}

impl<S: RemoteShell, A: AuditSink> Pipeline<S, A> {
    pub fn new(shell: Arc<S>, audit: A, settings: &Settings) -> Self {
        Self {
            scheduler: CollectionScheduler::new(
                Arc::clone(&shell),
                settings.collection.max_concurrency,
                settings.collection.probe_timeout,
            ),
            engine: RemediationEngine::new(shell, audit, settings.remediation.clone()),
            thresholds: settings.thresholds,
            task_timeout: settings.collection.task_timeout,
            output: JsonLinesOutput::new(&settings.output),
            dry_run: false,
        }
    }

    /// Synthesize and log remediation commands without running them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn into_audit_sink(self) -> A {
        self.engine.into_audit_sink()
    }

    pub async fn run_once(&mut self, hosts: &HostRegistry) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);
        self.run_inner(run_id, hosts).instrument(span).await
    }

    async fn run_inner(&mut self, run_id: Uuid, hosts: &HostRegistry) -> RunSummary {
        info!("Starting run over {} hosts", hosts.len());

        let report = self.scheduler.run(hosts.hosts(), self.task_timeout).await;
        let alerts = evaluate(&report.samples, &self.thresholds);
        info!("{} samples produced {} alerts", report.samples.len(), alerts.len());

        if let Err(e) = self.output.write_samples(&report.samples) {
            warn!("Failed to write metrics stream: {}", e);
        }
        if let Err(e) = self.output.write_alerts(&alerts) {
            warn!("Failed to write alerts stream: {}", e);
        }

        let (records, planned_commands) = if self.dry_run {
            (Vec::new(), self.engine.dry_run(&alerts, hosts))
        } else {
            (self.engine.remediate(&alerts, hosts).await, Vec::new())
        };

        let summary = RunSummary {
            run_id,
            hosts_total: hosts.len(),
            unreachable: report.unreachable,
            outcomes: report.outcomes,
            samples: report.samples,
            alerts,
            records,
            planned_commands,
        };
        info!(
            "Run finished: {} samples, {} alerts, {} remediations ({} failed)",
            summary.samples.len(),
            summary.alerts.len(),
            summary.records.len(),
            summary.failed_remediations()
        );
        summary
    }
}
