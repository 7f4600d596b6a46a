//! Concurrent metrics collection
//!
//! One task per reachable host, fanned out on a `JoinSet`:
//! - hosts failing the reachability probe are skipped (no task)
//! - a semaphore bounds the number of open remote sessions
//! - each task gets `per_task_timeout` from the moment it starts running;
//!   on expiry its future is dropped and the task is `TimedOut`
//! - only `Completed` tasks contribute samples
//!
//! Every task hands its outcome back through its own join slot, nothing is
//! shared between tasks except the semaphore.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::execution::RemoteShell;
use crate::hosts::HostDescriptor;
use crate::metrics::{ProbeReading, PROBE_SCRIPT};
use crate::model::MetricsSample;

/// Lifecycle of a per-host collection task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::TimedOut | TaskState::Failed)
    }
}

/// Per-host unit of work
#[derive(Debug, Clone)]
pub struct CollectionTask {
    pub host: HostDescriptor,
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl CollectionTask {
    fn new(host: HostDescriptor) -> Self {
        Self {
            host,
            state: TaskState::Pending,
            started_at: None,
            deadline: None,
        }
    }

    fn start(&mut self, timeout: Duration) {
        let now = Utc::now();
        self.state = TaskState::Running;
        self.started_at = Some(now);
        self.deadline = chrono::Duration::from_std(timeout).ok().map(|t| now + t);
    }

    /// Move into a terminal state; later transitions are ignored
    fn finish(&mut self, state: TaskState) {
        debug_assert!(state.is_terminal());
        if !self.state.is_terminal() {
            self.state = state;
        }
    }
}

/// Terminal record of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub host_id: String,
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Result of one collection pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    /// Samples of `Completed` tasks, sorted by host id
    pub samples: Vec<MetricsSample>,
    pub outcomes: Vec<TaskOutcome>,
    /// Hosts that failed the reachability probe
    pub unreachable: Vec<String>,
}

impl CollectionReport {
    pub fn count(&self, state: TaskState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }
}

pub struct CollectionScheduler<S> {
    shell: Arc<S>,
    max_concurrency: usize,
    probe_timeout: Duration,
}

impl<S: RemoteShell> CollectionScheduler<S> {
    pub fn new(shell: Arc<S>, max_concurrency: usize, probe_timeout: Duration) -> Self {
        Self {
            shell,
            max_concurrency: max_concurrency.max(1),
            probe_timeout,
        }
    }

    /// Samples from every host whose task completed in time
    pub async fn collect(&self, hosts: &[HostDescriptor], per_task_timeout: Duration) -> Vec<MetricsSample> {
        self.run(hosts, per_task_timeout).await.samples
    }

    /// Full collection pass with per-task outcomes
    pub async fn run(&self, hosts: &[HostDescriptor], per_task_timeout: Duration) -> CollectionReport {
        let mut report = CollectionReport::default();
        if hosts.is_empty() {
            return report;
        }

        let probes = hosts.iter().map(|host| {
            let shell = Arc::clone(&self.shell);
            let probe_timeout = self.probe_timeout;
            async move { (host, shell.probe(host, probe_timeout).await) }
        });

        let mut reachable = Vec::new();
        for (host, ok) in join_all(probes).await {
            if ok {
                reachable.push(host.clone());
            } else {
                warn!("Host {} is unreachable on port {}, skipping", host.id(), host.port);
                report.unreachable.push(host.id().to_string());
            }
        }

        info!(
            "Collecting from {} of {} hosts (max {} concurrent, timeout {:?})",
            reachable.len(),
            hosts.len(),
            self.max_concurrency,
            per_task_timeout
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();
        for host in reachable {
            let shell = Arc::clone(&self.shell);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(Self::collect_one(shell, semaphore, CollectionTask::new(host), per_task_timeout));
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((outcome, sample)) => {
                    if let Some(sample) = sample {
                        report.samples.push(sample);
                    }
                    report.outcomes.push(outcome);
                }
                // Panics inside the probe are caught in the task; this is only cancellation.
                Err(e) => warn!("Collection task aborted: {}", e),
            }
        }

        report.samples.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        report.outcomes.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        report.unreachable.sort();

        info!(
            "Collection finished: {} completed, {} timed out, {} failed, {} unreachable",
            report.count(TaskState::Completed),
            report.count(TaskState::TimedOut),
            report.count(TaskState::Failed),
            report.unreachable.len()
        );
        report
    }

    async fn collect_one(
        shell: Arc<S>,
        semaphore: Arc<Semaphore>,
        mut task: CollectionTask,
        timeout: Duration,
    ) -> (TaskOutcome, Option<MetricsSample>) {
        // The semaphore is never closed, acquisition only waits.
        let _permit = semaphore.acquire_owned().await.ok();
        task.start(timeout);
        debug!("Collecting from {}", task.host.id());

        let exec = AssertUnwindSafe(shell.exec(&task.host, PROBE_SCRIPT, timeout)).catch_unwind();
        let (state, sample, error) =
            match tokio::time::timeout(timeout, exec).await {
                Err(_elapsed) => {
                    warn!("Collection from {} timed out after {:?}", task.host.id(), timeout);
                    (TaskState::TimedOut, None, Some(format!("timed out after {:?}", timeout)))
                }
                Ok(Err(panic)) => {
                    let message = format!("collection panicked: {}", panic_message(panic.as_ref()));
                    warn!("Collection from {} failed: {}", task.host.id(), message);
                    (TaskState::Failed, None, Some(message))
                }
                Ok(Ok(Err(e))) => {
                    warn!("Collection from {} failed: {}", task.host.id(), e);
                    (TaskState::Failed, None, Some(e.to_string()))
                }
                Ok(Ok(Ok(output))) if output.exit_status != 0 => {
                    let message = format!("probe exited with {}: {}", output.exit_status, output.combined());
                    warn!("Collection from {} failed: {}", task.host.id(), message);
                    (TaskState::Failed, None, Some(message))
                }
                Ok(Ok(Ok(output))) => match ProbeReading::parse(&output.stdout) {
                    Ok(reading) => {
                        let sample = reading.into_sample(task.host.id(), Utc::now());
                        debug!(
                            "Collected {}: cpu {:.1}%, mem {:.1}%, disk {:.1}%",
                            sample.host_id, sample.cpu_pct, sample.mem_pct, sample.disk_pct
                        );
                        (TaskState::Completed, Some(sample), None)
                    }
                    Err(e) => {
                        warn!("Unusable probe output from {}: {}", task.host.id(), e);
                        (TaskState::Failed, None, Some(e.to_string()))
                    }
                },
            };

        task.finish(state);
        let outcome = TaskOutcome {
            host_id: task.host.id().to_string(),
            state: task.state,
            started_at: task.started_at,
            deadline: task.deadline,
            error,
        };
        (outcome, sample)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
