//! Fleetwatch - fleet resource poller with audited remediation
//!
//! One run of the pipeline:
//! - probe every host and collect CPU, memory and disk usage over SSH
//! - compare the samples against fixed thresholds
//! - run the configured remediation rules on alerting hosts, one audit
//!   record per execution

pub mod audit;
pub mod collection;
pub mod config;
pub mod execution;
pub mod hosts;
pub mod metrics;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod remediation;
pub mod thresholds;

pub use audit::{AuditRecord, AuditSink, CsvAuditLog};
pub use collection::{CollectionReport, CollectionScheduler, TaskState};
pub use config::Settings;
pub use execution::{ExecutionResult, RemoteExecutor, RemoteShell, SshShell, TRANSPORT_FAILURE_EXIT_CODE};
pub use hosts::{HostDescriptor, HostRegistry};
pub use model::{Alert, MetricKind, MetricsSample};
pub use pipeline::{Pipeline, RunSummary};
pub use remediation::{RemediationEngine, RemediationPolicy, RemediationRule};
pub use thresholds::{evaluate, Thresholds};
