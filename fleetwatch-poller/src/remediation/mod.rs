//! Policy-driven remediation
//!
//! For every alert, every matching rule fires (escalation, not first match).
//! Matched rules are turned into commands, executed one at a time on the
//! alerting host, and each execution yields exactly one audit record.

pub mod commands;
pub mod rules;

pub use commands::{synthesize, SynthesisError};
pub use rules::{Comparator, RawRule, RemediationAction, RemediationRule, RuleError, Trigger};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::audit::{AuditRecord, AuditSink};
use crate::execution::{RemoteExecutor, RemoteShell};
use crate::hosts::{HostDescriptor, HostRegistry};
use crate::model::Alert;

/// Remediation settings, read-only during a run
#[derive(Debug, Clone)]
pub struct RemediationPolicy {
    pub enabled: bool,
    pub default_timeout: Duration,
    pub rules: Vec<RemediationRule>,
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            default_timeout: Duration::from_secs(60),
            rules: Vec::new(),
        }
    }
}

/// One rule-match ready to run
#[derive(Debug)]
pub struct PlannedAction<'a> {
    pub alert: &'a Alert,
    pub host: &'a HostDescriptor,
    pub rule: &'a RemediationRule,
    pub command: Result<String, SynthesisError>,
}

/// Match alerts against rules and synthesize commands, without running anything
///
/// Alerts for hosts missing from the registry are skipped with a warning.
pub fn plan<'a>(policy: &'a RemediationPolicy, alerts: &'a [Alert], hosts: &'a HostRegistry) -> Vec<PlannedAction<'a>> {
    let mut planned = Vec::new();
    for alert in alerts {
        let Some(host) = hosts.get(&alert.host_id) else {
            warn!("No host descriptor for alerting host {}, skipping remediation", alert.host_id);
            continue;
        };
        for rule in policy.rules.iter().filter(|rule| rule.matches(alert)) {
            planned.push(PlannedAction {
                alert,
                host,
                rule,
                command: synthesize(rule),
            });
        }
    }
    planned
}

pub struct RemediationEngine<S, A> {
    executor: RemoteExecutor<S>,
    audit: A,
    policy: RemediationPolicy,
    audit_ready: bool,
}

impl<S: RemoteShell, A: AuditSink> RemediationEngine<S, A> {
    pub fn new(shell: Arc<S>, audit: A, policy: RemediationPolicy) -> Self {
        Self {
            executor: RemoteExecutor::new(shell),
            audit,
            policy,
            audit_ready: false,
        }
    }

    pub fn policy(&self) -> &RemediationPolicy {
        &self.policy
    }

    pub fn into_audit_sink(self) -> A {
        self.audit
    }

    /// Execute every matching rule for every alert, sequentially
    ///
    /// Returns one audit record per executed rule-match. Returns nothing
    /// when remediation is disabled.
    pub async fn remediate(&mut self, alerts: &[Alert], hosts: &HostRegistry) -> Vec<AuditRecord> {
        if !self.policy.enabled {
            if !alerts.is_empty() {
                info!("Remediation disabled, ignoring {} alerts", alerts.len());
            }
            return Vec::new();
        }

        let planned = plan(&self.policy, alerts, hosts);
        let mut records = Vec::with_capacity(planned.len());

        for action in planned {
            let command = match action.command {
                Ok(command) => command,
                Err(e) => {
                    warn!("Rule {} skipped for {}: {}", action.rule, action.host.id(), e);
                    continue;
                }
            };

            let timeout = action.rule.timeout.unwrap_or(self.policy.default_timeout);
            info!(
                "Remediating {} on {} ({} {:.1} > {:.1}) with rule {}",
                action.rule.action.type_name(),
                action.host.id(),
                action.alert.metric,
                action.alert.value,
                action.alert.threshold,
                action.rule
            );
            let result = self.executor.run(action.host, &command, timeout).await;

            if result.success() {
                info!("Rule {} succeeded on {}", action.rule, action.host.id());
            } else {
                warn!(
                    "Rule {} failed on {} with exit code {}",
                    action.rule,
                    action.host.id(),
                    result.exit_code
                );
            }

            let message = if result.output.is_empty() {
                format!("exit code {}", result.exit_code)
            } else {
                result.output.clone()
            };
            let record = AuditRecord {
                timestamp: Utc::now(),
                host_id: action.host.id().to_string(),
                metric: action.alert.metric,
                value: action.alert.value,
                threshold: action.alert.threshold,
                action_type: action.rule.action.type_name().to_string(),
                parameters: action.rule.parameters_json(),
                success: result.success(),
                exit_code: result.exit_code,
                message,
            };
            write_audit(&mut self.audit, &mut self.audit_ready, &record);
            records.push(record);
        }

        records
    }

    /// Log the commands `remediate` would run, without running or auditing them
    pub fn dry_run(&self, alerts: &[Alert], hosts: &HostRegistry) -> Vec<String> {
        if !self.policy.enabled {
            return Vec::new();
        }
        plan(&self.policy, alerts, hosts)
            .into_iter()
            .filter_map(|action| match action.command {
                Ok(command) => {
                    info!("[dry-run] {} on {}: {}", action.rule, action.host.id(), command);
                    Some(command)
                }
                Err(e) => {
                    warn!("[dry-run] Rule {} skipped for {}: {}", action.rule, action.host.id(), e);
                    None
                }
            })
            .collect()
    }
}

// Field-level borrows: the plan keeps `policy` borrowed during execution.
fn write_audit<A: AuditSink>(audit: &mut A, ready: &mut bool, record: &AuditRecord) {
    if !*ready {
        match audit.ensure_ready() {
            Ok(()) => *ready = true,
            Err(e) => error!("Audit log unavailable: {}", e),
        }
    }
    if let Err(e) = audit.append(record) {
        error!("Failed to write audit record for {}: {}", record.host_id, e);
    }
}
