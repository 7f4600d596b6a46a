//! Builders for hosts, samples, alerts, rules and probe output

use chrono::Utc;
use std::time::Duration;

use fleetwatch::hosts::{HostDescriptor, HostRegistry};
use fleetwatch::model::{Alert, MetricKind, MetricsSample};
use fleetwatch::remediation::{Comparator, RemediationAction, RemediationRule, Trigger};

/// Probe script output that parses back to exactly these percentages
///
/// 100 cores make the load average equal to the CPU percentage and a
/// 10000 kB total makes used kB a hundredth of a percent.
pub fn probe_output(cpu: f64, mem: f64, disk: f64) -> String {
    let total_kb: u64 = 10_000;
    let used_kb = (mem * 100.0).round().clamp(0.0, total_kb as f64) as u64;
    format!(
        "cores=100\nload={}\nmem_total_kb={}\nmem_available_kb={}\ndisk_used_pct={}\n",
        cpu,
        total_kb,
        total_kb - used_kb,
        disk
    )
}

pub fn host(address: &str) -> HostDescriptor {
    HostDescriptor::new(address, "ops", format!("/keys/{}.pem", address))
}

pub fn registry(addresses: &[&str]) -> HostRegistry {
    HostRegistry::new(addresses.iter().map(|a| host(a)).collect())
}

pub fn sample(host_id: &str, cpu: f64, mem: f64, disk: f64) -> MetricsSample {
    MetricsSample {
        host_id: host_id.to_string(),
        cpu_pct: cpu,
        mem_pct: mem,
        disk_pct: disk,
        timestamp: Utc::now(),
    }
}

pub fn alert(host_id: &str, metric: MetricKind, value: f64, threshold: f64) -> Alert {
    Alert {
        host_id: host_id.to_string(),
        metric,
        value,
        threshold,
        timestamp: Utc::now(),
    }
}

/// Rule firing when `metric` is above `value`
pub fn rule(metric: MetricKind, value: f64, action: RemediationAction) -> RemediationRule {
    RemediationRule {
        name: None,
        trigger: Trigger {
            metric,
            comparator: Comparator::Gt,
            value,
        },
        action,
        use_sudo: false,
        timeout: None,
    }
}

pub fn named_rule(name: &str, metric: MetricKind, value: f64, action: RemediationAction) -> RemediationRule {
    RemediationRule {
        name: Some(name.to_string()),
        ..rule(metric, value, action)
    }
}

pub fn with_timeout(mut rule: RemediationRule, timeout: Duration) -> RemediationRule {
    rule.timeout = Some(timeout);
    rule
}

pub fn restart(service: &str) -> RemediationAction {
    RemediationAction::RestartService {
        service: service.to_string(),
        user_scope: false,
    }
}

pub fn run_command(command: &str) -> RemediationAction {
    RemediationAction::RunCommand {
        command: command.to_string(),
    }
}
