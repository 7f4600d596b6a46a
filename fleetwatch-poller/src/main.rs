//! Fleetwatch - poll a fleet of Linux hosts over SSH, alert on resource
//! pressure and run audited remediation rules
//!
//! Each invocation performs exactly one run and exits.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetwatch::audit::CsvAuditLog;
use fleetwatch::collection::TaskState;
use fleetwatch::config::{Overrides, Settings};
use fleetwatch::execution::SshShell;
use fleetwatch::hosts::HostRegistry;
use fleetwatch::pipeline::Pipeline;

#[derive(Debug, Parser)]
#[command(name = "fleetwatch", version, about = "Fleet resource poller with audited SSH remediation")]
struct Args {
    /// Config file (default: $FLEETWATCH_CONFIG or the user config directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host list CSV (Server, Username, KeyPath, optional Port)
    #[arg(long, value_name = "FILE")]
    hosts: Option<PathBuf>,

    /// Enable remediation for this run
    #[arg(long, conflicts_with = "no_remediate")]
    remediate: bool,

    /// Disable remediation for this run
    #[arg(long)]
    no_remediate: bool,

    /// Log the remediation commands that would run, without running them
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        let remediation_enabled = match (self.remediate, self.no_remediate) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        Overrides {
            hosts_file: self.hosts.clone(),
            remediation_enabled,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleetwatch=info")))
        .init();

    let args = Args::parse();
    info!("Fleetwatch v{} starting", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(args.config.as_deref(), &args.overrides()).context("Failed to load configuration")?;

    let registry = HostRegistry::from_csv_path(&settings.hosts_file)
        .with_context(|| format!("Failed to load host list {}", settings.hosts_file.display()))?;
    info!("Loaded {} hosts from {}", registry.len(), settings.hosts_file.display());

    if settings.remediation.enabled {
        info!(
            "Remediation enabled with {} rules, audit log {}",
            settings.remediation.rules.len(),
            settings.audit_log_path.display()
        );
        warn!("No cooldown between runs: a persisting condition is remediated again on every run");
    } else {
        info!("Remediation disabled, alerts are reported only");
    }

    let shell = Arc::new(SshShell::new(
        settings.key_passphrase.clone(),
        settings.collection.max_concurrency,
    ));
    let audit = CsvAuditLog::new(&settings.audit_log_path);
    let mut pipeline = Pipeline::new(shell, audit, &settings).with_dry_run(args.dry_run);

    let summary = pipeline.run_once(&registry).await;

    info!(
        "Run {}: {}/{} hosts collected, {} unreachable, {} timed out, {} failed",
        summary.run_id,
        summary.count(TaskState::Completed),
        summary.hosts_total,
        summary.unreachable.len(),
        summary.count(TaskState::TimedOut),
        summary.count(TaskState::Failed)
    );
    for alert in &summary.alerts {
        warn!(
            "ALERT {} {} {:.1}% > {:.1}%",
            alert.host_id, alert.metric, alert.value, alert.threshold
        );
    }
    for record in summary.records.iter().filter(|r| !r.success) {
        warn!(
            "Remediation {} on {} failed (exit {}): {}",
            record.action_type, record.host_id, record.exit_code, record.message
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_flags() {
        let args = Args::parse_from(["fleetwatch", "--remediate", "--hosts", "h.csv"]);
        let overrides = args.overrides();
        assert_eq!(overrides.remediation_enabled, Some(true));
        assert_eq!(overrides.hosts_file, Some(PathBuf::from("h.csv")));

        let args = Args::parse_from(["fleetwatch", "--no-remediate", "--dry-run"]);
        assert_eq!(args.overrides().remediation_enabled, Some(false));
        assert!(args.dry_run);

        assert_eq!(Args::parse_from(["fleetwatch"]).overrides().remediation_enabled, None);
        assert!(Args::try_parse_from(["fleetwatch", "--remediate", "--no-remediate"]).is_err());
    }
}
