//! Full runs: collection, evaluation and remediation together

use std::time::Duration;

use fleetwatch::audit::AUDIT_COLUMNS;
use fleetwatch::collection::TaskState;
use fleetwatch::model::{MetricKind, MetricsSample};
use fleetwatch_devkit::fixtures::{named_rule, registry, restart, rule, run_command};
use fleetwatch_devkit::{HostBehavior, TestHarness};

#[tokio::test]
async fn test_single_alert_single_remediation() {
    let harness = TestHarness::new()
        .unwrap()
        .with_rules(vec![named_rule("restart-dbus", MetricKind::Cpu, 90.0, restart("dbus"))]);
    harness.shell.set_metrics("A", 96.0, 40.0, 50.0);
    harness.shell.set_metrics("B", 10.0, 20.0, 30.0);

    let (mut pipeline, sink) = harness.pipeline();
    let summary = pipeline.run_once(&registry(&["A", "B"])).await;

    assert_eq!(summary.hosts_total, 2);
    assert_eq!(summary.samples.len(), 2);
    assert_eq!(summary.alerts.len(), 1);
    assert_eq!(summary.alerts[0].host_id, "A");
    assert_eq!(summary.alerts[0].metric, MetricKind::Cpu);
    assert_eq!(summary.alerts[0].threshold, 85.0);

    assert_eq!(summary.records.len(), 1);
    let record = &summary.records[0];
    assert_eq!(record.host_id, "A");
    assert_eq!(record.action_type, "RestartService");
    assert!(record.success);
    assert_eq!(record.exit_code, 0);
    assert!((record.value - 96.0).abs() < 1e-6);

    let commands = harness.shell.remediation_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].host_id, "A");
    assert_eq!(commands[0].command, "systemctl restart dbus");
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn test_escalation_across_metrics() {
    let harness = TestHarness::new().unwrap().with_rules(vec![
        rule(MetricKind::Disk, 85.0, run_command("docker system prune -f")),
        rule(MetricKind::Disk, 90.0, run_command("rm -f /var/log/*.gz")),
        rule(MetricKind::Memory, 90.0, restart("app")),
        rule(MetricKind::Memory, 95.0, restart("db")),
    ]);
    harness.shell.set_metrics("A", 10.0, 97.0, 93.0);

    let (mut pipeline, sink) = harness.pipeline();
    let summary = pipeline.run_once(&registry(&["A"])).await;

    // Alerts come out Memory then Disk, rules in config order per alert.
    assert_eq!(summary.alerts.len(), 2);
    let commands: Vec<String> = harness
        .shell
        .remediation_commands()
        .into_iter()
        .map(|c| c.command)
        .collect();
    assert_eq!(
        commands,
        [
            "systemctl restart app",
            "systemctl restart db",
            "docker system prune -f",
            "rm -f /var/log/*.gz",
        ]
    );
    assert_eq!(summary.records.len(), 4);
    assert_eq!(sink.records().len(), 4);
}

#[tokio::test]
async fn test_disabled_remediation_still_alerts() {
    let mut harness = TestHarness::new()
        .unwrap()
        .with_rules(vec![rule(MetricKind::Cpu, 90.0, restart("dbus"))]);
    harness.settings.remediation.enabled = false;
    harness.shell.set_metrics("A", 99.0, 10.0, 10.0);

    let (mut pipeline, sink) = harness.pipeline();
    let summary = pipeline.run_once(&registry(&["A"])).await;

    assert_eq!(summary.alerts.len(), 1);
    assert!(summary.records.is_empty());
    assert!(harness.shell.remediation_commands().is_empty());
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_dry_run_plans_but_does_not_execute() {
    let harness = TestHarness::new()
        .unwrap()
        .with_rules(vec![rule(MetricKind::Cpu, 90.0, restart("dbus"))]);
    harness.shell.set_metrics("A", 99.0, 10.0, 10.0);

    let (pipeline, sink) = harness.pipeline();
    let mut pipeline = pipeline.with_dry_run(true);
    let summary = pipeline.run_once(&registry(&["A"])).await;

    assert_eq!(summary.planned_commands, ["systemctl restart dbus"]);
    assert!(summary.records.is_empty());
    assert!(harness.shell.remediation_commands().is_empty());
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_timed_out_and_unreachable_hosts_produce_no_alerts() {
    let mut harness = TestHarness::new()
        .unwrap()
        .with_rules(vec![rule(MetricKind::Cpu, 90.0, restart("dbus"))]);
    harness.settings.collection.task_timeout = Duration::from_millis(200);
    harness.shell.set_behavior("hung", HostBehavior::Hang);
    harness.shell.set_metrics("down", 99.0, 99.0, 99.0);
    harness.shell.set_unreachable("down");
    harness.shell.set_metrics("ok", 5.0, 5.0, 5.0);

    let (mut pipeline, _sink) = harness.pipeline();
    let summary = pipeline.run_once(&registry(&["hung", "down", "ok"])).await;

    assert_eq!(summary.hosts_total, 3);
    assert_eq!(summary.unreachable, ["down"]);
    assert_eq!(summary.count(TaskState::TimedOut), 1);
    assert_eq!(summary.count(TaskState::Completed), 1);
    assert!(summary.alerts.is_empty());
    assert!(summary.records.is_empty());
}

#[tokio::test]
async fn test_csv_audit_header_written_once_across_runs() {
    let harness = TestHarness::new()
        .unwrap()
        .with_rules(vec![rule(MetricKind::Cpu, 90.0, restart("dbus"))]);
    harness.shell.set_metrics("A", 99.0, 10.0, 10.0);
    let hosts = registry(&["A"]);

    for _ in 0..2 {
        let mut pipeline = harness.csv_pipeline();
        let summary = pipeline.run_once(&hosts).await;
        assert_eq!(summary.records.len(), 1);
    }

    let content = std::fs::read_to_string(harness.audit_path()).unwrap();
    let header = AUDIT_COLUMNS.join(",");
    assert_eq!(content.lines().filter(|line| *line == header).count(), 1);

    let mut reader = csv::Reader::from_path(harness.audit_path()).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| &row[1] == "A" && &row[5] == "RestartService"));
}

#[tokio::test]
async fn test_output_streams_receive_samples_and_alerts() {
    let mut harness = TestHarness::new().unwrap();
    harness.settings.output.metrics_path = Some(harness.path("metrics.jsonl"));
    harness.settings.output.alerts_path = Some(harness.path("alerts.jsonl"));
    harness.shell.set_metrics("A", 99.0, 10.0, 10.0);
    harness.shell.set_metrics("B", 10.0, 10.0, 10.0);

    let (mut pipeline, _sink) = harness.pipeline();
    pipeline.run_once(&registry(&["A", "B"])).await;

    let metrics = std::fs::read_to_string(harness.path("metrics.jsonl")).unwrap();
    let samples: Vec<MetricsSample> = metrics.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(samples.len(), 2);

    let alerts = std::fs::read_to_string(harness.path("alerts.jsonl")).unwrap();
    assert_eq!(alerts.lines().count(), 1);
    assert!(alerts.contains("\"metric\":\"CPU\""));
}
