//! Collection scheduler behaviour against a scripted shell

use std::sync::Arc;
use std::time::Duration;

use fleetwatch::collection::{CollectionScheduler, TaskState};
use fleetwatch::execution::TransportError;
use fleetwatch_devkit::fixtures::{host, registry};
use fleetwatch_devkit::test_utils::init_tracing;
use fleetwatch_devkit::{HostBehavior, MockShell};

const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

fn scheduler(shell: &Arc<MockShell>, max_concurrency: usize) -> CollectionScheduler<MockShell> {
    CollectionScheduler::new(Arc::clone(shell), max_concurrency, PROBE_TIMEOUT)
}

#[tokio::test]
async fn test_samples_only_from_completed_hosts() {
    init_tracing();
    let shell = Arc::new(MockShell::new());
    shell.set_metrics("a", 12.0, 30.0, 40.0);
    shell.set_metrics("b", 50.0, 60.0, 70.0);

    let hosts = registry(&["b", "a"]);
    let report = scheduler(&shell, 4).run(hosts.hosts(), Duration::from_secs(2)).await;

    let ids: Vec<&str> = report.samples.iter().map(|s| s.host_id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    assert_eq!(report.count(TaskState::Completed), 2);
    assert!((report.samples[1].disk_pct - 70.0).abs() < 1e-9);
    assert!(report.unreachable.is_empty());
}

#[tokio::test]
async fn test_hung_host_times_out_and_is_excluded() {
    init_tracing();
    let shell = Arc::new(MockShell::new());
    shell.set_behavior("slow", HostBehavior::Hang);
    shell.set_metrics("fast", 10.0, 10.0, 10.0);

    let hosts = registry(&["slow", "fast"]);
    let report = scheduler(&shell, 4).run(hosts.hosts(), Duration::from_millis(200)).await;

    assert_eq!(report.samples.len(), 1);
    assert_eq!(report.samples[0].host_id, "fast");

    let slow = report.outcomes.iter().find(|o| o.host_id == "slow").unwrap();
    assert_eq!(slow.state, TaskState::TimedOut);
    assert!(slow.started_at.is_some());
    assert!(slow.deadline.is_some());
    assert!(slow.error.is_some());
}

#[tokio::test]
async fn test_failures_are_isolated() {
    init_tracing();
    let shell = Arc::new(MockShell::new());
    shell.set_behavior("auth", HostBehavior::Fail(TransportError::Auth {
        username: "ops".into(),
        message: "key rejected".into(),
    }));
    shell.set_behavior("exit", HostBehavior::ExitStatus(127, "nproc: not found".into()));
    shell.set_behavior("garbage", HostBehavior::RawOutput("hello world".into()));
    shell.set_behavior("panics", HostBehavior::Panic);
    shell.set_metrics("healthy", 20.0, 20.0, 20.0);

    let hosts = registry(&["auth", "exit", "garbage", "panics", "healthy"]);
    let report = scheduler(&shell, 2).run(hosts.hosts(), Duration::from_secs(2)).await;

    assert_eq!(report.samples.len(), 1);
    assert_eq!(report.samples[0].host_id, "healthy");
    assert_eq!(report.count(TaskState::Failed), 4);
    assert_eq!(report.count(TaskState::Completed), 1);
    assert_eq!(report.outcomes.len(), 5);
}

#[tokio::test]
async fn test_panicking_host_is_recorded_as_failed() {
    init_tracing();
    let shell = Arc::new(MockShell::new());
    shell.set_behavior("panics", HostBehavior::Panic);

    let hosts = registry(&["panics"]);
    let report = scheduler(&shell, 1).run(hosts.hosts(), Duration::from_secs(2)).await;

    assert!(report.samples.is_empty());
    assert!(report.unreachable.is_empty());
    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.host_id, "panics");
    assert_eq!(outcome.state, TaskState::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("scripted panic on panics"));
}

#[tokio::test]
async fn test_unreachable_hosts_get_no_task() {
    init_tracing();
    let shell = Arc::new(MockShell::new());
    shell.set_metrics("up", 10.0, 10.0, 10.0);
    shell.set_metrics("down", 10.0, 10.0, 10.0);
    shell.set_unreachable("down");

    let hosts = registry(&["up", "down"]);
    let report = scheduler(&shell, 4).run(hosts.hosts(), Duration::from_secs(2)).await;

    assert_eq!(report.unreachable, ["down"]);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(shell.collected_hosts(), ["up"]);

    let mut probed = shell.probed_hosts();
    probed.sort();
    assert_eq!(probed, ["down", "up"]);
}

#[tokio::test]
async fn test_sessions_bounded_by_max_concurrency() {
    init_tracing();
    let shell = Arc::new(MockShell::new());
    let names: Vec<String> = (0..10).map(|i| format!("host-{i:02}")).collect();
    for name in &names {
        shell.set_metrics(name, 5.0, 5.0, 5.0);
        shell.set_delay(name, Duration::from_millis(30));
    }

    let hosts: Vec<_> = names.iter().map(|n| host(n)).collect();
    let report = scheduler(&shell, 3).run(&hosts, Duration::from_secs(5)).await;

    assert_eq!(report.samples.len(), 10);
    assert!(shell.max_concurrent() <= 3, "saw {} concurrent sessions", shell.max_concurrent());
    assert!(shell.max_concurrent() >= 1);
}

#[tokio::test]
async fn test_deadline_starts_when_task_runs() {
    init_tracing();
    let shell = Arc::new(MockShell::new());
    for name in ["a", "b", "c"] {
        shell.set_metrics(name, 5.0, 5.0, 5.0);
        shell.set_delay(name, Duration::from_millis(100));
    }

    // Serialised, the three tasks need ~300 ms; each alone fits in 250 ms.
    let hosts = registry(&["a", "b", "c"]);
    let report = scheduler(&shell, 1).run(hosts.hosts(), Duration::from_millis(250)).await;

    assert_eq!(report.count(TaskState::Completed), 3);
    assert_eq!(shell.max_concurrent(), 1);
}

#[tokio::test]
async fn test_collect_returns_samples_and_handles_empty_fleet() {
    init_tracing();
    let shell = Arc::new(MockShell::new());
    shell.set_metrics("a", 91.0, 10.0, 10.0);

    let scheduler = scheduler(&shell, 2);
    assert!(scheduler.collect(&[], Duration::from_secs(1)).await.is_empty());

    let samples = scheduler.collect(&[host("a")], Duration::from_secs(1)).await;
    assert_eq!(samples.len(), 1);
    assert!((samples[0].cpu_pct - 91.0).abs() < 1e-6);
}
