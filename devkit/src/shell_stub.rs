/*!
Mock remote shell for tests without SSH

Each host gets a scripted behaviour for the metrics probe. Any other command
is treated as a remediation and answered from a per-host response (exit 0 by
default). Every call is recorded, and the number of commands in flight is
tracked so tests can check the concurrency bound.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use fleetwatch::execution::{CommandOutput, RemoteShell, TransportError};
use fleetwatch::hosts::HostDescriptor;
use fleetwatch::metrics::PROBE_SCRIPT;

use crate::fixtures::probe_output;

/// How a host answers the metrics probe
#[derive(Debug, Clone)]
pub enum HostBehavior {
    Metrics { cpu: f64, mem: f64, disk: f64 },
    /// Probe output returned verbatim with exit status 0
    RawOutput(String),
    ExitStatus(i32, String),
    Fail(TransportError),
    /// Never answers
    Hang,
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub host_id: String,
    pub command: String,
}

#[derive(Default)]
struct Script {
    behaviors: HashMap<String, HostBehavior>,
    delays: HashMap<String, Duration>,
    unreachable: HashSet<String>,
    responses: HashMap<String, Result<CommandOutput, TransportError>>,
}

/// Scripted `RemoteShell`
#[derive(Clone, Default)]
pub struct MockShell {
    script: Arc<Mutex<Script>>,
    executed: Arc<Mutex<Vec<ExecutedCommand>>>,
    probed: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, host_id: &str, behavior: HostBehavior) -> &Self {
        self.script.lock().behaviors.insert(host_id.to_string(), behavior);
        self
    }

    pub fn set_metrics(&self, host_id: &str, cpu: f64, mem: f64, disk: f64) -> &Self {
        self.set_behavior(host_id, HostBehavior::Metrics { cpu, mem, disk })
    }

    /// Delay every command on `host_id` before answering
    pub fn set_delay(&self, host_id: &str, delay: Duration) -> &Self {
        self.script.lock().delays.insert(host_id.to_string(), delay);
        self
    }

    pub fn set_unreachable(&self, host_id: &str) -> &Self {
        self.script.lock().unreachable.insert(host_id.to_string());
        self
    }

    /// Answer remediation commands on `host_id` with this exit status and output
    pub fn set_command_response(&self, host_id: &str, exit_status: i32, stdout: &str) -> &Self {
        let output = CommandOutput {
            exit_status,
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
        self.script.lock().responses.insert(host_id.to_string(), Ok(output));
        self
    }

    /// Fail remediation commands on `host_id` at the transport level
    pub fn set_command_failure(&self, host_id: &str, error: TransportError) -> &Self {
        self.script.lock().responses.insert(host_id.to_string(), Err(error));
        self
    }

    /// Every command in call order, probe script included
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.executed.lock().clone()
    }

    /// Commands other than the metrics probe, in call order
    pub fn remediation_commands(&self) -> Vec<ExecutedCommand> {
        self.executed
            .lock()
            .iter()
            .filter(|c| c.command != PROBE_SCRIPT)
            .cloned()
            .collect()
    }

    /// Hosts whose metrics probe was started
    pub fn collected_hosts(&self) -> Vec<String> {
        self.executed
            .lock()
            .iter()
            .filter(|c| c.command == PROBE_SCRIPT)
            .map(|c| c.host_id.clone())
            .collect()
    }

    /// Hosts that went through the reachability probe
    pub fn probed_hosts(&self) -> Vec<String> {
        self.probed.lock().clone()
    }

    /// Highest number of commands that were running at the same time
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(Arc::clone(&self.in_flight))
    }

    async fn answer_probe(&self, host_id: &str) -> Result<CommandOutput, TransportError> {
        let behavior = self.script.lock().behaviors.get(host_id).cloned();
        match behavior {
            Some(HostBehavior::Metrics { cpu, mem, disk }) => Ok(CommandOutput {
                exit_status: 0,
                stdout: probe_output(cpu, mem, disk),
                stderr: String::new(),
            }),
            Some(HostBehavior::RawOutput(stdout)) => Ok(CommandOutput {
                exit_status: 0,
                stdout,
                stderr: String::new(),
            }),
            Some(HostBehavior::ExitStatus(exit_status, stderr)) => Ok(CommandOutput {
                exit_status,
                stdout: String::new(),
                stderr,
            }),
            Some(HostBehavior::Fail(error)) => Err(error),
            Some(HostBehavior::Hang) => {
                std::future::pending::<()>().await;
                Err(TransportError::Channel("unreachable".to_string()))
            }
            Some(HostBehavior::Panic) => panic!("scripted panic on {}", host_id),
            None => Err(TransportError::Connect {
                endpoint: host_id.to_string(),
                message: "no scripted behaviour".to_string(),
            }),
        }
    }
}

/// Decrements the in-flight counter even when the command future is dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn probe(&self, host: &HostDescriptor, _timeout: Duration) -> bool {
        self.probed.lock().push(host.id().to_string());
        !self.script.lock().unreachable.contains(host.id())
    }

    async fn exec(
        &self,
        host: &HostDescriptor,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        self.executed.lock().push(ExecutedCommand {
            host_id: host.id().to_string(),
            command: command.to_string(),
        });
        debug!("[MOCK] exec on {}: {}", host.id(), command);

        let _guard = self.enter();
        let delay = self.script.lock().delays.get(host.id()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if command == PROBE_SCRIPT {
            return self.answer_probe(host.id()).await;
        }

        let response = self.script.lock().responses.get(host.id()).cloned();
        response.unwrap_or_else(|| {
            Ok(CommandOutput {
                exit_status: 0,
                stdout: "ok".to_string(),
                stderr: String::new(),
            })
        })
    }
}
