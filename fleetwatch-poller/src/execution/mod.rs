//! Remote command execution for fleetwatch
//!
//! Two layers:
//! - [`RemoteShell`]: transport that opens a session, runs one command and
//!   closes the session. Errors are reported as [`TransportError`].
//! - [`RemoteExecutor`]: the remediation-facing primitive. It bounds a call
//!   by a timeout and folds every failure into the sentinel exit code
//!   [`TRANSPORT_FAILURE_EXIT_CODE`], so callers never see an error.

mod sessions;
mod ssh;

pub use sessions::SessionLimiter;
pub use ssh::SshShell;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hosts::HostDescriptor;

/// Exit code reported when a command could not be run at all
pub const TRANSPORT_FAILURE_EXIT_CODE: i32 = 9999;

/// Transport-level failures
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },
    #[error("authentication as {username} failed: {message}")]
    Auth { username: String, message: String },
    #[error("remote channel error: {0}")]
    Channel(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("execution task aborted: {0}")]
    Aborted(String),
}

/// Raw output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr (when present), trimmed
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            stdout.to_string()
        } else if stdout.is_empty() {
            stderr.to_string()
        } else {
            format!("{}\nSTDERR:\n{}", stdout, stderr)
        }
    }
}

/// Secure channel to a remote host
#[async_trait]
pub trait RemoteShell: Send + Sync + 'static {
    /// Lightweight reachability check, never opens a session
    async fn probe(&self, host: &HostDescriptor, timeout: Duration) -> bool;

    /// Open a session, run `command`, close the session
    ///
    /// Implementations must close the session on every path and give up
    /// once `timeout` has elapsed.
    async fn exec(
        &self,
        host: &HostDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError>;
}

/// Command execution result
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub output: String,
    pub execution_time_ms: u128,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn transport_failed(&self) -> bool {
        self.exit_code == TRANSPORT_FAILURE_EXIT_CODE
    }
}

/// Runs single commands on single hosts, never failing
pub struct RemoteExecutor<S> {
    shell: Arc<S>,
}

impl<S> Clone for RemoteExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            shell: Arc::clone(&self.shell),
        }
    }
}

impl<S: RemoteShell> RemoteExecutor<S> {
    pub fn new(shell: Arc<S>) -> Self {
        Self { shell }
    }

    /// Run `command` on `host`, bounded by `timeout`
    ///
    /// Any transport, authentication or timeout failure is returned as
    /// exit code 9999 with a non-empty message.
    pub async fn run(&self, host: &HostDescriptor, command: &str, timeout: Duration) -> ExecutionResult {
        let start_time = Instant::now();
        debug!("Executing on {}: {} (timeout: {:?})", host.id(), command, timeout);

        // The shell runs on its own task so a panicking transport is contained too.
        let shell = Arc::clone(&self.shell);
        let task_host = host.clone();
        let task_command = command.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::timeout(timeout, shell.exec(&task_host, &task_command, timeout)).await
        });

        let outcome = match handle.await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_elapsed)) => Err(TransportError::Timeout(timeout)),
            Err(join_error) => Err(TransportError::Aborted(join_error.to_string())),
        };

        let execution_time_ms = start_time.elapsed().as_millis();
        match outcome {
            Ok(output) => ExecutionResult {
                exit_code: output.exit_status,
                output: output.combined(),
                execution_time_ms,
            },
            Err(e) => {
                warn!("Remote execution on {} failed: {}", host.id(), e);
                ExecutionResult {
                    exit_code: TRANSPORT_FAILURE_EXIT_CODE,
                    output: e.to_string(),
                    execution_time_ms,
                }
            }
        }
    }
}
