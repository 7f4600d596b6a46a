//! SSH transport built on `ssh2`
//!
//! libssh2 is blocking, so every session lives on the blocking pool and
//! holds a [`SessionLimiter`] slot until it is closed. The whole session,
//! connect through close, is bounded by the caller's timeout, so an
//! abandoned session still terminates on its own.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use ssh2::{Channel, Session};
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::sessions::SessionLimiter;
use super::{CommandOutput, RemoteShell, TransportError};
use crate::hosts::HostDescriptor;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Key-based SSH shell
#[derive(Debug, Clone)]
pub struct SshShell {
    passphrase: Option<SecretString>,
    sessions: SessionLimiter,
}

impl SshShell {
    /// `max_sessions` bounds the sessions open at once across all callers
    pub fn new(passphrase: Option<SecretString>, max_sessions: usize) -> Self {
        Self {
            passphrase,
            sessions: SessionLimiter::new(max_sessions),
        }
    }
}

/// Disconnects the wrapped session when dropped
struct SessionGuard {
    session: Session,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "fleetwatch session closed", None);
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn probe(&self, host: &HostDescriptor, timeout: Duration) -> bool {
        let connect = tokio::net::TcpStream::connect((host.address.as_str(), host.port));
        matches!(tokio::time::timeout(timeout, connect).await, Ok(Ok(_)))
    }

    async fn exec(
        &self,
        host: &HostDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let host = host.clone();
        let command = command.to_string();
        let passphrase = self.passphrase.clone();

        self.sessions
            .run_blocking(move || {
                let deadline = Instant::now() + timeout;
                exec_blocking(&host, &command, passphrase.as_ref(), deadline, timeout)
            })
            .await
    }
}

fn remaining(deadline: Instant, timeout: Duration) -> Result<Duration, TransportError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(TransportError::Timeout(timeout))
    } else {
        Ok(left)
    }
}

fn set_session_timeout(session: &Session, left: Duration) {
    session.set_timeout(left.as_millis().clamp(1, u32::MAX as u128) as u32);
}

fn resolve(host: &HostDescriptor) -> Result<SocketAddr, TransportError> {
    let endpoint = format!("{}:{}", host.address, host.port);
    endpoint
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?
        .next()
        .ok_or_else(|| TransportError::Connect {
            endpoint,
            message: "address did not resolve".to_string(),
        })
}

fn open_session(
    host: &HostDescriptor,
    passphrase: Option<&SecretString>,
    deadline: Instant,
    timeout: Duration,
) -> Result<SessionGuard, TransportError> {
    let addr = resolve(host)?;
    let endpoint = addr.to_string();
    let connect_err = |message: String| TransportError::Connect {
        endpoint: endpoint.clone(),
        message,
    };

    let left = remaining(deadline, timeout)?;
    let tcp = TcpStream::connect_timeout(&addr, left).map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(left)).ok();
    tcp.set_write_timeout(Some(left)).ok();

    let mut session = Session::new().map_err(|e| connect_err(e.to_string()))?;
    session.set_tcp_stream(tcp);
    set_session_timeout(&session, remaining(deadline, timeout)?);
    session.handshake().map_err(|e| connect_err(e.to_string()))?;

    let guard = SessionGuard { session };
    set_session_timeout(&guard.session, remaining(deadline, timeout)?);
    guard
        .session
        .userauth_pubkey_file(
            &host.username,
            None,
            &host.key_path,
            passphrase.map(|p| p.expose_secret()),
        )
        .map_err(|e| TransportError::Auth {
            username: host.username.clone(),
            message: format!("key {}: {}", host.key_path.display(), e),
        })?;

    if !guard.session.authenticated() {
        return Err(TransportError::Auth {
            username: host.username.clone(),
            message: "server rejected the key".to_string(),
        });
    }

    Ok(guard)
}

fn exec_blocking(
    host: &HostDescriptor,
    command: &str,
    passphrase: Option<&SecretString>,
    deadline: Instant,
    timeout: Duration,
) -> Result<CommandOutput, TransportError> {
    let guard = open_session(host, passphrase, deadline, timeout)?;
    debug!("SSH session open to {}", host.id());

    let channel_err = |e: ssh2::Error| TransportError::Channel(e.to_string());

    set_session_timeout(&guard.session, remaining(deadline, timeout)?);
    let mut channel = guard.session.channel_session().map_err(channel_err)?;
    channel.exec(command).map_err(channel_err)?;

    // Non-blocking reads drain stdout and stderr together up to the deadline.
    guard.session.set_blocking(false);
    let (stdout, stderr) = read_streams(&channel, deadline, timeout)?;
    guard.session.set_blocking(true);

    set_session_timeout(&guard.session, remaining(deadline, timeout)?);
    channel.wait_close().map_err(channel_err)?;
    let exit_status = channel.exit_status().map_err(channel_err)?;
    let signal = channel.exit_signal().ok().and_then(|s| s.exit_signal);
    if let Some(name) = &signal {
        warn!("Command on {} was killed by signal {}", host.id(), name);
    }

    Ok(command_output(&stdout, &stderr, exit_status, signal.as_deref()))
}

fn read_streams(
    channel: &Channel,
    deadline: Instant,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>), TransportError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let mut progressed = drain(&mut channel.stream(0), &mut stdout, &mut buf)?;
        progressed |= drain(&mut channel.stderr(), &mut stderr, &mut buf)?;
        if channel.eof() {
            // Data queued while the EOF flag was being processed.
            drain(&mut channel.stream(0), &mut stdout, &mut buf)?;
            drain(&mut channel.stderr(), &mut stderr, &mut buf)?;
            return Ok((stdout, stderr));
        }
        remaining(deadline, timeout)?;
        if !progressed {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Read whatever is available; `true` if anything was read
fn drain(reader: &mut impl Read, out: &mut Vec<u8>, buf: &mut [u8]) -> Result<bool, TransportError> {
    let mut progressed = false;
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(progressed),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::Channel(e.to_string())),
        }
    }
}

/// Assemble the result of a command that ran
///
/// Output is decoded lossily. libssh2 reports status 0 for a process killed
/// by a signal, so a signal maps to 128 + its number like a shell does.
fn command_output(stdout: &[u8], stderr: &[u8], exit_status: i32, signal: Option<&str>) -> CommandOutput {
    let mut stderr = String::from_utf8_lossy(stderr).into_owned();
    let exit_status = match signal {
        Some(name) => {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("killed by signal SIG{}", name));
            signal_exit_code(name)
        }
        None => exit_status,
    };
    CommandOutput {
        exit_status,
        stdout: String::from_utf8_lossy(stdout).into_owned(),
        stderr,
    }
}

fn signal_exit_code(name: &str) -> i32 {
    let number = match name.trim_start_matches("SIG") {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "TRAP" => 5,
        "ABRT" => 6,
        "BUS" => 7,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "USR2" => 12,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        // Unknown signal, still a failure
        _ => 127,
    };
    128 + number
}
