//! Command synthesis for remediation actions
//!
//! Deterministic and side-effect free: a rule in, one single-line shell
//! command out. User-supplied values are shell-quoted.

use shell_words::quote;
use thiserror::Error;

use super::rules::{RemediationAction, RemediationRule};

#[derive(Debug, Error, PartialEq)]
pub enum SynthesisError {
    #[error("unsupported action type '{0}'")]
    UnsupportedActionType(String),
}

/// Build the remote command for `rule`, sudo-wrapped when requested
pub fn synthesize(rule: &RemediationRule) -> Result<String, SynthesisError> {
    let command = match &rule.action {
        RemediationAction::RestartService { service, user_scope } => {
            if *user_scope {
                format!("systemctl --user restart {}", quote(service))
            } else {
                format!("systemctl restart {}", quote(service))
            }
        }
        RemediationAction::ClearPath {
            path,
            pattern,
            older_than_days,
        } => {
            let mut cmd = format!("find {} -mindepth 1", quote(path));
            if let Some(pattern) = pattern {
                cmd.push_str(&format!(" -name {}", quote(pattern)));
            }
            if let Some(days) = older_than_days {
                cmd.push_str(&format!(" -mtime +{}", days));
            }
            cmd.push_str(" -delete");
            cmd
        }
        RemediationAction::VacuumJournal { max_age } => {
            format!("journalctl --vacuum-time={}", max_age)
        }
        RemediationAction::CleanupApt => "apt-get clean && apt-get autoremove -y".to_string(),
        RemediationAction::RunCommand { command } => command.clone(),
        RemediationAction::Unsupported { kind } => {
            return Err(SynthesisError::UnsupportedActionType(kind.clone()));
        }
    };

    if rule.use_sudo {
        Ok(format!("sudo -n sh -c {}", quote(&command)))
    } else {
        Ok(command)
    }
}
