//! Remediation rules
//!
//! Rules arrive from configuration as loosely typed tables and are parsed
//! here into [`RemediationRule`] once, at load time. Missing or malformed
//! parameters for a known action type are rejected immediately. Unknown
//! action types are kept as [`RemediationAction::Unsupported`] so the engine
//! can skip them rule by rule.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::model::{Alert, MetricKind};

pub const DEFAULT_JOURNAL_MAX_AGE: &str = "7d";

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("rule {rule}: {message}")]
    Trigger { rule: String, message: String },
    #[error("rule {rule}: action {action} {message}")]
    Action {
        rule: String,
        action: String,
        message: String,
    },
}

/// Comparison between an observed value and a trigger value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Comparator {
    pub fn holds(&self, observed: f64, trigger: f64) -> bool {
        match self {
            Comparator::Gt => observed > trigger,
            Comparator::Gte => observed >= trigger,
            Comparator::Lt => observed < trigger,
            Comparator::Lte => observed <= trigger,
            Comparator::Eq => observed == trigger,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Gt => "gt",
            Comparator::Gte => "gte",
            Comparator::Lt => "lt",
            Comparator::Lte => "lte",
            Comparator::Eq => "eq",
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gt" => Ok(Comparator::Gt),
            "gte" => Ok(Comparator::Gte),
            "lt" => Ok(Comparator::Lt),
            "lte" => Ok(Comparator::Lte),
            "eq" => Ok(Comparator::Eq),
            other => Err(format!("unknown condition '{other}' (expected gt, gte, lt, lte or eq)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub metric: MetricKind,
    pub comparator: Comparator,
    pub value: f64,
}

/// Corrective action run on the offending host
#[derive(Debug, Clone, PartialEq)]
pub enum RemediationAction {
    RestartService {
        service: String,
        user_scope: bool,
    },
    ClearPath {
        path: String,
        pattern: Option<String>,
        older_than_days: Option<u64>,
    },
    VacuumJournal {
        max_age: String,
    },
    CleanupApt,
    RunCommand {
        command: String,
    },
    Unsupported {
        kind: String,
    },
}

impl RemediationAction {
    pub fn type_name(&self) -> &str {
        match self {
            RemediationAction::RestartService { .. } => "RestartService",
            RemediationAction::ClearPath { .. } => "ClearPath",
            RemediationAction::VacuumJournal { .. } => "VacuumJournal",
            RemediationAction::CleanupApt => "CleanupApt",
            RemediationAction::RunCommand { .. } => "RunCommand",
            RemediationAction::Unsupported { kind } => kind,
        }
    }

    fn parameters(&self) -> Value {
        match self {
            RemediationAction::RestartService { service, user_scope } => {
                json!({ "service": service, "user_scope": user_scope })
            }
            RemediationAction::ClearPath {
                path,
                pattern,
                older_than_days,
            } => json!({ "path": path, "pattern": pattern, "older_than_days": older_than_days }),
            RemediationAction::VacuumJournal { max_age } => json!({ "max_age": max_age }),
            RemediationAction::CleanupApt => json!({}),
            RemediationAction::RunCommand { command } => json!({ "command": command }),
            RemediationAction::Unsupported { .. } => json!({}),
        }
    }
}

/// Trigger predicate paired with a remediation action
#[derive(Debug, Clone, PartialEq)]
pub struct RemediationRule {
    pub name: Option<String>,
    pub trigger: Trigger,
    pub action: RemediationAction,
    pub use_sudo: bool,
    pub timeout: Option<Duration>,
}

impl RemediationRule {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.trigger.metric == alert.metric && self.trigger.comparator.holds(alert.value, self.trigger.value)
    }

    /// Human-readable rule identity for logs
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!(
                "{} {} {} -> {}",
                self.trigger.metric,
                self.trigger.comparator.as_str(),
                self.trigger.value,
                self.action.type_name()
            ),
        }
    }

    /// Serialized action parameters, as recorded in the audit log
    pub fn parameters_json(&self) -> String {
        let mut params = self.action.parameters();
        if let Value::Object(map) = &mut params {
            map.insert("use_sudo".to_string(), Value::Bool(self.use_sudo));
            if let Some(timeout) = self.timeout {
                map.insert("timeout_secs".to_string(), json!(timeout.as_secs()));
            }
        }
        params.to_string()
    }
}

impl fmt::Display for RemediationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Rule as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct RawRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub trigger: RawTrigger,
    pub action: RawAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTrigger {
    pub metric: String,
    pub condition: String,
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub use_sudo: bool,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl RawRule {
    /// Validate and convert; `index` is the rule's position in the file
    pub fn parse(&self, index: usize) -> Result<RemediationRule, RuleError> {
        let rule_id = self
            .name
            .clone()
            .unwrap_or_else(|| format!("#{}", index + 1));

        let trigger_err = |message: String| RuleError::Trigger {
            rule: rule_id.clone(),
            message,
        };
        let metric = self.trigger.metric.parse::<MetricKind>().map_err(trigger_err)?;
        let comparator = self.trigger.condition.parse::<Comparator>().map_err(trigger_err)?;
        if !self.trigger.value.is_finite() {
            return Err(trigger_err(format!("trigger value {} is not a number", self.trigger.value)));
        }

        let timeout = match self.timeout_secs {
            Some(0) => return Err(trigger_err("timeout_secs must be greater than 0".to_string())),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let action = self.action.parse(&rule_id)?;
        if let RemediationAction::Unsupported { kind } = &action {
            warn!("Rule {} uses unsupported action type '{}', it will be skipped when triggered", rule_id, kind);
        }

        Ok(RemediationRule {
            name: self.name.clone(),
            trigger: Trigger {
                metric,
                comparator,
                value: self.trigger.value,
            },
            action,
            use_sudo: self.action.use_sudo,
            timeout,
        })
    }
}

impl RawAction {
    fn parse(&self, rule_id: &str) -> Result<RemediationAction, RuleError> {
        let err = |message: &str| RuleError::Action {
            rule: rule_id.to_string(),
            action: self.kind.clone(),
            message: message.to_string(),
        };

        let action = match self.kind.to_ascii_lowercase().as_str() {
            "restartservice" => {
                self.known_keys(&["service", "user_scope"]).map_err(|m| err(m.as_str()))?;
                RemediationAction::RestartService {
                    service: self.required_str("service").ok_or_else(|| err("requires a non-empty 'service'"))?,
                    user_scope: self.optional_bool("user_scope").map_err(|m| err(m))?.unwrap_or(false),
                }
            }
            "clearpath" => {
                self.known_keys(&["path", "pattern", "older_than_days"]).map_err(|m| err(m.as_str()))?;
                let older_than_days = match self.params.get("older_than_days") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(v.as_u64().ok_or_else(|| err("'older_than_days' must be a non-negative integer"))?),
                };
                RemediationAction::ClearPath {
                    path: self.required_str("path").ok_or_else(|| err("requires a non-empty 'path'"))?,
                    pattern: self.optional_str("pattern").map_err(|m| err(m.as_str()))?,
                    older_than_days,
                }
            }
            "vacuumjournal" => {
                self.known_keys(&["max_age"]).map_err(|m| err(m.as_str()))?;
                let max_age = self
                    .optional_str("max_age")
                    .map_err(|m| err(m.as_str()))?
                    .unwrap_or_else(|| DEFAULT_JOURNAL_MAX_AGE.to_string());
                if !max_age.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(err("'max_age' must look like 7d, 12h or 2weeks"));
                }
                RemediationAction::VacuumJournal { max_age }
            }
            "cleanupapt" => {
                self.known_keys(&[]).map_err(|m| err(m.as_str()))?;
                RemediationAction::CleanupApt
            }
            "runcommand" => {
                self.known_keys(&["command"]).map_err(|m| err(m.as_str()))?;
                let command = self.required_str("command").ok_or_else(|| err("requires a non-empty 'command'"))?;
                if command.contains('\n') {
                    return Err(err("'command' must be a single line"));
                }
                RemediationAction::RunCommand { command }
            }
            _ => RemediationAction::Unsupported {
                kind: self.kind.clone(),
            },
        };
        Ok(action)
    }

    /// Every parameter must be one the action takes
    fn known_keys(&self, allowed: &[&str]) -> Result<(), String> {
        let unknown: Vec<&str> = self
            .params
            .keys()
            .map(String::as_str)
            .filter(|key| !allowed.contains(key))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(format!("has unknown parameters: {}", unknown.join(", ")))
        }
    }

    fn required_str(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Absent is `None`; present must be a non-empty string
    fn optional_str(&self, key: &str) -> Result<Option<String>, String> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
            Some(_) => Err(format!("'{key}' must be a non-empty string")),
        }
    }

    fn optional_bool(&self, key: &str) -> Result<Option<bool>, &'static str> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err("has a non-boolean flag"),
        }
    }
}
