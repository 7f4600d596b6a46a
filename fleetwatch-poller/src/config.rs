//! Configuration management with secure secret lookup
//!
//! Settings are assembled once, before anything runs, from these layers
//! (lowest first):
//! - built-in defaults
//! - TOML config file
//! - `FLEETWATCH_*` environment variables
//! - command-line overrides
//! - secrets: SSH key passphrase from the environment or the OS keyring
//!
//! Remediation rules are parsed and validated here, so a bad rule stops the
//! program before any host is contacted.

use keyring::Entry;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::remediation::{RawRule, RemediationPolicy, RuleError};
use crate::thresholds::Thresholds;

const KEYRING_SERVICE: &str = "fleetwatch";
const KEYRING_USER: &str = "ssh-key-passphrase";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
    #[error("invalid remediation rule: {0}")]
    Rule(#[from] RuleError),
}

/// Config file layout
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub hosts_file: PathBuf,
    pub collection: CollectionFileConfig,
    pub thresholds: Thresholds,
    pub remediation: RemediationFileConfig,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionFileConfig {
    pub max_concurrency: usize,
    pub task_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemediationFileConfig {
    pub enabled: bool,
    pub default_timeout_secs: u64,
    pub audit_log_path: PathBuf,
    pub rules: Vec<RawRule>,
}

/// Optional JSON Lines outputs for external adapters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub metrics_path: Option<PathBuf>,
    pub alerts_path: Option<PathBuf>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            hosts_file: PathBuf::from("hosts.csv"),
            collection: CollectionFileConfig::default(),
            thresholds: Thresholds::default(),
            remediation: RemediationFileConfig::default(),
            output: OutputSettings::default(),
        }
    }
}

impl Default for CollectionFileConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            task_timeout_secs: 60,
            probe_timeout_secs: 3,
        }
    }
}

impl Default for RemediationFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_timeout_secs: 60,
            audit_log_path: PathBuf::from("remediation-audit.csv"),
            rules: Vec::new(),
        }
    }
}

/// Collection scheduler settings
#[derive(Debug, Clone)]
pub struct CollectionSettings {
    pub max_concurrency: usize,
    pub task_timeout: Duration,
    pub probe_timeout: Duration,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub hosts_file: Option<PathBuf>,
    pub remediation_enabled: Option<bool>,
}

/// Fully resolved, immutable configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub hosts_file: PathBuf,
    pub collection: CollectionSettings,
    pub thresholds: Thresholds,
    pub remediation: RemediationPolicy,
    pub audit_log_path: PathBuf,
    pub output: OutputSettings,
    pub key_passphrase: Option<SecretString>,
}

impl Settings {
    /// Load from disk, environment and keyring
    ///
    /// `explicit_path` must exist. Without it, `FLEETWATCH_CONFIG` or the
    /// OS config directory is tried and a missing file means defaults.
    pub fn load(explicit_path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let file = match explicit_path {
            Some(path) => Some(read_config(path)?),
            None => {
                match Self::config_file_path() {
                    Some(path) if path.exists() => Some(read_config(&path)?),
                    Some(path) => {
                        warn!("No config file at {}, using defaults", path.display());
                        None
                    }
                    None => None,
                }
            }
        };

        let env = |key: &str| std::env::var(key).ok();
        let passphrase = resolve_passphrase(env("FLEETWATCH_KEY_PASSPHRASE"), Self::load_passphrase);

        Self::from_layers(file, env, overrides, passphrase)
    }

    /// Merge the layers on top of `file` (defaults when no file was found)
    pub fn from_layers<F>(
        file: Option<FileConfig>,
        env: F,
        overrides: &Overrides,
        key_passphrase: Option<SecretString>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = file.unwrap_or_default();

        if let Some(path) = env("FLEETWATCH_HOSTS_FILE") {
            config.hosts_file = PathBuf::from(path);
        }
        if let Some(path) = env("FLEETWATCH_AUDIT_LOG") {
            config.remediation.audit_log_path = PathBuf::from(path);
        }
        if let Some(raw) = env("FLEETWATCH_MAX_CONCURRENCY") {
            config.collection.max_concurrency = raw.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("FLEETWATCH_MAX_CONCURRENCY '{raw}' is not a number"))
            })?;
        }
        if let Some(raw) = env("FLEETWATCH_REMEDIATION_ENABLED") {
            config.remediation.enabled = parse_bool(&raw).ok_or_else(|| {
                ConfigError::Validation(format!("FLEETWATCH_REMEDIATION_ENABLED '{raw}' is not a boolean"))
            })?;
        }

        if let Some(path) = &overrides.hosts_file {
            config.hosts_file = path.clone();
        }
        if let Some(enabled) = overrides.remediation_enabled {
            config.remediation.enabled = enabled;
        }

        Self::validate(config, key_passphrase)
    }

    fn validate(config: FileConfig, key_passphrase: Option<SecretString>) -> Result<Self, ConfigError> {
        if config.hosts_file.as_os_str().is_empty() {
            return Err(ConfigError::Validation("hosts_file must not be empty".to_string()));
        }
        if config.collection.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "collection.max_concurrency must be greater than 0".to_string(),
            ));
        }
        if config.collection.task_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "collection.task_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if config.collection.probe_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "collection.probe_timeout_secs must be greater than 0".to_string(),
            ));
        }
        validate_percentage("thresholds.cpu", config.thresholds.cpu)?;
        validate_percentage("thresholds.memory", config.thresholds.memory)?;
        validate_percentage("thresholds.disk", config.thresholds.disk)?;
        if config.remediation.default_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remediation.default_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if config.remediation.audit_log_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "remediation.audit_log_path must not be empty".to_string(),
            ));
        }

        let rules = config
            .remediation
            .rules
            .iter()
            .enumerate()
            .map(|(index, raw)| raw.parse(index))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Loaded {} remediation rules", rules.len());

        Ok(Settings {
            hosts_file: config.hosts_file,
            collection: CollectionSettings {
                max_concurrency: config.collection.max_concurrency,
                task_timeout: Duration::from_secs(config.collection.task_timeout_secs),
                probe_timeout: Duration::from_secs(config.collection.probe_timeout_secs),
            },
            thresholds: config.thresholds,
            remediation: RemediationPolicy {
                enabled: config.remediation.enabled,
                default_timeout: Duration::from_secs(config.remediation.default_timeout_secs),
                rules,
            },
            audit_log_path: config.remediation.audit_log_path,
            output: config.output,
            key_passphrase,
        })
    }

    /// Config file path from `FLEETWATCH_CONFIG` or the OS config directory
    pub fn config_file_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FLEETWATCH_CONFIG") {
            return Some(PathBuf::from(path));
        }
        let mut path = dirs::config_dir()?;
        path.push("fleetwatch");
        path.push("config.toml");
        Some(path)
    }

    /// Load the SSH key passphrase from the OS keyring (macOS Keychain,
    /// Windows Credential Manager, Linux kernel keyutils)
    fn load_passphrase() -> Option<SecretString> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER).ok()?;
        match entry.get_password() {
            Ok(password) => Some(SecretString::new(password.into_boxed_str())),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!("Keyring lookup failed: {}", e);
                None
            }
        }
    }
}

impl FileConfig {
    /// Parse TOML text; `origin` names the source in errors
    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }
}

fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    debug!("Loaded config file {}", path.display());
    FileConfig::from_toml(&text, &path.display().to_string())
}

/// A non-empty environment value wins; the keyring is consulted otherwise
fn resolve_passphrase<F>(env_value: Option<String>, keyring: F) -> Option<SecretString>
where
    F: FnOnce() -> Option<SecretString>,
{
    match env_value.filter(|v| !v.is_empty()) {
        Some(value) => Some(SecretString::new(value.into_boxed_str())),
        None => keyring(),
    }
}

fn validate_percentage(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::Validation(format!("{name} must be between 0 and 100")));
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKind;
    use crate::remediation::{Comparator, RemediationAction};
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
hosts_file = "/etc/fleetwatch/hosts.csv"

[collection]
max_concurrency = 4
task_timeout_secs = 30

[thresholds]
cpu = 85
memory = 90
disk = 80

[remediation]
enabled = true
default_timeout_secs = 120
audit_log_path = "/var/log/fleetwatch/audit.csv"

[[remediation.rules]]
name = "restart-dbus"
trigger = { metric = "CPU", condition = "GT", value = 90 }
action = { type = "RestartService", service = "dbus", use_sudo = true }

[[remediation.rules]]
timeout_secs = 600
trigger = { metric = "disk", condition = "gte", value = 95 }
action = { type = "ClearPath", path = "/var/tmp", older_than_days = 3 }
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn file(text: &str) -> Option<FileConfig> {
        Some(FileConfig::from_toml(text, "test.toml").unwrap())
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::from_layers(None, no_env, &Overrides::default(), None).unwrap();
        assert_eq!(settings.hosts_file, PathBuf::from("hosts.csv"));
        assert_eq!(settings.collection.max_concurrency, 8);
        assert_eq!(settings.thresholds, Thresholds::default());
        assert!(!settings.remediation.enabled);
        assert!(settings.remediation.rules.is_empty());
    }

    #[test]
    fn test_file_layer_and_rule_parsing() {
        let settings = Settings::from_layers(file(SAMPLE), no_env, &Overrides::default(), None).unwrap();
        assert_eq!(settings.collection.max_concurrency, 4);
        assert_eq!(settings.collection.task_timeout, Duration::from_secs(30));
        assert_eq!(settings.collection.probe_timeout, Duration::from_secs(3));
        assert_eq!(settings.remediation.default_timeout, Duration::from_secs(120));
        assert_eq!(settings.audit_log_path, PathBuf::from("/var/log/fleetwatch/audit.csv"));

        let rules = &settings.remediation.rules;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name.as_deref(), Some("restart-dbus"));
        assert_eq!(rules[0].trigger.metric, MetricKind::Cpu);
        assert_eq!(rules[0].trigger.comparator, Comparator::Gt);
        assert!(rules[0].use_sudo);
        assert_eq!(rules[1].timeout, Some(Duration::from_secs(600)));
        assert_eq!(
            rules[1].action,
            RemediationAction::ClearPath {
                path: "/var/tmp".into(),
                pattern: None,
                older_than_days: Some(3)
            }
        );
    }

    #[test]
    fn test_env_and_cli_layers_override_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FLEETWATCH_HOSTS_FILE", "/srv/hosts.csv"),
            ("FLEETWATCH_MAX_CONCURRENCY", "16"),
            ("FLEETWATCH_REMEDIATION_ENABLED", "false"),
        ]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let settings = Settings::from_layers(file(SAMPLE), lookup, &Overrides::default(), None).unwrap();
        assert_eq!(settings.hosts_file, PathBuf::from("/srv/hosts.csv"));
        assert_eq!(settings.collection.max_concurrency, 16);
        assert!(!settings.remediation.enabled);

        let overrides = Overrides {
            hosts_file: Some(PathBuf::from("cli.csv")),
            remediation_enabled: Some(true),
        };
        let settings = Settings::from_layers(file(SAMPLE), lookup, &overrides, None).unwrap();
        assert_eq!(settings.hosts_file, PathBuf::from("cli.csv"));
        assert!(settings.remediation.enabled);
    }

    #[test]
    fn test_validation_errors() {
        let bad = SAMPLE.replace("cpu = 85", "cpu = 185");
        assert!(matches!(
            Settings::from_layers(file(&bad), no_env, &Overrides::default(), None),
            Err(ConfigError::Validation(_))
        ));

        let bad = SAMPLE.replace("max_concurrency = 4", "max_concurrency = 0");
        assert!(Settings::from_layers(file(&bad), no_env, &Overrides::default(), None).is_err());

        let bad = SAMPLE.replace("service = \"dbus\", ", "");
        assert!(matches!(
            Settings::from_layers(file(&bad), no_env, &Overrides::default(), None),
            Err(ConfigError::Rule(_))
        ));

        let env = |key: &str| (key == "FLEETWATCH_REMEDIATION_ENABLED").then(|| "maybe".to_string());
        assert!(Settings::from_layers(file(SAMPLE), env, &Overrides::default(), None).is_err());
    }

    #[test]
    fn test_passphrase_sources() {
        use secrecy::ExposeSecret;

        let from_keyring = || Some(SecretString::new("from-keyring".into()));

        let secret = resolve_passphrase(Some("from-env".to_string()), from_keyring).unwrap();
        assert_eq!(secret.expose_secret(), "from-env");

        let secret = resolve_passphrase(None, from_keyring).unwrap();
        assert_eq!(secret.expose_secret(), "from-keyring");

        let secret = resolve_passphrase(Some(String::new()), from_keyring).unwrap();
        assert_eq!(secret.expose_secret(), "from-keyring");

        assert!(resolve_passphrase(None, || None).is_none());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            FileConfig::from_toml("[collection", "broken.toml"),
            Err(ConfigError::Parse { ref path, .. }) if path == "broken.toml"
        ));
        assert!(FileConfig::from_toml("   ", "empty.toml").is_ok());
    }
}
