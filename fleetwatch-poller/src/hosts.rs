//! Host registry and CSV host-list loading
//!
//! The host list is a CSV file with the columns `Server, Username, KeyPath`
//! and an optional `Port` (default 22). Header names are matched
//! case-insensitively. The registry is immutable once loaded.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Connection identity of a monitored machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub address: String,
    pub username: String,
    pub key_path: PathBuf,
    pub port: u16,
}

impl HostDescriptor {
    pub fn new(address: impl Into<String>, username: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            key_path: key_path.into(),
            port: DEFAULT_SSH_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Identifier carried by samples, alerts and audit records
    pub fn id(&self) -> &str {
        &self.address
    }
}

#[derive(Debug, Error)]
pub enum HostListError {
    #[error("failed to read host list {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed host list: {0}")]
    Csv(#[from] csv::Error),
    #[error("host list is missing the required column '{0}'")]
    MissingColumn(&'static str),
    #[error("host list line {line}: {message}")]
    InvalidRow { line: u64, message: String },
}

#[derive(Debug, Deserialize)]
struct HostRow {
    #[serde(rename = "Server")]
    server: String,
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "KeyPath")]
    key_path: String,
    #[serde(rename = "Port", default)]
    port: Option<u32>,
}

const COLUMNS: [&str; 4] = ["Server", "Username", "KeyPath", "Port"];

/// In-memory list of host descriptors
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: Vec<HostDescriptor>,
}

impl HostRegistry {
    pub fn new(hosts: Vec<HostDescriptor>) -> Self {
        Self { hosts }
    }

    /// Load a registry from a CSV file on disk
    pub fn from_csv_path(path: &Path) -> Result<Self, HostListError> {
        let file = std::fs::File::open(path).map_err(|source| HostListError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, HostListError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let normalized: csv::StringRecord = rdr
            .headers()?
            .iter()
            .map(|h| {
                COLUMNS
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(h))
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| h.to_string())
            })
            .collect();
        for required in ["Server", "Username", "KeyPath"] {
            if !normalized.iter().any(|h| h == required) {
                return Err(HostListError::MissingColumn(required));
            }
        }
        rdr.set_headers(normalized);

        let mut hosts = Vec::new();
        let mut seen = HashSet::new();
        for result in rdr.deserialize::<HostRow>() {
            let row = result?;
            let line = hosts.len() as u64 + 2;
            let host = Self::validate_row(row, line)?;
            if !seen.insert(host.address.clone()) {
                return Err(HostListError::InvalidRow {
                    line,
                    message: format!("duplicate server '{}'", host.address),
                });
            }
            hosts.push(host);
        }

        debug!("Loaded {} hosts from host list", hosts.len());
        Ok(Self { hosts })
    }

    fn validate_row(row: HostRow, line: u64) -> Result<HostDescriptor, HostListError> {
        let invalid = |message: String| HostListError::InvalidRow { line, message };

        if row.server.is_empty() {
            return Err(invalid("Server must not be empty".to_string()));
        }
        if row.username.is_empty() {
            return Err(invalid(format!("Username must not be empty for '{}'", row.server)));
        }
        if row.key_path.is_empty() {
            return Err(invalid(format!("KeyPath is required for '{}'", row.server)));
        }
        let port = match row.port {
            None => DEFAULT_SSH_PORT,
            Some(p) if (1..=65535).contains(&p) => p as u16,
            Some(p) => return Err(invalid(format!("Port {p} is outside 1-65535"))),
        };

        Ok(HostDescriptor {
            address: row.server,
            username: row.username,
            key_path: PathBuf::from(row.key_path),
            port,
        })
    }

    pub fn get(&self, host_id: &str) -> Option<&HostDescriptor> {
        self.hosts.iter().find(|h| h.id() == host_id)
    }

    pub fn hosts(&self) -> &[HostDescriptor] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_defaults_to_22() {
        let csv = "Server,Username,KeyPath,Port\nweb-1,ops,/keys/web,\ndb-1,ops,/keys/db,2222\n";
        let registry = HostRegistry::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("web-1").unwrap().port, 22);
        assert_eq!(registry.get("db-1").unwrap().port, 2222);
    }

    #[test]
    fn test_port_column_is_optional_and_headers_case_insensitive() {
        let csv = "server,USERNAME,keypath\nweb-1,ops,/keys/web\n";
        let registry = HostRegistry::from_csv_reader(csv.as_bytes()).unwrap();
        let host = registry.get("web-1").unwrap();
        assert_eq!(host.username, "ops");
        assert_eq!(host.key_path, PathBuf::from("/keys/web"));
        assert_eq!(host.port, DEFAULT_SSH_PORT);
    }

    #[test]
    fn test_blank_key_path_is_rejected() {
        let csv = "Server,Username,KeyPath\nweb-1,ops,\n";
        let err = HostRegistry::from_csv_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, HostListError::InvalidRow { line: 2, .. }));
    }

    #[test]
    fn test_out_of_range_port_is_rejected() {
        let csv = "Server,Username,KeyPath,Port\nweb-1,ops,/k,0\n";
        assert!(HostRegistry::from_csv_reader(csv.as_bytes()).is_err());
        let csv = "Server,Username,KeyPath,Port\nweb-1,ops,/k,70000\n";
        assert!(HostRegistry::from_csv_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_column_and_duplicates() {
        let csv = "Server,Username\nweb-1,ops\n";
        assert!(matches!(
            HostRegistry::from_csv_reader(csv.as_bytes()),
            Err(HostListError::MissingColumn("KeyPath"))
        ));

        let csv = "Server,Username,KeyPath\nweb-1,ops,/k\nweb-1,ops,/k\n";
        assert!(HostRegistry::from_csv_reader(csv.as_bytes()).is_err());
    }
}
