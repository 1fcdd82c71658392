//! Fleet file loading and collector settings.
//!
//! A fleet file is TOML with three tables:
//!
//! ```toml
//! [collector]
//! output_dir = "backups"
//! kinds = ["xml", "set", "cnf"]
//! concurrency = 5
//! deadline_secs = 900
//!
//! [credentials]
//! username = "root"
//! password = "root123"
//!
//! [devices]
//! PE0 = "10.1.1.0"
//! PE1 = { address = "10.1.1.1", port = 2222, username = "ops", password = "s3cret" }
//! ```
//!
//! Every `[collector]` key is optional. Devices keep file order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{ConfigError, InventoryError, Result};
use crate::fetch::OutputKind;
use crate::fleet::DEFAULT_CONCURRENCY;
use crate::inventory::{Credentials, DeviceDescriptor, Inventory};
use crate::platform::juniper;
use crate::task::TaskPolicy;
use crate::transport::{AuthMethod, HostKeyVerification};

/// `[collector]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorSettings {
    pub output_dir: PathBuf,
    pub kinds: Vec<OutputKind>,
    pub concurrency: usize,
    pub deadline_secs: Option<u64>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub close_timeout_secs: u64,
    pub connect_retries: u32,
    pub fetch_retries: u32,
    pub retry_backoff_ms: u64,
    pub platform: String,
    pub port: u16,
    pub host_key_verification: HostKeyVerification,
    pub known_hosts: Option<PathBuf>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        let policy = TaskPolicy::default();
        Self {
            output_dir: PathBuf::from("."),
            kinds: OutputKind::ALL.to_vec(),
            concurrency: DEFAULT_CONCURRENCY,
            deadline_secs: None,
            connect_timeout_secs: policy.connect_timeout.as_secs(),
            request_timeout_secs: policy.request_timeout.as_secs(),
            write_timeout_secs: policy.write_timeout.as_secs(),
            close_timeout_secs: policy.close_timeout.as_secs(),
            connect_retries: policy.connect_retries,
            fetch_retries: policy.fetch_retries,
            retry_backoff_ms: policy.retry_backoff.as_millis() as u64,
            platform: juniper::PLATFORM_NAME.to_string(),
            port: 22,
            host_key_verification: HostKeyVerification::default(),
            known_hosts: None,
        }
    }
}

impl CollectorSettings {
    /// Reject values the orchestrator cannot work with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1");
        }
        if self.kinds.is_empty() {
            return invalid("at least one output kind is required");
        }
        if self.deadline_secs == Some(0) {
            return invalid("deadline_secs must be positive");
        }
        if [
            self.connect_timeout_secs,
            self.request_timeout_secs,
            self.write_timeout_secs,
            self.close_timeout_secs,
        ]
        .contains(&0)
        {
            return invalid("step timeouts must be positive");
        }
        Ok(())
    }

    /// Per-device timeouts and retries.
    pub fn task_policy(&self) -> TaskPolicy {
        TaskPolicy {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
            connect_retries: self.connect_retries,
            fetch_retries: self.fetch_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Overall run deadline, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// `[credentials]` table, or the credential keys of a device entry.
#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsEntry {
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<String>,
}

impl CredentialsEntry {
    fn has_secret(&self) -> bool {
        self.password.is_some() || self.key_file.is_some()
    }

    /// Layer device-level keys over the fleet defaults.
    fn overlay(&self, base: &CredentialsEntry) -> CredentialsEntry {
        let secret = if self.has_secret() { self } else { base };
        CredentialsEntry {
            username: self.username.clone().or_else(|| base.username.clone()),
            password: secret.password.clone(),
            key_file: secret.key_file.clone(),
            key_passphrase: secret.key_passphrase.clone(),
        }
    }

    fn build(self) -> Option<Credentials> {
        let username = self.username?;
        let auth = match (self.key_file, self.password) {
            (Some(path), _) => AuthMethod::PrivateKey {
                path,
                passphrase: self.key_passphrase.map(SecretString::from),
            },
            (None, Some(password)) => AuthMethod::Password(SecretString::from(password)),
            (None, None) => return None,
        };
        Some(Credentials { username, auth })
    }
}

/// Device details in the `[devices]` table.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceDetails {
    pub address: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<String>,
}

impl DeviceDetails {
    fn credentials(&self) -> CredentialsEntry {
        CredentialsEntry {
            username: self.username.clone(),
            password: self.password.clone(),
            key_file: self.key_file.clone(),
            key_passphrase: self.key_passphrase.clone(),
        }
    }
}

/// One `[devices]` entry: a bare address or a table.
#[derive(Clone, Deserialize)]
#[serde(untagged)]
pub enum DeviceEntry {
    Address(String),
    Detailed(DeviceDetails),
}

/// Parsed fleet file.
#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetFile {
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub credentials: CredentialsEntry,
    #[serde(default)]
    pub devices: IndexMap<String, DeviceEntry>,
}

impl FleetFile {
    /// Read and parse a fleet file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse fleet file text. `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> std::result::Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Build the device inventory.
    ///
    /// Devices without their own secret share one set of fleet credentials.
    pub fn inventory(&self) -> Result<Inventory> {
        let shared = self.credentials.clone().build().map(Arc::new);
        let mut inventory = Inventory::new();

        for (name, entry) in &self.devices {
            let (address, port, credentials) = match entry {
                DeviceEntry::Address(address) => (address.clone(), None, shared.clone()),
                DeviceEntry::Detailed(details) => {
                    let overrides = details.credentials();
                    let credentials = if overrides.has_secret() || overrides.username.is_some() {
                        overrides.overlay(&self.credentials).build().map(Arc::new)
                    } else {
                        shared.clone()
                    };
                    (details.address.clone(), details.port, credentials)
                }
            };

            let credentials = credentials
                .ok_or_else(|| InventoryError::MissingCredentials { name: name.clone() })?;
            let device = DeviceDescriptor::new(name.as_str(), address, credentials)
                .with_port(port.unwrap_or(self.collector.port));
            inventory.push(device)?;
        }

        Ok(inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const FLEET: &str = r#"
[collector]
output_dir = "backups"
kinds = ["xml", "cnf"]
concurrency = 8
deadline_secs = 600
host_key_verification = "disabled"

[credentials]
username = "root"
password = "root123"

[devices]
PE0 = "10.1.1.0"
PE1 = { address = "10.1.1.1", port = 2222 }
P0 = { address = "10.1.0.0", username = "ops", password = "opspass" }
P1 = { address = "10.1.0.1", username = "audit" }
"#;

    fn parse(text: &str) -> FleetFile {
        FleetFile::parse(text, Path::new("fleet.toml")).unwrap()
    }

    #[test]
    fn test_collector_settings() {
        let fleet = parse(FLEET);
        let settings = &fleet.collector;
        assert_eq!(settings.output_dir, PathBuf::from("backups"));
        assert_eq!(settings.kinds, vec![OutputKind::Structured, OutputKind::RawCli]);
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.deadline(), Some(Duration::from_secs(600)));
        assert_eq!(settings.host_key_verification, HostKeyVerification::Disabled);
        assert_eq!(settings.task_policy().fetch_retries, 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_inventory_keeps_order_and_overrides() {
        let inventory = parse(FLEET).inventory().unwrap();
        let names: Vec<_> = inventory.devices().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["PE0", "PE1", "P0", "P1"]);

        let pe0 = inventory.get("PE0").unwrap();
        let pe1 = inventory.get("PE1").unwrap();
        assert_eq!(pe0.port, 22);
        assert_eq!(pe1.port, 2222);
        assert!(Arc::ptr_eq(&pe0.credentials, &pe1.credentials));

        let p0 = inventory.get("P0").unwrap();
        assert_eq!(p0.credentials.username, "ops");
        match &p0.credentials.auth {
            AuthMethod::Password(p) => assert_eq!(p.expose_secret(), "opspass"),
            other => panic!("unexpected auth {other:?}"),
        }

        // Username override keeps the fleet password
        let p1 = inventory.get("P1").unwrap();
        assert_eq!(p1.credentials.username, "audit");
        match &p1.credentials.auth {
            AuthMethod::Password(p) => assert_eq!(p.expose_secret(), "root123"),
            other => panic!("unexpected auth {other:?}"),
        }
    }

    #[test]
    fn test_defaults_apply_without_collector_table() {
        let fleet = parse("[devices]\nPE0 = \"10.1.1.0\"\n");
        assert_eq!(fleet.collector.kinds, OutputKind::ALL.to_vec());
        assert_eq!(fleet.collector.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(fleet.collector.platform, "juniper_junos");
    }

    #[test]
    fn test_missing_credentials_is_an_error() {
        let fleet = parse("[devices]\nPE0 = \"10.1.1.0\"\n");
        assert!(matches!(
            fleet.inventory(),
            Err(crate::Error::Inventory(InventoryError::MissingCredentials { .. }))
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(FleetFile::parse("[collector]\nkinds = [\"json\"]\n", Path::new("f")).is_err());
        assert!(FleetFile::parse("[collector]\nbogus = 1\n", Path::new("f")).is_err());

        let fleet = parse("[collector]\nconcurrency = 0\n");
        assert!(fleet.collector.validate().is_err());
    }
}
