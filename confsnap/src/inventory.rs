//! Device inventory.

use std::collections::HashSet;
use std::sync::Arc;

use secrecy::SecretString;

use crate::error::InventoryError;
use crate::transport::AuthMethod;

/// Login credentials, threaded opaquely to the session layer.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub auth: AuthMethod,
}

impl Credentials {
    /// Username/password credentials.
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            auth: AuthMethod::Password(SecretString::from(password.into())),
        }
    }
}

/// Static identity and address of one managed device.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Name used in logs, the run report and artifact file names.
    pub name: String,

    /// Hostname or IP address.
    pub address: String,

    /// Management port.
    pub port: u16,

    pub credentials: Arc<Credentials>,
}

impl DeviceDescriptor {
    /// Create a descriptor on the default SSH port.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        credentials: Arc<Credentials>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: 22,
            credentials,
        }
    }

    /// Override the management port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Check that a device name can be embedded in an artifact file name.
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name.starts_with('.') {
        return Err("name starts with '.'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err("only ASCII letters, digits, '.', '_' and '-' are allowed");
    }
    Ok(())
}

/// Ordered collection of devices to collect from.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    devices: Vec<DeviceDescriptor>,
}

impl Inventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device, rejecting unusable or duplicate names.
    ///
    /// Names that differ only in case count as duplicates: their artifact
    /// and temporary files would collide on case-insensitive filesystems.
    pub fn push(&mut self, device: DeviceDescriptor) -> Result<(), InventoryError> {
        validate_name(&device.name).map_err(|reason| InventoryError::InvalidName {
            name: device.name.clone(),
            reason,
        })?;
        if device.address.trim().is_empty() {
            return Err(InventoryError::EmptyAddress { name: device.name });
        }
        if self
            .devices
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(&device.name))
        {
            return Err(InventoryError::DuplicateDevice { name: device.name });
        }
        self.devices.push(device);
        Ok(())
    }

    /// Re-check every invariant `push` enforces.
    ///
    /// Needed for inventories assembled through `FromIterator`.
    pub fn validate(&self) -> Result<(), InventoryError> {
        let mut seen = HashSet::with_capacity(self.devices.len());
        for device in &self.devices {
            validate_name(&device.name).map_err(|reason| InventoryError::InvalidName {
                name: device.name.clone(),
                reason,
            })?;
            if device.address.trim().is_empty() {
                return Err(InventoryError::EmptyAddress {
                    name: device.name.clone(),
                });
            }
            if !seen.insert(device.name.to_ascii_lowercase()) {
                return Err(InventoryError::DuplicateDevice {
                    name: device.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Look up a device by name.
    pub fn get(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Devices in inventory order.
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl FromIterator<DeviceDescriptor> for Inventory {
    fn from_iter<I: IntoIterator<Item = DeviceDescriptor>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Arc<Credentials> {
        Arc::new(Credentials::password("root", "root123"))
    }

    #[test]
    fn test_push_rejects_duplicates() {
        let mut inventory = Inventory::new();
        inventory
            .push(DeviceDescriptor::new("PE0", "10.1.1.0", creds()))
            .unwrap();
        let err = inventory
            .push(DeviceDescriptor::new("PE0", "10.1.1.9", creds()))
            .unwrap_err();
        assert!(matches!(err, InventoryError::DuplicateDevice { .. }));
        assert_eq!(inventory.len(), 1);
    }

    #[test]
    fn test_names_must_be_file_safe() {
        assert!(validate_name("PE0").is_ok());
        assert!(validate_name("core-rtr_01.lab").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("pe 0").is_err());
    }

    #[test]
    fn test_validate_catches_collected_duplicates() {
        let inventory: Inventory = ["P0", "P1", "P0"]
            .into_iter()
            .map(|name| DeviceDescriptor::new(name, "10.1.0.1", creds()))
            .collect();
        assert!(matches!(
            inventory.validate(),
            Err(InventoryError::DuplicateDevice { name }) if name == "P0"
        ));
    }

    #[test]
    fn test_names_differing_only_in_case_are_duplicates() {
        let mut inventory = Inventory::new();
        inventory
            .push(DeviceDescriptor::new("PE0", "10.1.1.0", creds()))
            .unwrap();
        assert!(matches!(
            inventory.push(DeviceDescriptor::new("pe0", "10.1.1.1", creds())),
            Err(InventoryError::DuplicateDevice { name }) if name == "pe0"
        ));

        let collected: Inventory = ["PE0", "pe0"]
            .into_iter()
            .map(|name| DeviceDescriptor::new(name, "10.1.1.0", creds()))
            .collect();
        assert!(matches!(
            collected.validate(),
            Err(InventoryError::DuplicateDevice { .. })
        ));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let rendered = format!("{:?}", Credentials::password("root", "root123"));
        assert!(!rendered.contains("root123"));
    }
}
