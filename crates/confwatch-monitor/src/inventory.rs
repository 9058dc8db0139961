//! Device inventory loading.
//!
//! The inventory is a YAML list of devices, read once at startup. Entries
//! are fully typed; a missing field fails loudly at load time instead of
//! being probed for at use time.

use std::collections::HashSet;
use std::path::Path;

use confwatch_core::Device;

use crate::error::{MonitorError, Result};

/// Load and validate the device inventory from a YAML file.
pub fn load_inventory(path: &Path) -> Result<Vec<Device>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| MonitorError::Inventory(format!("{}: {e}", path.display())))?;
    let devices: Vec<Device> = serde_yaml::from_str(&text)
        .map_err(|e| MonitorError::Inventory(format!("{}: {e}", path.display())))?;
    validate(&devices)?;

    tracing::info!(path = %path.display(), count = devices.len(), "Inventory loaded");
    Ok(devices)
}

fn validate(devices: &[Device]) -> Result<()> {
    if devices.is_empty() {
        return Err(MonitorError::Inventory(
            "inventory contains no devices".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for device in devices {
        if device.name.as_str().is_empty() {
            return Err(MonitorError::Inventory(
                "device with empty name".to_string(),
            ));
        }
        if device.address.is_empty() {
            return Err(MonitorError::Inventory(format!(
                "device {} has no address",
                device.name
            )));
        }
        if !seen.insert(device.name.clone()) {
            return Err(MonitorError::Inventory(format!(
                "duplicate device name: {}",
                device.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const INVENTORY: &str = r#"
- name: pynet-rtr1
  address: 198.51.100.11
  credentials:
    security_name: monitor
    auth_passphrase: authsecret
    priv_passphrase: privsecret
- name: pynet-rtr2
  address: 198.51.100.12
  port: 10161
  transport: v2c
  credentials:
    security_name: public
    auth_passphrase: ""
"#;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_two_device_inventory() {
        let file = write_temp(INVENTORY);
        let devices = load_inventory(file.path()).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name.as_str(), "pynet-rtr1");
        assert_eq!(devices[1].port, 10161);
    }

    #[test]
    fn rejects_duplicate_names() {
        let dup = INVENTORY.replace("pynet-rtr2", "pynet-rtr1");
        let file = write_temp(&dup);
        assert!(matches!(
            load_inventory(file.path()),
            Err(MonitorError::Inventory(_))
        ));
    }

    #[test]
    fn rejects_empty_inventory() {
        let file = write_temp("[]");
        assert!(matches!(
            load_inventory(file.path()),
            Err(MonitorError::Inventory(_))
        ));
    }

    #[test]
    fn missing_file_is_an_inventory_error() {
        let result = load_inventory(Path::new("/nonexistent/devices.yaml"));
        assert!(matches!(result, Err(MonitorError::Inventory(_))));
    }
}
