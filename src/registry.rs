//! Device registry: maps sensor addresses to human-readable names.
//!
//! The configuration file provides the base map; `--alias` flags on the
//! command line are layered on top of it. Readings from addresses that are not
//! in the registry are dropped by the pipeline.

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// Address-to-name mappings.
pub type DeviceMap = BTreeMap<MacAddress, String>;

/// A parsed alias mapping a sensor address to a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub address: MacAddress,
    pub name: String,
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// # Example
/// ```
/// use govee_thermostat::registry::parse_alias;
///
/// let alias = parse_alias("A4:C1:38:00:11:22=Bedroom").unwrap();
/// assert_eq!(alias.address.to_string(), "A4:C1:38:00:11:22");
/// assert_eq!(alias.name, "Bedroom");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format MAC=NAME".to_string())?;
    let address = address.parse().map_err(|e| format!("invalid alias: {e}"))?;
    if name.is_empty() {
        return Err("invalid alias: name must not be empty".into());
    }
    Ok(Alias {
        address,
        name: name.into(),
    })
}

/// Lookup table from sensor address to configured name.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: DeviceMap,
}

impl DeviceRegistry {
    pub fn new(devices: DeviceMap) -> Self {
        Self { devices }
    }

    /// Layer command-line aliases over the configured names. Later entries win.
    pub fn with_aliases(mut self, aliases: &[Alias]) -> Self {
        self.devices.extend(
            aliases
                .iter()
                .map(|alias| (alias.address, alias.name.clone())),
        );
        self
    }

    /// Exact-match lookup of a sensor's name.
    pub fn resolve(&self, source_id: &MacAddress) -> Option<&str> {
        self.devices.get(source_id).map(String::as_str)
    }

    /// Whether some registered sensor carries `name`.
    pub fn has_name(&self, name: &str) -> bool {
        self.devices.values().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
