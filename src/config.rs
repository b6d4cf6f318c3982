//! Device configuration file (`devices.yml`).
//!
//! ```yaml
//! IDToNames:
//!   "A4:C1:38:00:11:22": bedroom
//! TemperatureObjectives:
//!   - TempSensorName: bedroom
//!     OutletName: heater
//!     HeatOnBelowF: 65
//!     HeatOffAboveF: 72
//! ```

use crate::registry::{DeviceMap, DeviceRegistry};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One hysteresis band binding a sensor to the outlet that heats its room.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemperatureObjective {
    #[serde(rename = "TempSensorName")]
    pub sensor_name: String,
    #[serde(rename = "OutletName")]
    pub outlet_name: String,
    /// Outlet is switched on when the temperature drops below this value
    #[serde(rename = "HeatOnBelowF")]
    pub heat_on_below_f: f32,
    /// Outlet is switched off when the temperature rises above this value
    #[serde(rename = "HeatOffAboveF")]
    pub heat_off_above_f: f32,
}

/// Parsed device configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(rename = "IDToNames", alias = "IdToNames", default)]
    pub id_to_name: DeviceMap,
    #[serde(rename = "TemperatureObjectives", default)]
    pub objectives: Vec<TemperatureObjective>,
}

/// Errors that prevent the configuration from being used.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("objective for outlet {outlet:?} names sensor {sensor:?}, which is not in IDToNames")]
    UnknownSensor { sensor: String, outlet: String },
    #[error("objective for sensor {sensor:?} names outlet {outlet:?}, which was not discovered")]
    UnknownOutlet { sensor: String, outlet: String },
    #[error(
        "objective for sensor {sensor:?} has HeatOnBelowF {on} not below HeatOffAboveF {off}"
    )]
    DegenerateBand { sensor: String, on: f32, off: f32 },
}

impl Configuration {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Check that every objective references a registered sensor and a known
    /// outlet, and that its band is not empty.
    pub fn validate<'a>(
        &self,
        registry: &DeviceRegistry,
        outlets: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        let outlets: BTreeSet<&str> = outlets.into_iter().collect();

        for objective in &self.objectives {
            if !registry.has_name(&objective.sensor_name) {
                return Err(ConfigError::UnknownSensor {
                    sensor: objective.sensor_name.clone(),
                    outlet: objective.outlet_name.clone(),
                });
            }
            if !outlets.contains(objective.outlet_name.as_str()) {
                return Err(ConfigError::UnknownOutlet {
                    sensor: objective.sensor_name.clone(),
                    outlet: objective.outlet_name.clone(),
                });
            }
            // NaN bounds fail this comparison too.
            if !(objective.heat_on_below_f < objective.heat_off_above_f) {
                return Err(ConfigError::DegenerateBand {
                    sensor: objective.sensor_name.clone(),
                    on: objective.heat_on_below_f,
                    off: objective.heat_off_above_f,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac_address::MacAddress;

    const DEVICES_YML: &str = r#"
IDToNames:
  "a4:c1:38:00:11:22": bedroom
  "A4:C1:38:00:11:33": garage
TemperatureObjectives:
  - TempSensorName: bedroom
    OutletName: heater
    HeatOnBelowF: 65
    HeatOffAboveF: 72.5
"#;

    fn registry(config: &Configuration) -> DeviceRegistry {
        DeviceRegistry::new(config.id_to_name.clone())
    }

    #[test]
    fn parses_device_file() {
        let config = Configuration::from_yaml(DEVICES_YML).unwrap();

        let bedroom: MacAddress = "A4:C1:38:00:11:22".parse().unwrap();
        assert_eq!(config.id_to_name.get(&bedroom).map(String::as_str), Some("bedroom"));
        assert_eq!(config.id_to_name.len(), 2);
        assert_eq!(
            config.objectives,
            vec![TemperatureObjective {
                sensor_name: "bedroom".into(),
                outlet_name: "heater".into(),
                heat_on_below_f: 65.0,
                heat_off_above_f: 72.5,
            }]
        );
    }

    #[test]
    fn accepts_legacy_key_spelling() {
        let config = Configuration::from_yaml("IdToNames:\n  \"A4:C1:38:00:11:22\": den\n").unwrap();
        assert_eq!(config.id_to_name.len(), 1);
        assert!(config.objectives.is_empty());
    }

    #[test]
    fn rejects_invalid_device_id() {
        let err = Configuration::from_yaml("IDToNames:\n  nope: den\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validate_accepts_resolved_references() {
        let config = Configuration::from_yaml(DEVICES_YML).unwrap();
        config.validate(&registry(&config), ["heater", "lamp"]).unwrap();
    }

    #[test]
    fn validate_rejects_undiscovered_outlet() {
        let config = Configuration::from_yaml(DEVICES_YML).unwrap();
        let err = config.validate(&registry(&config), ["lamp"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOutlet { ref outlet, .. } if outlet == "heater"));
    }

    #[test]
    fn validate_rejects_unknown_sensor() {
        let mut config = Configuration::from_yaml(DEVICES_YML).unwrap();
        config.objectives[0].sensor_name = "attic".into();
        let err = config.validate(&registry(&config), ["heater"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSensor { ref sensor, .. } if sensor == "attic"));
    }

    #[test]
    fn validate_rejects_empty_band() {
        let mut config = Configuration::from_yaml(DEVICES_YML).unwrap();
        config.objectives[0].heat_on_below_f = 72.5;
        let err = config.validate(&registry(&config), ["heater"]).unwrap_err();
        assert!(matches!(err, ConfigError::DegenerateBand { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Configuration::load(Path::new("/nonexistent/devices.yml")).unwrap_err();
        assert!(err.to_string().starts_with("failed to read /nonexistent/devices.yml"));
    }
}
