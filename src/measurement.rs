//! Decoded sensor readings.

use crate::mac_address::MacAddress;

/// A reading decoded from one accepted advertisement.
///
/// Units follow what the thermostat works in:
/// - Temperature in degrees Fahrenheit
/// - Relative humidity in percent (0-100)
/// - Battery level in percent (0-100)
/// - Signal strength in dBm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    /// Address of the sensor that sent the advertisement
    pub source_id: MacAddress,
    /// Temperature in Fahrenheit
    pub temperature_f: f32,
    /// Relative humidity in percent
    pub humidity_pct: f32,
    /// Battery level in percent
    pub battery_pct: u8,
    /// Received signal strength in dBm
    pub signal_strength: i16,
}

/// A reading whose source resolved to a configured sensor name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedReading {
    pub name: String,
    pub reading: SensorReading,
}
