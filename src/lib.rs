//! `govee-thermostat` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The core “business logic” lives in [`crate::app`] where it
//! can be tested deterministically with an injected scanner, outlets and sink.

pub mod advertisement;
pub mod app;
pub mod config;
pub mod control;
pub mod exporter;
pub mod mac_address;
pub mod measurement;
pub mod metrics;
pub mod outlet;
pub mod pipeline;
pub mod registry;
pub mod scanner;
pub mod sensor;
pub mod throttle;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::Advertisement;
pub use config::{ConfigError, Configuration, TemperatureObjective};
pub use control::{Command, ControlLoop, Thermostat};
pub use mac_address::MacAddress;
pub use measurement::{NamedReading, SensorReading};
pub use metrics::{Counter, Gauge, MeasurementSink, PrometheusSink};
pub use outlet::{Outlet, OutletError, OutletSet};
pub use pipeline::{Outcome, Pipeline};
pub use registry::{Alias, DeviceRegistry, parse_alias};
pub use scanner::{Backend, ScanError};
pub use sensor::{Classification, DecodeError, FlagPolicy, SensorModel, classify};
pub use throttle::{Throttle, parse_duration};
