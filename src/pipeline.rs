//! Per-advertisement processing: classify, decode, resolve, report, control.
//!
//! [`Pipeline::handle`] runs to completion for each event and never blocks;
//! outlet I/O is handed off to the [`ControlLoop`] workers.

use crate::advertisement::{Advertisement, RSSI_UNAVAILABLE};
use crate::control::ControlLoop;
use crate::measurement::NamedReading;
use crate::metrics::{Counter, Gauge, MeasurementSink};
use crate::registry::DeviceRegistry;
use crate::sensor::{Classification, FlagPolicy, classify};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not from a supported sensor model
    Rejected(Classification),
    /// Accepted but too short to decode
    Malformed,
    /// Decoded, but the sensor is not in the registry
    UnknownDevice,
    /// Reported, with this many control evaluations queued
    Processed { queued: usize },
}

pub struct Pipeline {
    registry: DeviceRegistry,
    flag_policy: FlagPolicy,
    sink: Arc<dyn MeasurementSink>,
    control: ControlLoop,
}

impl Pipeline {
    pub fn new(
        registry: DeviceRegistry,
        flag_policy: FlagPolicy,
        sink: Arc<dyn MeasurementSink>,
        control: ControlLoop,
    ) -> Self {
        Self {
            registry,
            flag_policy,
            sink,
            control,
        }
    }

    pub fn handle(&mut self, advertisement: &Advertisement) -> Outcome {
        let source = advertisement.source_id.to_string();

        let classification = classify(
            advertisement.payload.len(),
            advertisement.flags,
            self.flag_policy,
        );
        self.sink.increment_counter(
            Counter::AdvertisementReceived,
            &[classification.as_label()],
        );
        let Classification::Accepted(model) = classification else {
            debug!(
                source = %source,
                len = advertisement.payload.len(),
                flags = ?advertisement.flags,
                "{}",
                classification.as_label()
            );
            return Outcome::Rejected(classification);
        };

        let reading = match model.decode(advertisement) {
            Ok(reading) => reading,
            Err(e) => {
                self.sink.increment_counter(
                    Counter::SensorReceived,
                    &[source.as_str(), "malformed"],
                );
                warn!(source = %source, "dropping advertisement: {e}");
                return Outcome::Malformed;
            }
        };

        let Some(name) = self.registry.resolve(&advertisement.source_id) else {
            self.sink.increment_counter(
                Counter::SensorReceived,
                &[source.as_str(), "unknown-device"],
            );
            debug!(source = %source, "device not listed in configuration, skipping");
            return Outcome::UnknownDevice;
        };
        let reading = NamedReading {
            name: name.to_string(),
            reading,
        };

        self.sink
            .increment_counter(Counter::SensorReceived, &[source.as_str(), "processed"]);
        self.report(&reading);

        debug!(
            sensor = %reading.name,
            temperature_f = reading.reading.temperature_f,
            humidity_pct = reading.reading.humidity_pct,
            battery_pct = reading.reading.battery_pct,
            rssi = reading.reading.signal_strength,
            "received {model:?} advertisement"
        );

        Outcome::Processed {
            queued: self.control.on_reading(&reading),
        }
    }

    fn report(&self, named: &NamedReading) {
        let labels = [named.name.as_str()];
        let reading = &named.reading;
        self.sink
            .set_gauge(Gauge::Temperature, &labels, f64::from(reading.temperature_f));
        self.sink
            .set_gauge(Gauge::Humidity, &labels, f64::from(reading.humidity_pct));
        self.sink
            .set_gauge(Gauge::Battery, &labels, f64::from(reading.battery_pct));
        if reading.signal_strength != RSSI_UNAVAILABLE {
            self.sink.set_gauge(
                Gauge::SignalStrength,
                &labels,
                f64::from(reading.signal_strength),
            );
        }
    }

    /// Stop accepting work and wait for queued outlet evaluations.
    pub async fn shutdown(self) {
        self.control.shutdown().await;
    }
}
