//! Measurement sink: counters and gauges reported by the pipeline.
//!
//! The pipeline and the control loop only see the [`MeasurementSink`] trait.
//! [`PrometheusSink`] backs it with a private Prometheus registry that the
//! exporter renders on `/metrics`.

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Counters the pipeline increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Every advertisement, labelled by classification
    AdvertisementReceived,
    /// Every accepted advertisement, labelled by source address and outcome
    SensorReceived,
}

impl Counter {
    pub const ALL: [Counter; 2] = [Counter::AdvertisementReceived, Counter::SensorReceived];

    pub const fn name(self) -> &'static str {
        match self {
            Counter::AdvertisementReceived => "advertisement_received",
            Counter::SensorReceived => "sensor_received",
        }
    }

    const fn help(self) -> &'static str {
        match self {
            Counter::AdvertisementReceived => {
                "The total number of bluetooth advertisements received by classification"
            }
            Counter::SensorReceived => {
                "The total number of accepted sensor advertisements by source and outcome"
            }
        }
    }

    pub const fn label_names(self) -> &'static [&'static str] {
        match self {
            Counter::AdvertisementReceived => &["classification"],
            Counter::SensorReceived => &["source_id", "outcome"],
        }
    }
}

/// Gauges holding the most recent value per sensor or outlet name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    Temperature,
    Humidity,
    Battery,
    SignalStrength,
    OutletState,
}

impl Gauge {
    pub const ALL: [Gauge; 5] = [
        Gauge::Temperature,
        Gauge::Humidity,
        Gauge::Battery,
        Gauge::SignalStrength,
        Gauge::OutletState,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Gauge::Temperature => "temperature",
            Gauge::Humidity => "humidity",
            Gauge::Battery => "battery",
            Gauge::SignalStrength => "signal_strength",
            Gauge::OutletState => "outlet_state",
        }
    }

    const fn help(self) -> &'static str {
        match self {
            Gauge::Temperature => "The most recent temperature reported (deg fahrenheit) by name",
            Gauge::Humidity => "The most recent relative humidity reported (percent) by name",
            Gauge::Battery => "The most recent battery level reported (0-100) in percent by name",
            Gauge::SignalStrength => "The most recent received signal strength (dBm) by name",
            Gauge::OutletState => "The state of the outlet (0 = off, 1 = on) by outlet name",
        }
    }
}

/// Destination for counts and gauge values.
///
/// Calls are fire-and-forget: implementations must not block and never
/// report failure to the caller.
pub trait MeasurementSink: Send + Sync {
    fn increment_counter(&self, counter: Counter, labels: &[&str]);
    fn set_gauge(&self, gauge: Gauge, labels: &[&str], value: f64);
}

/// Prometheus-backed sink with its own registry.
pub struct PrometheusSink {
    registry: Registry,
    counters: Vec<(Counter, CounterVec)>,
    gauges: Vec<(Gauge, GaugeVec)>,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let mut counters = Vec::with_capacity(Counter::ALL.len());
        for counter in Counter::ALL {
            let vec = CounterVec::new(
                Opts::new(counter.name(), counter.help()),
                counter.label_names(),
            )?;
            registry.register(Box::new(vec.clone()))?;
            counters.push((counter, vec));
        }

        let mut gauges = Vec::with_capacity(Gauge::ALL.len());
        for gauge in Gauge::ALL {
            let vec = GaugeVec::new(Opts::new(gauge.name(), gauge.help()), &["name"])?;
            registry.register(Box::new(vec.clone()))?;
            gauges.push((gauge, vec));
        }

        Ok(Self {
            registry,
            counters,
            gauges,
        })
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn counter(&self, counter: Counter) -> Option<&CounterVec> {
        self.counters
            .iter()
            .find(|(c, _)| *c == counter)
            .map(|(_, vec)| vec)
    }

    fn gauge(&self, gauge: Gauge) -> Option<&GaugeVec> {
        self.gauges
            .iter()
            .find(|(g, _)| *g == gauge)
            .map(|(_, vec)| vec)
    }
}

impl MeasurementSink for PrometheusSink {
    fn increment_counter(&self, counter: Counter, labels: &[&str]) {
        match self
            .counter(counter)
            .map(|vec| vec.get_metric_with_label_values(labels))
        {
            Some(Ok(metric)) => metric.inc(),
            Some(Err(e)) => warn!(counter = counter.name(), error = %e, "dropping counter update"),
            None => {}
        }
    }

    fn set_gauge(&self, gauge: Gauge, labels: &[&str], value: f64) {
        match self
            .gauge(gauge)
            .map(|vec| vec.get_metric_with_label_values(labels))
        {
            Some(Ok(metric)) => metric.set(value),
            Some(Err(e)) => warn!(gauge = gauge.name(), error = %e, "dropping gauge update"),
            None => {}
        }
    }
}
