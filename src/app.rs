//! Core application runner for `govee-thermostat`.
//!
//! Startup (configuration, outlet discovery, metrics endpoint) and the event
//! loop live here, decoupled from CLI parsing and process exit codes so the
//! loop can be driven deterministically with an injected scanner and outlets.

use crate::advertisement::Advertisement;
use crate::config::{ConfigError, Configuration};
use crate::control::{ControlLoop, Thermostat};
use crate::exporter;
use crate::metrics::{MeasurementSink, PrometheusSink};
use crate::outlet::kasa::{self, KasaOutlet, Subnet};
use crate::outlet::{Outlet, OutletError, OutletSet, StaticOutlet};
use crate::pipeline::Pipeline;
use crate::registry::{Alias, DeviceRegistry};
use crate::scanner::{Backend, ScanError};
use crate::sensor::FlagPolicy;
use clap::Parser;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Command-line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Device configuration file (IDToNames and TemperatureObjectives)
    #[arg(long, default_value = "configs/devices.yml")]
    pub config: PathBuf,

    /// Additional sensor name, overriding the configuration file.
    /// Format: --alias A4:C1:38:00:11:22=Bedroom
    #[arg(long = "alias", value_parser = crate::registry::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Verbose output, log every rejected advertisement and decision
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Reject advertisements whose backend does not report AD flags
    /// (the bluer backend never does)
    #[arg(long)]
    pub strict_flags: bool,

    /// Subnet swept for Kasa outlets at startup
    #[arg(long, default_value = "192.168.10.0/24")]
    pub outlet_subnet: Subnet,

    /// Outlet at a fixed address; disables discovery when given.
    /// Format: --outlet heater=192.168.10.42
    #[arg(long = "outlet", value_parser = crate::outlet::parse_static_outlet, value_name = "OUTLET")]
    pub outlets: Vec<StaticOutlet>,

    /// Timeout for each outlet operation and discovery probe.
    /// Accepts duration with suffix: 500ms, 1s, 1m.
    #[arg(long, default_value = "1s", value_parser = crate::throttle::parse_duration)]
    pub outlet_timeout: Duration,

    /// Evaluate each sensor's objectives at most once per interval
    #[arg(long, value_parser = crate::throttle::parse_duration)]
    pub control_interval: Option<Duration>,

    /// Address of the Prometheus metrics endpoint
    #[arg(long, default_value = "0.0.0.0:2112")]
    pub metrics_addr: SocketAddr,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

impl Options {
    fn flag_policy(&self) -> FlagPolicy {
        if self.strict_flags {
            FlagPolicy::Strict
        } else {
            FlagPolicy::Lenient
        }
    }
}

/// Errors that stop the application. All of them occur before or while
/// setting up event processing.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("outlet {name:?}: {source}")]
    Outlet {
        name: String,
        #[source]
        source: OutletError,
    },
    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Everything the event loop needs beyond the command line.
pub struct Startup {
    pub config: Configuration,
    pub outlets: OutletSet,
    pub sink: Arc<dyn MeasurementSink>,
}

/// Validate the configuration against the outlets, then process
/// advertisements until the scanner's channel closes.
///
/// Per-event failures are logged and counted; only startup problems are
/// returned as errors.
pub async fn run_with(
    options: &Options,
    startup: Startup,
    scanner: &dyn Scanner,
) -> Result<(), RunError> {
    let Startup {
        config,
        outlets,
        sink,
    } = startup;

    let registry = DeviceRegistry::new(config.id_to_name.clone()).with_aliases(&options.aliases);
    config.validate(&registry, outlets.keys().map(String::as_str))?;
    info!(
        sensors = registry.len(),
        objectives = config.objectives.len(),
        outlets = outlets.len(),
        "configuration loaded"
    );

    let control = ControlLoop::spawn(
        config.objectives,
        &outlets,
        Thermostat::new(options.outlet_timeout),
        Arc::clone(&sink),
        options.control_interval,
    );
    let mut pipeline = Pipeline::new(registry, options.flag_policy(), sink, control);

    let mut advertisements = scanner.start_scan(options.backend).await?;
    while let Some(advertisement) = advertisements.recv().await {
        pipeline.handle(&advertisement);
    }

    warn!("advertisement stream ended");
    pipeline.shutdown().await;
    Ok(())
}

/// Find the outlets to control: the ones given with `--outlet`, or
/// otherwise every Kasa outlet answering in `--outlet-subnet`.
pub async fn discover_outlets(options: &Options) -> Result<OutletSet, RunError> {
    let mut outlets = OutletSet::new();

    if options.outlets.is_empty() {
        info!(subnet = %options.outlet_subnet, "discovering smart outlets");
        for outlet in kasa::discover(options.outlet_subnet, options.outlet_timeout).await {
            info!(name = outlet.name(), addr = %outlet.addr(), "discovered outlet");
            insert_outlet(&mut outlets, outlet);
        }
    } else {
        for declared in &options.outlets {
            let outlet = KasaOutlet::from_static(declared, options.outlet_timeout)
                .await
                .map_err(|source| RunError::Outlet {
                    name: declared.name.clone(),
                    source,
                })?;
            insert_outlet(&mut outlets, outlet);
        }
    }

    Ok(outlets)
}

fn insert_outlet(outlets: &mut OutletSet, outlet: KasaOutlet) {
    let name = outlet.name().to_string();
    if outlets.insert(name.clone(), Arc::new(outlet)).is_some() {
        warn!(name = %name, "two outlets share a name, keeping the last one");
    }
}

/// Full startup followed by the event loop.
pub async fn run(options: Options) -> Result<(), RunError> {
    info!(path = %options.config.display(), "reading configuration");
    let config = Configuration::load(&options.config)?;

    let outlets = discover_outlets(&options).await?;

    let prometheus = Arc::new(PrometheusSink::new()?);
    let listener = exporter::bind(options.metrics_addr).await?;
    let exporter_sink = Arc::clone(&prometheus);
    tokio::spawn(async move {
        if let Err(e) = exporter::serve(listener, exporter_sink).await {
            error!("metrics endpoint stopped: {e}");
        }
    });

    let startup = Startup {
        config,
        outlets,
        sink: prometheus,
    };
    run_with(&options, startup, &RealScanner).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Counter, Gauge};
    use crate::test_utils::{
        FakeOutlet, OutletCall, RecordingSink, SinkEvent, TEST_MAC, h5074_advertisement,
    };
    use std::sync::Mutex;

    struct FakeScanner {
        advertisements: Mutex<Vec<Advertisement>>,
    }

    impl FakeScanner {
        fn new(advertisements: Vec<Advertisement>) -> Self {
            Self {
                advertisements: Mutex::new(advertisements),
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
        ) -> Pin<
            Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + '_>,
        > {
            let advertisements = self.advertisements.lock().unwrap().clone();
            Box::pin(async move {
                let (tx, rx) = mpsc::channel(advertisements.len().max(1));
                tokio::spawn(async move {
                    for adv in advertisements {
                        let _ = tx.send(adv).await;
                    }
                });
                Ok(rx)
            })
        }
    }

    fn default_options() -> Options {
        Options::try_parse_from(["govee-thermostat"]).unwrap()
    }

    const DEVICES_YML: &str = r#"
IDToNames:
  "A4:C1:38:00:11:22": bedroom
TemperatureObjectives:
  - TempSensorName: bedroom
    OutletName: heater
    HeatOnBelowF: 65
    HeatOffAboveF: 72
"#;

    fn startup(heater: &Arc<FakeOutlet>, sink: &Arc<RecordingSink>) -> Startup {
        Startup {
            config: Configuration::from_yaml(DEVICES_YML).unwrap(),
            outlets: [("heater".to_string(), Arc::clone(heater) as Arc<dyn Outlet>)]
                .into_iter()
                .collect(),
            sink: Arc::clone(sink) as Arc<dyn MeasurementSink>,
        }
    }

    #[tokio::test]
    async fn cold_bedroom_turns_heater_on() {
        let heater = Arc::new(FakeOutlet::new("heater", false));
        let sink = Arc::new(RecordingSink::default());
        // 0x0613 = 1555 -> 15.55 C = 59.99 F
        let scanner = FakeScanner::new(vec![h5074_advertisement(
            TEST_MAC,
            [0x13, 0x06],
            [0x88, 0x13],
            0x64,
        )]);

        run_with(&default_options(), startup(&heater, &sink), &scanner)
            .await
            .unwrap();

        assert_eq!(heater.calls(), vec![OutletCall::Query, OutletCall::TurnOn]);
        assert_eq!(sink.gauge(Gauge::OutletState, "heater"), Some(0.0));

        // The gauge is published before the command is sent.
        let events = sink.events();
        let state_at = events
            .iter()
            .position(|e| matches!(e, SinkEvent::Gauge(Gauge::OutletState, _, _)))
            .unwrap();
        let temperature_at = events
            .iter()
            .position(|e| matches!(e, SinkEvent::Gauge(Gauge::Temperature, _, _)))
            .unwrap();
        assert!(temperature_at < state_at);
    }

    #[tokio::test]
    async fn foreign_and_unknown_advertisements_do_not_actuate() {
        let heater = Arc::new(FakeOutlet::new("heater", false));
        let sink = Arc::new(RecordingSink::default());
        let mut short = h5074_advertisement(TEST_MAC, [0x13, 0x06], [0x88, 0x13], 0x64);
        short.payload.truncate(8);
        let stranger = h5074_advertisement(
            "A4:C1:38:99:99:99".parse().unwrap(),
            [0x13, 0x06],
            [0x88, 0x13],
            0x64,
        );
        let scanner = FakeScanner::new(vec![short, stranger]);

        run_with(&default_options(), startup(&heater, &sink), &scanner)
            .await
            .unwrap();

        assert!(heater.calls().is_empty());
        assert_eq!(
            sink.count(Counter::AdvertisementReceived, &["rejected-invalid-length"]),
            1
        );
        assert_eq!(
            sink.count(Counter::SensorReceived, &["A4:C1:38:99:99:99", "unknown-device"]),
            1
        );
    }

    #[tokio::test]
    async fn alias_adds_sensor_name() {
        let heater = Arc::new(FakeOutlet::new("heater", true));
        let sink = Arc::new(RecordingSink::default());
        let other = "A4:C1:38:00:00:01".parse().unwrap();
        // 0x0BB8 = 3000 -> 30.00 C = 86 F
        let scanner = FakeScanner::new(vec![h5074_advertisement(
            other,
            [0xB8, 0x0B],
            [0x88, 0x13],
            0x50,
        )]);
        let options = Options::try_parse_from([
            "govee-thermostat",
            "--alias",
            "A4:C1:38:00:00:01=bedroom",
        ])
        .unwrap();

        run_with(&options, startup(&heater, &sink), &scanner)
            .await
            .unwrap();

        assert_eq!(heater.calls(), vec![OutletCall::Query, OutletCall::TurnOff]);
        assert_eq!(sink.gauge(Gauge::Battery, "bedroom"), Some(80.0));
    }

    #[tokio::test]
    async fn undiscovered_outlet_fails_startup() {
        let lamp = Arc::new(FakeOutlet::new("lamp", false));
        let sink = Arc::new(RecordingSink::default());
        let scanner = FakeScanner::new(vec![]);
        let startup = Startup {
            outlets: [("lamp".to_string(), Arc::clone(&lamp) as Arc<dyn Outlet>)]
                .into_iter()
                .collect(),
            ..startup(&lamp, &sink)
        };

        let err = run_with(&default_options(), startup, &scanner)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Config(ConfigError::UnknownOutlet { .. })
        ));
    }

    #[test]
    fn parses_command_line() {
        let options = Options::try_parse_from([
            "govee-thermostat",
            "--config",
            "/etc/govee/devices.yml",
            "--alias",
            "A4:C1:38:00:11:22=Nursery",
            "--outlet",
            "heater=192.168.10.42",
            "--outlet-timeout",
            "500ms",
            "--control-interval",
            "30s",
            "--strict-flags",
        ])
        .unwrap();

        assert_eq!(options.config, PathBuf::from("/etc/govee/devices.yml"));
        assert_eq!(options.aliases[0].name, "Nursery");
        assert_eq!(options.outlets[0].host, "192.168.10.42");
        assert_eq!(options.outlet_timeout, Duration::from_millis(500));
        assert_eq!(options.control_interval, Some(Duration::from_secs(30)));
        assert_eq!(options.flag_policy(), FlagPolicy::Strict);
        assert_eq!(options.outlet_subnet.to_string(), "192.168.10.0/24");
        assert_eq!(options.metrics_addr.port(), 2112);
    }
}
