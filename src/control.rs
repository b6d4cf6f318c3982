//! Hysteresis thermostat driving outlets from sensor readings.
//!
//! The outlet's live state is the only state: every evaluation queries it,
//! reports it as the `outlet_state` gauge, and only then decides. Outlet I/O
//! runs in one worker task per outlet fed by a bounded queue, so a slow
//! outlet never stalls advertisement processing and commands to one outlet
//! never overlap.

use crate::config::TemperatureObjective;
use crate::measurement::NamedReading;
use crate::metrics::{Gauge, MeasurementSink};
use crate::outlet::{Outlet, OutletError, OutletFuture, OutletSet};
use crate::throttle::Throttle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pending evaluations per outlet before new readings are dropped.
pub const OUTLET_QUEUE_DEPTH: usize = 8;

/// Default bound on a single outlet operation.
pub const DEFAULT_OUTLET_TIMEOUT: Duration = Duration::from_secs(1);

/// Actuation chosen by the hysteresis rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TurnOn,
    TurnOff,
}

/// Errors from a single control evaluation. None of them stop the loop.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("objective for sensor {sensor:?} cites unknown outlet {outlet:?}")]
    UnknownOutlet { sensor: String, outlet: String },
    #[error("outlet {outlet:?}: {source}")]
    Actuator {
        outlet: String,
        #[source]
        source: OutletError,
    },
    #[error("outlet {outlet:?} has {OUTLET_QUEUE_DEPTH} pending evaluations, dropping reading")]
    QueueFull { outlet: String },
    #[error("outlet {outlet:?} worker has stopped")]
    WorkerStopped { outlet: String },
}

/// The hysteresis rule.
///
/// An outlet that is on stays on until the temperature rises above
/// `heat_off_above_f`; one that is off stays off until it drops below
/// `heat_on_below_f`. Readings inside the band never actuate.
pub fn decide(is_on: bool, temperature_f: f32, objective: &TemperatureObjective) -> Option<Command> {
    if is_on && temperature_f > objective.heat_off_above_f {
        Some(Command::TurnOff)
    } else if !is_on && temperature_f < objective.heat_on_below_f {
        Some(Command::TurnOn)
    } else {
        None
    }
}

/// Evaluates one objective against one outlet.
#[derive(Debug, Clone)]
pub struct Thermostat {
    timeout: Duration,
}

impl Default for Thermostat {
    fn default() -> Self {
        Self::new(DEFAULT_OUTLET_TIMEOUT)
    }
}

impl Thermostat {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn bounded<T>(
        &self,
        outlet: &dyn Outlet,
        operation: OutletFuture<'_, T>,
    ) -> Result<T, ControlError> {
        let source = match tokio::time::timeout(self.timeout, operation).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => OutletError::Timeout(self.timeout),
        };
        Err(ControlError::Actuator {
            outlet: outlet.name().to_string(),
            source,
        })
    }

    /// Query the outlet, publish its state, and actuate if the rule says so.
    ///
    /// Returns the command that was successfully sent, if any.
    pub async fn evaluate(
        &self,
        objective: &TemperatureObjective,
        temperature_f: f32,
        outlet: &dyn Outlet,
        sink: &dyn MeasurementSink,
    ) -> Result<Option<Command>, ControlError> {
        let is_on = self.bounded(outlet, outlet.query_on_state()).await?;
        sink.set_gauge(
            Gauge::OutletState,
            &[objective.outlet_name.as_str()],
            if is_on { 1.0 } else { 0.0 },
        );

        let command = decide(is_on, temperature_f, objective);
        match command {
            Some(Command::TurnOn) => self.bounded(outlet, outlet.turn_on()).await?,
            Some(Command::TurnOff) => self.bounded(outlet, outlet.turn_off()).await?,
            None => {}
        }
        Ok(command)
    }
}

/// A reading queued for evaluation against one objective.
#[derive(Debug)]
struct Intent {
    objective: Arc<TemperatureObjective>,
    temperature_f: f32,
}

/// Routes named readings to per-outlet workers.
pub struct ControlLoop {
    objectives: Vec<Arc<TemperatureObjective>>,
    queues: HashMap<String, mpsc::Sender<Intent>>,
    workers: Vec<JoinHandle<()>>,
    throttle: Option<Throttle>,
}

impl ControlLoop {
    /// Start one worker for every outlet an objective references.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        objectives: Vec<TemperatureObjective>,
        outlets: &OutletSet,
        thermostat: Thermostat,
        sink: Arc<dyn MeasurementSink>,
        control_interval: Option<Duration>,
    ) -> Self {
        let thermostat = Arc::new(thermostat);
        let mut queues = HashMap::new();
        let mut workers = Vec::new();

        for objective in &objectives {
            if queues.contains_key(&objective.outlet_name) {
                continue;
            }
            let Some(outlet) = outlets.get(&objective.outlet_name) else {
                continue;
            };
            let (tx, rx) = mpsc::channel(OUTLET_QUEUE_DEPTH);
            workers.push(tokio::spawn(run_worker(
                Arc::clone(outlet),
                rx,
                Arc::clone(&thermostat),
                Arc::clone(&sink),
            )));
            queues.insert(objective.outlet_name.clone(), tx);
        }

        Self {
            objectives: objectives.into_iter().map(Arc::new).collect(),
            queues,
            workers,
            throttle: control_interval.map(Throttle::new),
        }
    }

    /// Queue an evaluation for every objective bound to the reading's sensor,
    /// in configuration order. Returns how many were queued.
    pub fn on_reading(&mut self, reading: &NamedReading) -> usize {
        let matching: Vec<Arc<TemperatureObjective>> = self
            .objectives
            .iter()
            .filter(|objective| objective.sensor_name == reading.name)
            .cloned()
            .collect();
        if matching.is_empty() {
            return 0;
        }

        if let Some(throttle) = self.throttle.as_mut()
            && !throttle.should_emit(&reading.name)
        {
            debug!(sensor = %reading.name, "control evaluation throttled");
            return 0;
        }

        let mut queued = 0;
        for objective in matching {
            match self.dispatch(objective, reading.reading.temperature_f) {
                Ok(()) => queued += 1,
                Err(e @ ControlError::UnknownOutlet { .. }) => error!("configuration error: {e}"),
                Err(e) => warn!("{e}"),
            }
        }
        queued
    }

    fn dispatch(
        &self,
        objective: Arc<TemperatureObjective>,
        temperature_f: f32,
    ) -> Result<(), ControlError> {
        let Some(queue) = self.queues.get(&objective.outlet_name) else {
            return Err(ControlError::UnknownOutlet {
                sensor: objective.sensor_name.clone(),
                outlet: objective.outlet_name.clone(),
            });
        };

        let outlet = objective.outlet_name.clone();
        queue
            .try_send(Intent {
                objective,
                temperature_f,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => ControlError::QueueFull { outlet },
                TrySendError::Closed(_) => ControlError::WorkerStopped { outlet },
            })
    }

    /// Close the queues and wait for pending evaluations to finish.
    pub async fn shutdown(self) {
        drop(self.queues);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("outlet worker failed: {e}");
            }
        }
    }
}

async fn run_worker(
    outlet: Arc<dyn Outlet>,
    mut intents: mpsc::Receiver<Intent>,
    thermostat: Arc<Thermostat>,
    sink: Arc<dyn MeasurementSink>,
) {
    while let Some(intent) = intents.recv().await {
        let objective = &intent.objective;
        match thermostat
            .evaluate(objective, intent.temperature_f, outlet.as_ref(), sink.as_ref())
            .await
        {
            Ok(Some(command)) => info!(
                outlet = outlet.name(),
                sensor = %objective.sensor_name,
                temperature_f = intent.temperature_f,
                ?command,
                "actuated outlet"
            ),
            Ok(None) => debug!(
                outlet = outlet.name(),
                sensor = %objective.sensor_name,
                temperature_f = intent.temperature_f,
                "no actuation needed"
            ),
            Err(e) => error!("{e}"),
        }
    }
}
