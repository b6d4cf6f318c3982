use crate::advertisement::Advertisement;
use crate::mac_address::MacAddress;
use crate::metrics::{Counter, Gauge, MeasurementSink};
use crate::outlet::{Outlet, OutletError, OutletFuture};
use crate::sensor::{GOVEE_H5074_COMPANY_ID, GOVEE_H5074_FLAGS};
use std::io;
use std::sync::Mutex;
use std::time::Duration;

/// A stable sensor address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x11, 0x22]);

/// Build an H5074 manufacturer payload from raw little-endian field bytes.
pub fn h5074_payload(temperature: [u8; 2], humidity: [u8; 2], battery: u8) -> Vec<u8> {
    let [id_lo, id_hi] = GOVEE_H5074_COMPANY_ID.to_le_bytes();
    vec![
        id_lo,
        id_hi,
        0x00,
        temperature[0],
        temperature[1],
        humidity[0],
        humidity[1],
        battery,
        0x02,
    ]
}

/// An H5074 advertisement with the expected flags and a fixed RSSI.
pub fn h5074_advertisement(
    source_id: MacAddress,
    temperature: [u8; 2],
    humidity: [u8; 2],
    battery: u8,
) -> Advertisement {
    Advertisement {
        source_id,
        payload: h5074_payload(temperature, humidity, battery),
        flags: Some(GOVEE_H5074_FLAGS),
        signal_strength: -67,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutletCall {
    Query,
    TurnOn,
    TurnOff,
}

/// In-memory outlet recording every call made to it.
#[derive(Debug)]
pub struct FakeOutlet {
    name: String,
    on: Mutex<bool>,
    calls: Mutex<Vec<OutletCall>>,
    fail_queries: bool,
    fail_commands: bool,
    delay: Option<Duration>,
}

impl FakeOutlet {
    pub fn new(name: &str, on: bool) -> Self {
        Self {
            name: name.to_string(),
            on: Mutex::new(on),
            calls: Mutex::new(Vec::new()),
            fail_queries: false,
            fail_commands: false,
            delay: None,
        }
    }

    pub fn failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    pub fn failing_commands(mut self) -> Self {
        self.fail_commands = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<OutletCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_on(&self) -> bool {
        *self.on.lock().unwrap()
    }

    async fn record(&self, call: OutletCall, fail: bool) -> Result<bool, OutletError> {
        self.calls.lock().unwrap().push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(OutletError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "outlet unreachable",
            )));
        }
        let mut on = self.on.lock().unwrap();
        match call {
            OutletCall::Query => {}
            OutletCall::TurnOn => *on = true,
            OutletCall::TurnOff => *on = false,
        }
        Ok(*on)
    }
}

impl Outlet for FakeOutlet {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_on_state(&self) -> OutletFuture<'_, bool> {
        Box::pin(self.record(OutletCall::Query, self.fail_queries))
    }

    fn turn_on(&self) -> OutletFuture<'_, ()> {
        Box::pin(async move {
            self.record(OutletCall::TurnOn, self.fail_commands).await?;
            Ok(())
        })
    }

    fn turn_off(&self) -> OutletFuture<'_, ()> {
        Box::pin(async move {
            self.record(OutletCall::TurnOff, self.fail_commands).await?;
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Counter(Counter, Vec<String>),
    Gauge(Gauge, Vec<String>, f64),
}

/// Sink that keeps every update in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Most recent value of `gauge` for `name`.
    pub fn gauge(&self, gauge: Gauge, name: &str) -> Option<f64> {
        self.events().into_iter().rev().find_map(|event| match event {
            SinkEvent::Gauge(g, labels, value) if g == gauge && labels == [name] => Some(value),
            _ => None,
        })
    }

    /// How many times `counter` was incremented with exactly `labels`.
    pub fn count(&self, counter: Counter, labels: &[&str]) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, SinkEvent::Counter(c, l) if *c == counter && l == labels)
            })
            .count()
    }
}

impl MeasurementSink for RecordingSink {
    fn increment_counter(&self, counter: Counter, labels: &[&str]) {
        let labels = labels.iter().map(|l| l.to_string()).collect();
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Counter(counter, labels));
    }

    fn set_gauge(&self, gauge: Gauge, labels: &[&str], value: f64) {
        let labels = labels.iter().map(|l| l.to_string()).collect();
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Gauge(gauge, labels, value));
    }
}
