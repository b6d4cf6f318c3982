//! Rate limiting for thermostat evaluation, and duration parsing for the CLI.
//!
//! Every qualifying reading normally costs an outlet round-trip. Sensors that
//! advertise several times a second can be limited to one control evaluation
//! per interval; gauges are still updated for every reading.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Allows at most one event per `interval` for each key.
///
/// The first event for a key is always allowed.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_seen: HashMap<String, Instant>,
}

impl Throttle {
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use govee_thermostat::throttle::Throttle;
    ///
    /// let mut throttle = Throttle::new(Duration::from_secs(30));
    /// assert!(throttle.should_emit("bedroom"));
    /// assert!(!throttle.should_emit("bedroom"));
    /// ```
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_seen: HashMap::new(),
        }
    }

    /// Returns `true` and restarts the key's timer when the interval has
    /// elapsed since the last allowed event; a blocked event does not restart it.
    pub fn should_emit(&mut self, key: &str) -> bool {
        let now = Instant::now();

        match self.last_seen.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_seen.insert(key.to_string(), now);
                true
            }
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Accepts `ms`, `s`, `m` and `h` suffixes; a bare number is seconds.
///
/// ```
/// use govee_thermostat::throttle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let parse = |num: &str, unit: &str| -> Result<u64, String> {
        num.trim()
            .parse()
            .map_err(|_| format!("invalid {unit}: {num}"))
    };

    // `ms` must be tried before `m` and `s`.
    if let Some(num) = src.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse(num, "milliseconds")?));
    }
    if let Some(num) = src.strip_suffix('h') {
        return Ok(Duration::from_secs(parse(num, "hours")? * 3600));
    }
    if let Some(num) = src.strip_suffix('m') {
        return Ok(Duration::from_secs(parse(num, "minutes")? * 60));
    }
    if let Some(num) = src.strip_suffix('s') {
        return Ok(Duration::from_secs(parse(num, "seconds")?));
    }

    Ok(Duration::from_secs(parse(src, "duration")?))
}
