//! Network-controlled power outlets.
//!
//! The control loop talks to outlets through the [`Outlet`] trait so tests can
//! substitute an in-memory fake. [`kasa`] implements it for TP-Link HS1xx
//! smart plugs.

pub mod kasa;

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from querying or commanding an outlet.
#[derive(Error, Debug)]
pub enum OutletError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Boxed future returned by [`Outlet`] operations.
pub type OutletFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OutletError>> + Send + 'a>>;

/// An on/off power outlet reachable over the network.
///
/// The outlet owns its state; callers query it rather than caching it.
pub trait Outlet: Send + Sync {
    fn name(&self) -> &str;
    fn query_on_state(&self) -> OutletFuture<'_, bool>;
    fn turn_on(&self) -> OutletFuture<'_, ()>;
    fn turn_off(&self) -> OutletFuture<'_, ()>;
}

/// Outlets keyed by name.
pub type OutletSet = BTreeMap<String, Arc<dyn Outlet>>;

/// An outlet declared on the command line instead of being discovered.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticOutlet {
    pub name: String,
    pub host: String,
}

/// Parse a static outlet in the format "NAME=HOST[:PORT]".
pub fn parse_static_outlet(src: &str) -> Result<StaticOutlet, String> {
    match src.split_once('=') {
        Some((name, host)) if !name.is_empty() && !host.is_empty() => Ok(StaticOutlet {
            name: name.into(),
            host: host.into(),
        }),
        _ => Err("invalid outlet: expected format NAME=HOST".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_static_outlet() {
        let outlet = parse_static_outlet("heater=192.168.10.42").unwrap();
        assert_eq!(outlet.name, "heater");
        assert_eq!(outlet.host, "192.168.10.42");
    }

    #[test]
    fn rejects_incomplete_static_outlet() {
        assert!(parse_static_outlet("heater").is_err());
        assert!(parse_static_outlet("=192.168.10.42").is_err());
        assert!(parse_static_outlet("heater=").is_err());
    }

    #[test]
    fn timeout_display() {
        let err = OutletError::Timeout(Duration::from_secs(1));
        assert_eq!(err.to_string(), "timed out after 1s");
    }
}
