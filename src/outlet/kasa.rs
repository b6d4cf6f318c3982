//! TP-Link Kasa (HS100/HS103/HS110) local protocol.
//!
//! Requests are JSON documents sent over TCP port 9999, obfuscated with an
//! autokey XOR cipher and framed by a 4-byte big-endian length.

use super::{Outlet, OutletError, OutletFuture, StaticOutlet};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// TCP port of the Kasa local protocol.
pub const KASA_PORT: u16 = 9999;

/// Initial key of the autokey cipher.
const AUTOKEY_SEED: u8 = 171;

/// Upper bound on a response frame; sysinfo replies are well under 2 KiB.
const MAX_RESPONSE_LEN: usize = 64 * 1024;

/// Hosts probed in parallel during discovery.
pub const DISCOVERY_CONCURRENCY: usize = 64;

/// Encrypt and frame a request.
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + plain.len());
    out.extend_from_slice(&(plain.len() as u32).to_be_bytes());
    let mut key = AUTOKEY_SEED;
    for &byte in plain {
        key ^= byte;
        out.push(key);
    }
    out
}

/// Decrypt a response body (without its length prefix).
pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = AUTOKEY_SEED;
    cipher
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

/// `system.get_sysinfo` reply fields used here.
#[derive(Debug, Clone, Deserialize)]
pub struct SysInfo {
    pub alias: String,
    pub relay_state: u8,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    err_code: i64,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    err_code: i64,
}

#[derive(Debug, Deserialize)]
struct SystemResponse {
    get_sysinfo: Option<SysInfo>,
    set_relay_state: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Response {
    system: SystemResponse,
}

/// One Kasa smart plug.
#[derive(Debug, Clone)]
pub struct KasaOutlet {
    name: String,
    addr: SocketAddr,
    timeout: Duration,
}

impl KasaOutlet {
    pub fn new(name: impl Into<String>, addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            addr,
            timeout,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connect to `addr` and name the outlet after its configured alias.
    pub async fn probe(addr: SocketAddr, timeout: Duration) -> Result<Self, OutletError> {
        let info = exchange(addr, timeout, &json!({"system": {"get_sysinfo": {}}}))
            .await?
            .system
            .get_sysinfo
            .ok_or_else(|| OutletError::Protocol("missing get_sysinfo".into()))?;
        debug!(%addr, alias = %info.alias, model = %info.model, "probed outlet");
        Ok(Self::new(info.alias, addr, timeout))
    }

    /// Build an outlet from a command-line declaration, resolving its host.
    pub async fn from_static(outlet: &StaticOutlet, timeout: Duration) -> Result<Self, OutletError> {
        let target = if outlet.host.contains(':') {
            outlet.host.clone()
        } else {
            format!("{}:{KASA_PORT}", outlet.host)
        };
        let addr = tokio::net::lookup_host(&target)
            .await?
            .next()
            .ok_or_else(|| OutletError::Protocol(format!("{target} did not resolve")))?;
        Ok(Self::new(outlet.name.clone(), addr, timeout))
    }

    pub async fn sys_info(&self) -> Result<SysInfo, OutletError> {
        let info = exchange(self.addr, self.timeout, &json!({"system": {"get_sysinfo": {}}}))
            .await?
            .system
            .get_sysinfo
            .ok_or_else(|| OutletError::Protocol("missing get_sysinfo".into()))?;
        if info.err_code != 0 {
            return Err(OutletError::Protocol(format!(
                "get_sysinfo err_code {}",
                info.err_code
            )));
        }
        Ok(info)
    }

    async fn set_relay_state(&self, on: bool) -> Result<(), OutletError> {
        let request = json!({"system": {"set_relay_state": {"state": u8::from(on)}}});
        let status = exchange(self.addr, self.timeout, &request)
            .await?
            .system
            .set_relay_state
            .ok_or_else(|| OutletError::Protocol("missing set_relay_state".into()))?;
        match status.err_code {
            0 => Ok(()),
            code => Err(OutletError::Protocol(format!(
                "set_relay_state err_code {code}"
            ))),
        }
    }
}

impl Outlet for KasaOutlet {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_on_state(&self) -> OutletFuture<'_, bool> {
        Box::pin(async move { Ok(self.sys_info().await?.relay_state == 1) })
    }

    fn turn_on(&self) -> OutletFuture<'_, ()> {
        Box::pin(self.set_relay_state(true))
    }

    fn turn_off(&self) -> OutletFuture<'_, ()> {
        Box::pin(self.set_relay_state(false))
    }
}

/// Send one request and read one reply, bounded by `timeout`.
async fn exchange(
    addr: SocketAddr,
    timeout: Duration,
    request: &Value,
) -> Result<Response, OutletError> {
    let frame = encrypt(&serde_json::to_vec(request)?);

    let body = tokio::time::timeout(timeout, async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&frame).await?;

        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await?;
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_RESPONSE_LEN {
            return Err(OutletError::Protocol(format!("response of {len} bytes")));
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        Ok::<_, OutletError>(body)
    })
    .await
    .map_err(|_| OutletError::Timeout(timeout))??;

    Ok(serde_json::from_slice(&decrypt(&body))?)
}

/// An IPv4 network in CIDR notation, e.g. `192.168.10.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Smallest prefix accepted; larger networks are too slow to sweep.
    pub const MIN_PREFIX: u8 = 16;

    /// Host addresses in the subnet, excluding network and broadcast
    /// addresses where those exist.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let size = 1u64 << (32 - u32::from(self.prefix));
        let base = u64::from(u32::from(self.network));
        let (first, last) = if self.prefix >= 31 {
            (base, base + size - 1)
        } else {
            (base + 1, base + size - 2)
        };
        (first..=last).map(|ip| Ipv4Addr::from(ip as u32))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Subnet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("invalid subnet {s:?}: expected A.B.C.D/N"))?;
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| format!("invalid subnet address: {ip}"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("invalid subnet prefix: {prefix}"))?;
        if !(Self::MIN_PREFIX..=32).contains(&prefix) {
            return Err(format!(
                "subnet prefix must be between {} and 32, got {prefix}",
                Self::MIN_PREFIX
            ));
        }
        let mask = u32::MAX << (32 - u32::from(prefix));
        Ok(Subnet {
            network: Ipv4Addr::from(u32::from(ip) & mask),
            prefix,
        })
    }
}

/// Probe every host of `subnet` and return the outlets that answered.
pub async fn discover(subnet: Subnet, timeout: Duration) -> Vec<KasaOutlet> {
    futures::stream::iter(subnet.hosts())
        .map(|ip| KasaOutlet::probe(SocketAddr::new(ip.into(), KASA_PORT), timeout))
        .buffer_unordered(DISCOVERY_CONCURRENCY)
        .filter_map(|result| async move { result.ok() })
        .collect()
        .await
}
