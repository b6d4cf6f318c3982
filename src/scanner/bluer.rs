//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running. BlueZ does
//! not expose the AD flags of an advertisement, so every advertisement from
//! this backend carries `flags: None`.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{Advertisement, RSSI_UNAVAILABLE, manufacturer_payload};
use crate::sensor::SensorModel;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// One monitor pattern per supported model's company identifier.
fn company_patterns() -> Vec<Pattern> {
    SensorModel::ALL
        .iter()
        .map(|model| Pattern {
            data_type: MANUFACTURER_DATA_TYPE,
            start_position: 0,
            content: model.company_id().to_le_bytes().to_vec(),
        })
        .collect()
}

/// Start a passive scan through BlueZ.
///
/// Advertisements are sent through the returned channel until the monitor
/// stream ends.
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!(adapter = adapter.name(), "scanning via BlueZ");

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(company_patterns()),
            ..Default::default()
        })
        .await?;

    // The task owns all Bluetooth state so it stays alive with the stream
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            if let MonitorEvent::DeviceFound(device_id) = event {
                match read_device(&adapter, device_id.device).await {
                    Ok(advertisements) => {
                        for advertisement in advertisements {
                            if tx.send(advertisement).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => debug!(device = %device_id.device, "skipping device: {e}"),
                }
            }
        }
    });

    Ok(rx)
}

/// Read the manufacturer data and RSSI BlueZ cached for a device.
async fn read_device(adapter: &Adapter, address: Address) -> Result<Vec<Advertisement>, ScanError> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(Vec::new());
    };
    let signal_strength = device.rssi().await?.unwrap_or(RSSI_UNAVAILABLE);

    Ok(manufacturer_data
        .iter()
        .filter(|(company_id, _)| SensorModel::is_known_company_id(**company_id))
        .map(|(company_id, data)| Advertisement {
            source_id: address.into(),
            payload: manufacturer_payload(*company_id, data),
            flags: None,
            signal_strength,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac_address::MacAddress;

    #[test]
    fn patterns_match_company_identifier_bytes() {
        let patterns = company_patterns();
        assert_eq!(patterns.len(), SensorModel::ALL.len());
        assert_eq!(patterns[0].data_type, 0xff);
        assert_eq!(patterns[0].content, vec![0x88, 0xEC]);
    }

    #[test]
    fn address_converts_to_source_id() {
        let addr = Address([0xA4, 0xC1, 0x38, 0x00, 0x11, 0x22]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac.to_string(), "A4:C1:38:00:11:22");
    }
}
