//! Raw advertisement values handed from a scanner backend to the pipeline.

use crate::mac_address::MacAddress;

/// RSSI value reported by the controller when signal strength is unavailable.
pub const RSSI_UNAVAILABLE: i16 = 127;

/// One received BLE advertisement carrying manufacturer-specific data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Address of the advertiser
    pub source_id: MacAddress,
    /// Manufacturer-specific data, starting with the little-endian company identifier
    pub payload: Vec<u8>,
    /// Value of the AD "Flags" structure, when the backend exposes it
    pub flags: Option<u8>,
    /// Received signal strength in dBm
    pub signal_strength: i16,
}

impl Advertisement {
    /// Company identifier from the first two payload bytes.
    pub fn company_id(&self) -> Option<u16> {
        match self.payload.as_slice() {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }
}

/// Rebuild the on-air manufacturer data from a company identifier and the bytes
/// that follow it.
///
/// BlueZ reports manufacturer data keyed by company identifier with the
/// identifier stripped; sensor frame offsets count from the identifier.
pub fn manufacturer_payload(company_id: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + data.len());
    payload.extend_from_slice(&company_id.to_le_bytes());
    payload.extend_from_slice(data);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_id_is_little_endian_prefix() {
        let adv = Advertisement {
            source_id: MacAddress::default(),
            payload: vec![0x88, 0xEC, 0x00],
            flags: Some(6),
            signal_strength: -70,
        };
        assert_eq!(adv.company_id(), Some(0xEC88));
    }

    #[test]
    fn company_id_missing_on_short_payload() {
        let adv = Advertisement {
            source_id: MacAddress::default(),
            payload: vec![0x88],
            flags: None,
            signal_strength: RSSI_UNAVAILABLE,
        };
        assert_eq!(adv.company_id(), None);
    }

    #[test]
    fn manufacturer_payload_prepends_identifier() {
        let payload = manufacturer_payload(0xEC88, &[0x00, 0x38, 0x09]);
        assert_eq!(payload, vec![0x88, 0xEC, 0x00, 0x38, 0x09]);
    }
}
