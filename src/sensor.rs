//! Sensor model detection and advertisement decoding.
//!
//! Each supported model is described by the frame length and advertisement
//! flags it is known to send, plus its decoder. The classifier only looks at
//! those two values; it never inspects payload contents.

use crate::advertisement::Advertisement;
use crate::measurement::SensorReading;
use thiserror::Error;

/// Govee's company identifier as sent in H5074 manufacturer data.
pub const GOVEE_H5074_COMPANY_ID: u16 = 0xEC88;

/// Manufacturer data length of an H5074 frame, company identifier included.
pub const GOVEE_H5074_FRAME_LEN: usize = 9;

/// AD flags value observed on H5074 advertisements.
///
/// Some host stacks do not surface the flags at all, see [`FlagPolicy`].
pub const GOVEE_H5074_FLAGS: u8 = 6;

/// Errors raised while decoding an accepted advertisement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The payload is shorter than the model's frame
    #[error("malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },
}

/// Supported sensor models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorModel {
    /// Govee H5074 thermo-hygrometer
    GoveeH5074,
}

impl SensorModel {
    /// Every model the classifier tries, in order.
    pub const ALL: [SensorModel; 1] = [SensorModel::GoveeH5074];

    pub const fn company_id(self) -> u16 {
        match self {
            SensorModel::GoveeH5074 => GOVEE_H5074_COMPANY_ID,
        }
    }

    pub const fn frame_len(self) -> usize {
        match self {
            SensorModel::GoveeH5074 => GOVEE_H5074_FRAME_LEN,
        }
    }

    pub const fn flags(self) -> u8 {
        match self {
            SensorModel::GoveeH5074 => GOVEE_H5074_FLAGS,
        }
    }

    /// Whether any supported model advertises under `company_id`.
    ///
    /// Scanner backends use this to drop unrelated manufacturer data early.
    pub fn is_known_company_id(company_id: u16) -> bool {
        Self::ALL.iter().any(|m| m.company_id() == company_id)
    }

    /// Decode an accepted advertisement into a reading.
    pub fn decode(self, advertisement: &Advertisement) -> Result<SensorReading, DecodeError> {
        match self {
            SensorModel::GoveeH5074 => decode_h5074(advertisement),
        }
    }
}

/// How to treat advertisements whose backend did not report AD flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagPolicy {
    /// Missing flags are accepted on payload length alone
    #[default]
    Lenient,
    /// Missing flags reject the advertisement
    Strict,
}

/// Outcome of classifying an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Accepted(SensorModel),
    /// No supported model sends frames of this length
    InvalidLength,
    /// The length matched but the flags did not
    FlagMismatch,
}

impl Classification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Classification::Accepted(_))
    }

    /// Label used for the `advertisement_received` counter.
    pub fn as_label(&self) -> &'static str {
        match self {
            Classification::Accepted(_) => "accepted",
            Classification::InvalidLength => "rejected-invalid-length",
            Classification::FlagMismatch => "rejected-flag-mismatch",
        }
    }
}

/// Decide whether an advertisement comes from a supported sensor model.
pub fn classify(payload_len: usize, flags: Option<u8>, policy: FlagPolicy) -> Classification {
    let mut outcome = Classification::InvalidLength;
    for model in SensorModel::ALL {
        if payload_len != model.frame_len() {
            continue;
        }
        match (flags, policy) {
            (Some(flags), _) if flags == model.flags() => return Classification::Accepted(model),
            (None, FlagPolicy::Lenient) => return Classification::Accepted(model),
            _ => outcome = Classification::FlagMismatch,
        }
    }
    outcome
}

#[inline]
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * (9.0 / 5.0) + 32.0
}

/// Decode an H5074 frame.
///
/// Layout (offsets include the 2-byte company identifier):
/// - `[3..5]` temperature, little-endian two's complement, 0.01 °C
/// - `[5..7]` humidity, little-endian unsigned, 0.01 %
/// - `[7]` battery percent
pub fn decode_h5074(advertisement: &Advertisement) -> Result<SensorReading, DecodeError> {
    let payload = advertisement.payload.as_slice();
    if payload.len() < GOVEE_H5074_FRAME_LEN {
        return Err(DecodeError::MalformedPayload {
            expected: GOVEE_H5074_FRAME_LEN,
            actual: payload.len(),
        });
    }

    let temperature_c = f32::from(i16::from_le_bytes([payload[3], payload[4]])) / 100.0;
    let humidity_pct = f32::from(u16::from_le_bytes([payload[5], payload[6]])) / 100.0;

    Ok(SensorReading {
        source_id: advertisement.source_id,
        temperature_f: celsius_to_fahrenheit(temperature_c),
        humidity_pct,
        battery_pct: payload[7],
        signal_strength: advertisement.signal_strength,
    })
}
