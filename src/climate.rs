//! Climate beacon advertisement decoding.
//!
//! The beacon broadcasts its latest sensor samples at fixed offsets of the
//! raw advertisement record:
//!
//! | Offset | Size | Value                                        |
//! |--------|------|----------------------------------------------|
//! | 23     | 2    | Temperature ADC word, big-endian             |
//! | 25     | 2    | Light level in lux, big-endian               |
//! | 27     | 2    | Humidity ADC word, big-endian (optional)     |

use crate::advertisement::uuid_from_short;
use crate::reading::SensorReading;
use crate::scanner::ScanEvent;
use thiserror::Error;
use uuid::Uuid;

/// Climate temperature service, advertised by every climate beacon.
pub const TEMPERATURE_SERVICE: Uuid = uuid_from_short(0x5608);
/// Climate light level service.
pub const LIGHT_SERVICE: Uuid = uuid_from_short(0x560E);
/// Climate humidity service.
pub const HUMIDITY_SERVICE: Uuid = uuid_from_short(0x5614);

const TEMPERATURE_OFFSET: usize = 23;
const LIGHT_OFFSET: usize = 25;
const HUMIDITY_OFFSET: usize = 27;

/// Shortest record that carries temperature and light level.
pub const MIN_RECORD_LEN: usize = LIGHT_OFFSET + 2;

/// Error types for decoding climate beacon advertisements.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The record is too short to hold the fixed-offset sensor fields
    #[error("Malformed advertisement: {len} bytes, need at least {required}")]
    MalformedAdvertisement { len: usize, required: usize },
}

/// Convert a raw temperature word to degrees Celsius.
///
/// This is the linearization of the sensor's 16-bit ADC output. The divisor
/// is 2^16, not 2^16 - 1.
pub fn temperature_celsius(raw: u16) -> f64 {
    -46.85 + 175.72 * (f64::from(raw) / 65536.0)
}

fn be_word(record: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([record[offset], record[offset + 1]])
}

/// Decode a climate beacon advertisement into a [`SensorReading`].
///
/// The light level is the unsigned big-endian combination of its two bytes,
/// so readings above 32767 lux stay positive.
///
/// # Errors
/// Returns [`DecodeError::MalformedAdvertisement`] when the record is shorter
/// than [`MIN_RECORD_LEN`].
pub fn decode_advertisement(event: &ScanEvent) -> Result<SensorReading, DecodeError> {
    let record = &event.record;
    if record.len() < MIN_RECORD_LEN {
        return Err(DecodeError::MalformedAdvertisement {
            len: record.len(),
            required: MIN_RECORD_LEN,
        });
    }

    let humidity_raw =
        (record.len() >= HUMIDITY_OFFSET + 2).then(|| be_word(record, HUMIDITY_OFFSET));

    Ok(SensorReading {
        address: event.address,
        device_name: event.name.clone(),
        signal_strength_dbm: event.rssi,
        temperature_celsius: temperature_celsius(be_word(record, TEMPERATURE_OFFSET)),
        light_level_lux: be_word(record, LIGHT_OFFSET),
        humidity_raw,
        timestamp: event.received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_ADDRESS, climate_event, climate_record};

    const TOLERANCE: f64 = 1e-4;

    #[test]
    fn test_decode_example_record() {
        let event = climate_event(TEST_ADDRESS, climate_record(0x1A2B, 0x000A, 0x6A10));
        let reading = decode_advertisement(&event).unwrap();

        assert_eq!(reading.address, TEST_ADDRESS);
        assert_eq!(reading.device_name.as_deref(), Some("Climate_8B6"));
        assert_eq!(reading.signal_strength_dbm, -67);
        assert!((reading.temperature_celsius - -28.888_14).abs() < TOLERANCE);
        assert_eq!(reading.light_level_lux, 10);
        assert_eq!(reading.humidity_raw, Some(0x6A10));
        assert_eq!(reading.timestamp, event.received_at);
    }

    #[test]
    fn test_temperature_matches_formula() {
        for raw in [0u16, 1, 0x1A2B, 0x6666, 0x8000, 0xFFFE, 0xFFFF] {
            let event = climate_event(TEST_ADDRESS, climate_record(raw, 0, 0));
            let reading = decode_advertisement(&event).unwrap();
            let expected = -46.85 + 175.72 * (f64::from(raw) / 65536.0);
            assert!(
                (reading.temperature_celsius - expected).abs() < TOLERANCE,
                "raw {raw:#06x}: {} != {expected}",
                reading.temperature_celsius
            );
        }
    }

    #[test]
    fn test_temperature_bounds() {
        assert!((temperature_celsius(0) - -46.85).abs() < TOLERANCE);
        assert!((temperature_celsius(u16::MAX) - 128.867_32).abs() < TOLERANCE);
    }

    #[test]
    fn test_light_level_high_bit_stays_unsigned() {
        let event = climate_event(TEST_ADDRESS, climate_record(0, 0x8001, 0));
        let reading = decode_advertisement(&event).unwrap();
        assert_eq!(reading.light_level_lux, 32769);

        let event = climate_event(TEST_ADDRESS, climate_record(0, 0xFFFF, 0));
        assert_eq!(decode_advertisement(&event).unwrap().light_level_lux, 65535);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let event = climate_event(TEST_ADDRESS, climate_record(0x4321, 0x0123, 0x2222));
        assert_eq!(
            decode_advertisement(&event).unwrap(),
            decode_advertisement(&event).unwrap()
        );
    }

    #[test]
    fn test_short_record_is_malformed() {
        let mut event = climate_event(TEST_ADDRESS, climate_record(0x1A2B, 0x000A, 0));
        event.record.truncate(MIN_RECORD_LEN - 1);

        assert_eq!(
            decode_advertisement(&event),
            Err(DecodeError::MalformedAdvertisement {
                len: 26,
                required: 27
            })
        );

        event.record.clear();
        assert!(decode_advertisement(&event).is_err());
    }

    #[test]
    fn test_record_without_humidity_word() {
        let mut event = climate_event(TEST_ADDRESS, climate_record(0x1A2B, 0x000A, 0x6A10));
        event.record.truncate(MIN_RECORD_LEN);

        let reading = decode_advertisement(&event).unwrap();
        assert_eq!(reading.light_level_lux, 10);
        assert_eq!(reading.humidity_raw, None);
    }

    #[test]
    fn test_missing_name_is_kept_absent() {
        let mut event = climate_event(TEST_ADDRESS, climate_record(0, 0, 0));
        event.name = None;
        assert_eq!(decode_advertisement(&event).unwrap().device_name, None);
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::MalformedAdvertisement {
            len: 3,
            required: 27,
        };
        assert_eq!(
            err.to_string(),
            "Malformed advertisement: 3 bytes, need at least 27"
        );
    }
}
