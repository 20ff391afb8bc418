//! Decoded climate beacon reading.

use crate::address::DeviceAddress;
use std::time::SystemTime;

/// One decoded advertisement from a climate beacon.
///
/// A reading is a snapshot of a single advertisement, never a running
/// aggregate. Newer readings replace older ones wholesale in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Hardware address of the beacon
    pub address: DeviceAddress,
    /// Advertised device name, if any
    pub device_name: Option<String>,
    /// Received signal strength in dBm
    pub signal_strength_dbm: i16,
    /// Temperature in Celsius
    pub temperature_celsius: f64,
    /// Ambient light level in lux
    pub light_level_lux: u16,
    /// Raw humidity word, present when the advertisement carries it
    pub humidity_raw: Option<u16>,
    /// When the advertisement was received
    pub timestamp: SystemTime,
}

impl SensorReading {
    /// Name to show for this beacon, falling back to its address.
    pub fn display_name(&self) -> String {
        match self.device_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.address.to_string(),
        }
    }
}
