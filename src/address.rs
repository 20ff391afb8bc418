//! Stable hardware address of a beacon.
//!
//! Readings are keyed by this address rather than by the advertised device
//! name: names are optional and several beacons may share one.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    /// Build an address from the little-endian byte order used on the HCI wire.
    pub fn from_le_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(bytes)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing an address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseAddressError {
    #[error("invalid device address: expected 6 octets, got {0}")]
    OctetCount(usize),
    #[error("invalid device address: '{0}' is not a hex octet")]
    Octet(String),
}

impl FromStr for DeviceAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.split(':').collect();
        if octets.len() != 6 {
            return Err(ParseAddressError::OctetCount(octets.len()));
        }

        let mut bytes = [0u8; 6];
        for (slot, octet) in bytes.iter_mut().zip(&octets) {
            if octet.len() != 2 {
                return Err(ParseAddressError::Octet(octet.to_string()));
            }
            *slot = u8::from_str_radix(octet, 16)
                .map_err(|_| ParseAddressError::Octet(octet.to_string()))?;
        }

        Ok(DeviceAddress(bytes))
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for DeviceAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}
