//! Latest reading per beacon.

use crate::address::DeviceAddress;
use crate::reading::SensorReading;
use std::collections::BTreeMap;

/// Most recent [`SensorReading`] for every beacon seen so far.
///
/// Keyed by hardware address, so beacons that share a name (or advertise
/// none) stay distinct. Iteration is ordered by address.
#[derive(Debug, Default)]
pub struct BeaconRegistry {
    beacons: BTreeMap<DeviceAddress, SensorReading>,
}

impl BeaconRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reading`, replacing the previous one from the same beacon.
    ///
    /// Returns the replaced reading, or `None` for a newly seen beacon.
    pub fn update(&mut self, reading: SensorReading) -> Option<SensorReading> {
        self.beacons.insert(reading.address, reading)
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&SensorReading> {
        self.beacons.get(address)
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Readings ordered by beacon address.
    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.beacons.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_ADDRESS, base_reading};

    #[test]
    fn test_update_is_last_write_wins() {
        let mut registry = BeaconRegistry::new();
        assert!(registry.is_empty());

        let mut first = base_reading(TEST_ADDRESS);
        first.temperature_celsius = 20.0;
        assert_eq!(registry.update(first.clone()), None);

        let mut second = base_reading(TEST_ADDRESS);
        second.temperature_celsius = 22.5;
        assert_eq!(registry.update(second), Some(first));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&TEST_ADDRESS).unwrap().temperature_celsius,
            22.5
        );
    }

    #[test]
    fn test_same_name_different_address_kept_apart() {
        let mut registry = BeaconRegistry::new();
        let other = DeviceAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

        for address in [TEST_ADDRESS, other] {
            let mut reading = base_reading(address);
            reading.device_name = Some("Climate".into());
            registry.update(reading);
        }

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unnamed_beacons_are_tracked() {
        let mut registry = BeaconRegistry::new();
        let mut reading = base_reading(TEST_ADDRESS);
        reading.device_name = None;
        registry.update(reading.clone());

        reading.light_level_lux = 999;
        registry.update(reading);

        assert_eq!(registry.get(&TEST_ADDRESS).unwrap().light_level_lux, 999);
    }

    #[test]
    fn test_iter_is_ordered_by_address() {
        let mut registry = BeaconRegistry::new();
        let low = DeviceAddress([0x01, 0, 0, 0, 0, 0]);
        registry.update(base_reading(TEST_ADDRESS));
        registry.update(base_reading(low));

        let order: Vec<_> = registry.iter().map(|r| r.address).collect();
        assert_eq!(order, vec![low, TEST_ADDRESS]);
    }
}
