//! Beacon list output.

use crate::output::OutputFormatter;
use crate::reading::SensorReading;
use crate::registry::BeaconRegistry;
use std::fmt::Write;

/// Renders every known beacon, one row each, ordered by address.
///
/// Rows read `<address>  <name>  <temperature> C  <light> lux  <rssi>dBm`.
/// Each render ends with an empty line separating it from the next one.
#[derive(Debug, Default)]
pub struct ListFormatter;

fn row(out: &mut String, reading: &SensorReading) {
    let name = reading.device_name.as_deref().unwrap_or("-");
    let _ = write!(
        out,
        "{}  {:<16}  {:>7.2} C  {:>5} lux  {:>4}dBm",
        reading.address,
        name,
        reading.temperature_celsius,
        reading.light_level_lux,
        reading.signal_strength_dbm
    );
}

impl OutputFormatter for ListFormatter {
    fn format(&self, _reading: &SensorReading, registry: &BeaconRegistry) -> String {
        let mut out = String::new();
        for reading in registry.iter() {
            row(&mut out, reading);
            out.push('\n');
        }
        out
    }
}
