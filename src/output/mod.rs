//! Output formatters for beacon readings.
//!
//! A formatter is invoked once per registry update and returns the text to
//! write for it: either a re-render of every known beacon or a single line
//! for the new reading.

pub mod influxdb;
pub mod list;

use crate::reading::SensorReading;
use crate::registry::BeaconRegistry;

/// Trait for rendering registry updates into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Render the update that stored `reading` into `registry`.
    ///
    /// The caller terminates the returned text with a newline.
    fn format(&self, reading: &SensorReading, registry: &BeaconRegistry) -> String;
}

/// Available output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Re-render the list of all beacons on every update
    #[default]
    List,
    /// One InfluxDB line protocol point per reading
    Influxdb,
}
