//! `climate-beacon-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The core "business logic" lives in [`crate::app`] where
//! it can be tested deterministically with an injected scan source.

pub mod address;
pub mod advertisement;
pub mod app;
pub mod climate;
pub mod duty_cycle;
pub mod output;
pub mod reading;
pub mod registry;
pub mod scanner;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use address::DeviceAddress;
pub use climate::{DecodeError, decode_advertisement};
pub use duty_cycle::{CycleConfig, CycleState, DutyCycler, parse_duration, parse_window};
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use output::list::ListFormatter;
pub use reading::SensorReading;
pub use registry::BeaconRegistry;
pub use scanner::{Backend, ScanError, ScanEvent, ScanSettings, ScanSource, ServiceFilter};
