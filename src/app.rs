//! Core application runner (business logic) for `climate-beacon-listener`.
//!
//! This module is intentionally decoupled from CLI parsing, backend selection
//! and process exit codes so it can be tested deterministically with an
//! injected scan source.

use crate::climate::{TEMPERATURE_SERVICE, decode_advertisement};
use crate::duty_cycle::{CycleConfig, DutyCycler, parse_window};
use crate::output::influxdb::InfluxDbFormatter;
use crate::output::list::ListFormatter;
use crate::output::{Format, OutputFormatter};
use crate::registry::BeaconRegistry;
use crate::scanner::{Backend, ScanError, ScanEvent, ScanMode, ScanSettings, ScanSource, ServiceFilter};
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(about, version)]
pub struct Options {
    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// How long each scanning window lasts.
    /// Accepts duration with suffix: 5s, 1m, 500ms, 2h. Must not be zero.
    #[arg(long, default_value = "5s", value_parser = parse_window)]
    pub active_window: Duration,

    /// Pause between scanning windows. Must not be zero.
    #[arg(long, default_value = "2500ms", value_parser = parse_window)]
    pub idle_window: Duration,

    /// Radio duty mode while scanning
    #[arg(long, default_value_t, value_enum)]
    pub scan_mode: ScanMode,

    /// Only report beacons advertising this service UUID (repeatable).
    /// Defaults to the climate temperature service.
    #[arg(long = "service", value_name = "UUID")]
    pub services: Vec<Uuid>,

    /// Report every advertisement regardless of advertised services
    #[arg(long, conflicts_with = "services")]
    pub all_devices: bool,

    /// Ask the radio to report repeated advertisements from the same beacon
    #[arg(long)]
    pub allow_duplicates: bool,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "climate_beacon")]
    pub influxdb_measurement: String,

    /// Verbose output, print decode errors for malformed advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    /// Service filter selected by `--service` / `--all-devices`.
    pub fn service_filter(&self) -> ServiceFilter {
        if self.all_devices {
            ServiceFilter::default()
        } else if self.services.is_empty() {
            ServiceFilter::service(TEMPERATURE_SERVICE)
        } else {
            ServiceFilter {
                uuids: self.services.clone(),
            }
        }
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            mode: self.scan_mode,
            filter_duplicates: !self.allow_duplicates,
        }
    }

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            active_window: self.active_window,
            idle_window: self.idle_window,
        }
    }

    fn formatter(&self) -> Box<dyn OutputFormatter> {
        match self.format {
            Format::List => Box::new(ListFormatter),
            Format::Influxdb => Box::new(InfluxDbFormatter::new(
                self.influxdb_measurement.clone(),
            )),
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decode one event, store it and write the formatter's output.
fn handle_event(
    event: ScanEvent,
    registry: &mut BeaconRegistry,
    formatter: &dyn OutputFormatter,
    verbose: bool,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<()> {
    match decode_advertisement(&event) {
        Ok(reading) => {
            log::debug!(
                "{} ({}dBm): {:.2} C, {} lux",
                reading.display_name(),
                reading.signal_strength_dbm,
                reading.temperature_celsius,
                reading.light_level_lux
            );
            registry.update(reading.clone());
            writeln!(out, "{}", formatter.format(&reading, registry))
        }
        Err(decode_err) => {
            log::debug!("dropping advertisement from {}: {decode_err}", event.address);
            if verbose {
                writeln!(err, "{}: {decode_err}", event.address)?;
            }
            Ok(())
        }
    }
}

/// Run the duty cycle and the processing loop until `shutdown` resolves or
/// the event stream ends.
///
/// - `source` is driven by a [`DutyCycler`] and must send its advertisements
///   to the sender paired with `events`.
/// - Events are consumed here one at a time; this loop is the only owner of
///   the registry.
/// - Decoded readings are rendered to `out`; decode errors go to `err` only
///   when `options.verbose` is true.
///
/// The duty cycle is shut down, and the source stopped, before returning.
pub async fn run_with_io(
    options: Options,
    source: Box<dyn ScanSource>,
    mut events: mpsc::Receiver<ScanEvent>,
    shutdown: impl Future<Output = ()>,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<BeaconRegistry, RunError> {
    let formatter = options.formatter();
    let mut registry = BeaconRegistry::new();

    let cycler = DutyCycler::spawn(
        source,
        options.service_filter(),
        options.scan_settings(),
        options.cycle_config(),
    );

    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(e) = handle_event(
                        event,
                        &mut registry,
                        formatter.as_ref(),
                        options.verbose,
                        out,
                        err,
                    ) {
                        break Err(RunError::Io(e));
                    }
                }
                None => break Ok(()),
            },
            _ = &mut shutdown => break Ok(()),
        }
    };

    cycler.shutdown().await;
    log::info!("tracked {} beacon(s)", registry.len());

    result.map(|()| registry)
}
