//! BLE scan sources for climate beacons.
//!
//! Two host scanning APIs are supported behind the [`ScanSource`] trait: the
//! BlueZ D-Bus API (`bluer`) and raw HCI sockets (`hci`). The backend is
//! picked once at start-up; afterwards the duty-cycler only sees the trait.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::address::DeviceAddress;
use crate::advertisement::service_uuids;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The backend could not be opened (no adapter, missing permissions)
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Starting or stopping a scan failed at the host radio stack
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),
}

/// Future returned by [`ScanSource`] operations.
pub type ScanFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>>;

/// Channel buffer size for scan events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// One advertisement as received from the radio.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEvent {
    /// Hardware address of the advertiser
    pub address: DeviceAddress,
    /// Advertised or cached device name
    pub name: Option<String>,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Raw advertisement record
    pub record: Vec<u8>,
    /// When the advertisement was received
    pub received_at: SystemTime,
}

/// Restricts reported advertisements to those advertising given services.
///
/// An empty filter accepts every advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    pub uuids: Vec<Uuid>,
}

impl ServiceFilter {
    /// Filter for a single service.
    pub fn service(uuid: Uuid) -> Self {
        Self { uuids: vec![uuid] }
    }

    /// Whether `record` advertises any of the filtered services.
    pub fn matches(&self, record: &[u8]) -> bool {
        if self.uuids.is_empty() {
            return true;
        }
        service_uuids(record)
            .iter()
            .any(|uuid| self.uuids.contains(uuid))
    }
}

/// Radio duty mode while a scan is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ScanMode {
    /// Short scan windows, least power
    LowPower,
    /// Compromise between latency and power
    Balanced,
    /// Scan continuously while started
    #[default]
    LowLatency,
}

/// Scan parameters passed to [`ScanSource::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Ask the controller to report each advertiser once per scan
    pub filter_duplicates: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            mode: ScanMode::LowLatency,
            filter_duplicates: false,
        }
    }
}

/// A host scanning API.
///
/// Implementations deliver matching advertisements through the event sender
/// they were opened with, and only between `start` and `stop`. Starting an
/// already started source or stopping a stopped one must be harmless.
pub trait ScanSource: Send {
    fn start<'a>(&'a mut self, filter: &'a ServiceFilter, settings: &'a ScanSettings)
    -> ScanFuture<'a>;

    fn stop(&mut self) -> ScanFuture<'_>;
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Open the scan source for `backend`.
///
/// Advertisements are sent to `events` once the source is started.
pub async fn open_source(
    backend: Backend,
    events: mpsc::Sender<ScanEvent>,
) -> Result<Box<dyn ScanSource>, ScanError> {
    log::info!("opening {backend} scan source");
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Ok(Box::new(bluer::BluerSource::open(events).await?)),
        #[cfg(feature = "hci")]
        Backend::Hci => Ok(Box::new(hci::HciSource::open(events)?)),
    }
}
