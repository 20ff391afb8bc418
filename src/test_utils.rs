use crate::address::DeviceAddress;
use crate::reading::SensorReading;
use crate::scanner::{ScanError, ScanEvent, ScanFuture, ScanSettings, ScanSource, ServiceFilter};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// A stable address for unit tests.
pub const TEST_ADDRESS: DeviceAddress = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Receive time used by test events: 2001-09-09T01:46:40Z.
pub fn test_time() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000)
}

/// Build a 29-byte climate beacon record carrying the given raw words.
///
/// Layout: flags, the three climate service UUIDs, then a temperature
/// service data element whose tail lands on offsets 23..29.
pub fn climate_record(temperature: u16, light: u16, humidity: u16) -> Vec<u8> {
    let mut record = vec![
        0x02, 0x01, 0x06, // flags
        0x07, 0x03, 0x08, 0x56, 0x0E, 0x56, 0x14, 0x56, // complete 16-bit UUID list
        0x11, 0x16, 0x08, 0x56, // service data for 0x5608
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // offsets 15..23
    ];
    record.extend_from_slice(&temperature.to_be_bytes());
    record.extend_from_slice(&light.to_be_bytes());
    record.extend_from_slice(&humidity.to_be_bytes());
    record
}

/// Wrap a record in a scan event from a named beacon.
pub fn climate_event(address: DeviceAddress, record: Vec<u8>) -> ScanEvent {
    ScanEvent {
        address,
        name: Some("Climate_8B6".to_string()),
        rssi: -67,
        record,
        received_at: test_time(),
    }
}

/// Build a reading with neutral sensor values.
///
/// Tests can override just the fields they care about.
pub fn base_reading(address: DeviceAddress) -> SensorReading {
    SensorReading {
        address,
        device_name: None,
        signal_strength_dbm: -70,
        temperature_celsius: 21.5,
        light_level_lux: 120,
        humidity_raw: None,
        timestamp: test_time(),
    }
}

/// A call recorded by [`FakeSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCall {
    Start,
    Stop,
}

/// Scan source that records calls and replays canned events on first start.
#[derive(Default)]
pub struct FakeSource {
    calls: Arc<Mutex<Vec<SourceCall>>>,
    failing_starts: usize,
    failing_stops: usize,
    replay: Option<(mpsc::Sender<ScanEvent>, Vec<ScanEvent>)>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls to `start`.
    pub fn failing_starts(mut self, n: usize) -> Self {
        self.failing_starts = n;
        self
    }

    /// Fail the next `n` calls to `stop`.
    pub fn failing_stops(mut self, n: usize) -> Self {
        self.failing_stops = n;
        self
    }

    /// Send `batch` to `events` on the first successful start, then drop the sender.
    pub fn replaying(mut self, events: mpsc::Sender<ScanEvent>, batch: Vec<ScanEvent>) -> Self {
        self.replay = Some((events, batch));
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<SourceCall>>> {
        Arc::clone(&self.calls)
    }
}

impl ScanSource for FakeSource {
    fn start<'a>(
        &'a mut self,
        _filter: &'a ServiceFilter,
        _settings: &'a ScanSettings,
    ) -> ScanFuture<'a> {
        self.calls.lock().unwrap().push(SourceCall::Start);
        if self.failing_starts > 0 {
            self.failing_starts -= 1;
            return Box::pin(async {
                Err(ScanError::RadioUnavailable("fake radio busy".into()))
            });
        }

        let replay = self.replay.take();
        Box::pin(async move {
            if let Some((events, batch)) = replay {
                for event in batch {
                    let _ = events.send(event).await;
                }
            }
            Ok(())
        })
    }

    fn stop(&mut self) -> ScanFuture<'_> {
        self.calls.lock().unwrap().push(SourceCall::Stop);
        if self.failing_stops > 0 {
            self.failing_stops -= 1;
            return Box::pin(async {
                Err(ScanError::RadioUnavailable("fake radio busy".into()))
            });
        }
        Box::pin(async { Ok(()) })
    }
}
