//! Raw HCI socket backend for climate beacon scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges. The controller reports
//! every advertisement it hears, so the service filter is applied here.

use super::{ScanError, ScanEvent, ScanFuture, ScanMode, ScanSettings, ScanSource, ServiceFilter};
use crate::address::DeviceAddress;
use crate::advertisement::local_name;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::{Duration, SystemTime};
use tokio::io::unix::AsyncFd;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_CMD_COMPLETE: u8 = 0x0E;
const EVT_CMD_STATUS: u8 = 0x0F;
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;
const LE_SET_SCAN_PARAMETERS: u16 = (OGF_LE_CTL << 10) | OCF_LE_SET_SCAN_PARAMETERS;
const LE_SET_SCAN_ENABLE: u16 = (OGF_LE_CTL << 10) | OCF_LE_SET_SCAN_ENABLE;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// Max HCI event size
const HCI_MAX_EVENT_SIZE: usize = 258;

/// How long to wait for the controller to answer a command
const HCI_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn events(events: &[u8]) -> Self {
        let mut filter = Self {
            type_mask: 1 << u32::from(HCI_EVENT_PKT),
            event_mask: [0, 0],
            opcode: 0,
        };
        for &event in events {
            let bit = usize::from(event);
            filter.event_mask[bit / 32] |= 1 << (bit % 32);
        }
        filter
    }

    fn le_meta_events() -> Self {
        Self::events(&[EVT_LE_META_EVENT])
    }

    fn command_events() -> Self {
        Self::events(&[EVT_CMD_COMPLETE, EVT_CMD_STATUS])
    }
}

/// Scan interval and window, in 0.625 ms units.
fn scan_timing(mode: ScanMode) -> (u16, u16) {
    match mode {
        // 5.12 s interval, 500 ms window
        ScanMode::LowPower => (0x2000, 0x0320),
        // 4.096 s interval, 1.024 s window
        ScanMode::Balanced => (0x1999, 0x0666),
        // 10 ms interval, 10 ms window
        ScanMode::LowLatency => (0x0010, 0x0010),
    }
}

/// Create an HCI command packet
fn hci_command_packet(opcode: u16, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters command packet
fn scan_parameters_packet(mode: ScanMode) -> Vec<u8> {
    let (interval, window) = scan_timing(mode);
    let mut params = Vec::with_capacity(7);
    params.push(LE_SCAN_PASSIVE);
    params.extend_from_slice(&interval.to_le_bytes());
    params.extend_from_slice(&window.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    hci_command_packet(LE_SET_SCAN_PARAMETERS, &params)
}

/// LE Set Scan Enable command packet
fn scan_enable_packet(enable: bool, filter_duplicates: bool) -> Vec<u8> {
    hci_command_packet(
        LE_SET_SCAN_ENABLE,
        &[u8::from(enable), u8::from(filter_duplicates)],
    )
}

fn last_os_error(what: &str) -> String {
    format!("{what}: {}", io::Error::last_os_error())
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(last_os_error(
            "Failed to create HCI socket",
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(last_os_error(
            "Failed to bind HCI socket",
        )));
    }

    Ok(())
}

/// Set HCI socket filter
fn set_hci_filter(fd: &OwnedFd, filter: &HciFilter) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(last_os_error(
            "Failed to set HCI filter",
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::RadioUnavailable(last_os_error(
            "Failed to send HCI command",
        )));
    }

    Ok(())
}

/// Read one packet from a non-blocking HCI socket.
fn read_packet(fd: &impl AsRawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Status byte of a Command Complete or Command Status event answering
/// `opcode`, or `None` for any other packet.
fn command_status(packet: &[u8], opcode: u16) -> Option<u8> {
    match *packet {
        // packet type, event, length, num packets, opcode, status
        [HCI_EVENT_PKT, EVT_CMD_COMPLETE, _, _, lo, hi, status, ..]
        // packet type, event, length, status, num packets, opcode
        | [HCI_EVENT_PKT, EVT_CMD_STATUS, _, status, _, lo, hi, ..]
            if u16::from_le_bytes([lo, hi]) == opcode =>
        {
            Some(status)
        }
        _ => None,
    }
}

/// Map a controller status to a result.
fn check_status(opcode: u16, status: u8) -> Result<(), ScanError> {
    if status == 0 {
        Ok(())
    } else {
        Err(ScanError::RadioUnavailable(format!(
            "HCI command {opcode:#06x} rejected with status {status:#04x}"
        )))
    }
}

/// Whether an advertisement should be forwarded given the active filter.
///
/// Nothing is forwarded while the scan is stopped.
fn should_forward(active: Option<&ServiceFilter>, record: &[u8]) -> bool {
    active.is_some_and(|filter| filter.matches(record))
}

/// Command socket that waits for the controller's answer to each command.
struct CommandSocket {
    fd: AsyncFd<OwnedFd>,
}

impl CommandSocket {
    fn open() -> Result<Self, ScanError> {
        let fd = open_hci_socket()?;
        bind_hci_socket(&fd, 0)?;
        set_hci_filter(&fd, &HciFilter::command_events())?;
        let fd = AsyncFd::new(fd)
            .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;
        Ok(Self { fd })
    }

    /// Send `packet` and wait until the controller accepts or rejects it.
    async fn execute(&self, opcode: u16, packet: &[u8]) -> Result<(), ScanError> {
        send_hci_command(self.fd.get_ref(), packet)?;
        match tokio::time::timeout(HCI_COMMAND_TIMEOUT, self.wait_status(opcode)).await {
            Ok(status) => check_status(opcode, status?),
            Err(_) => Err(ScanError::RadioUnavailable(format!(
                "HCI command {opcode:#06x} timed out"
            ))),
        }
    }

    async fn wait_status(&self, opcode: u16) -> Result<u8, ScanError> {
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];
        loop {
            let mut guard = self.fd.readable().await.map_err(|e| {
                ScanError::RadioUnavailable(format!("HCI command socket failed: {e}"))
            })?;
            match guard.try_io(|inner| read_packet(inner, &mut buf)) {
                Ok(Ok(n)) => {
                    if let Some(status) = command_status(&buf[..n], opcode) {
                        return Ok(status);
                    }
                }
                Ok(Err(e)) => {
                    return Err(ScanError::RadioUnavailable(format!(
                        "Failed to read HCI event: {e}"
                    )));
                }
                Err(_would_block) => continue,
            }
        }
    }
}

/// Parse the first report of an LE Advertising Report event.
///
/// `packet` is the full HCI event including the packet type byte. Returns
/// `None` for truncated or empty reports.
fn parse_advertising_report(packet: &[u8]) -> Option<ScanEvent> {
    // packet type, event code, parameter length, subevent
    let report = packet.get(4..)?;

    let num_reports = *report.first()?;
    if num_reports == 0 {
        return None;
    }

    // num_reports(1) + event_type(1) + addr_type(1) + address(6) + data_len(1)
    let addr: [u8; 6] = report.get(3..9)?.try_into().ok()?;
    let data_len = usize::from(*report.get(9)?);
    let record = report.get(10..10 + data_len)?;
    let rssi = *report.get(10 + data_len)? as i8;

    Some(ScanEvent {
        address: DeviceAddress::from_le_bytes(addr),
        name: local_name(record),
        rssi: i16::from(rssi),
        record: record.to_vec(),
        received_at: SystemTime::now(),
    })
}

/// Scan source backed by raw HCI sockets on `hci0`.
pub struct HciSource {
    commands: CommandSocket,
    /// Active filter while scanning, `None` while stopped
    active: watch::Sender<Option<ServiceFilter>>,
    reader: JoinHandle<()>,
}

impl HciSource {
    /// Open the event and command sockets and start the report reader.
    pub fn open(events: mpsc::Sender<ScanEvent>) -> Result<Self, ScanError> {
        // Socket for receiving LE meta events
        let fd = open_hci_socket()?;
        bind_hci_socket(&fd, 0)?;
        set_hci_filter(&fd, &HciFilter::le_meta_events())?;

        // Separate socket for commands and their completion events
        let commands = CommandSocket::open()?;

        let async_fd = AsyncFd::new(fd)
            .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

        let (active, active_rx) = watch::channel(None);
        let reader = tokio::spawn(read_reports(async_fd, active_rx, events));

        Ok(Self {
            commands,
            active,
            reader,
        })
    }

    async fn enable(
        &mut self,
        filter: &ServiceFilter,
        settings: &ScanSettings,
    ) -> Result<(), ScanError> {
        if self.active.borrow().is_some() {
            return Ok(());
        }
        self.commands
            .execute(LE_SET_SCAN_PARAMETERS, &scan_parameters_packet(settings.mode))
            .await?;
        self.commands
            .execute(
                LE_SET_SCAN_ENABLE,
                &scan_enable_packet(true, settings.filter_duplicates),
            )
            .await?;
        self.active.send_replace(Some(filter.clone()));
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), ScanError> {
        // Drop in-flight reports even if the controller rejects the command.
        self.active.send_replace(None);
        self.commands
            .execute(LE_SET_SCAN_ENABLE, &scan_enable_packet(false, false))
            .await
    }
}

impl ScanSource for HciSource {
    fn start<'a>(
        &'a mut self,
        filter: &'a ServiceFilter,
        settings: &'a ScanSettings,
    ) -> ScanFuture<'a> {
        Box::pin(self.enable(filter, settings))
    }

    fn stop(&mut self) -> ScanFuture<'_> {
        Box::pin(self.disable())
    }
}

impl Drop for HciSource {
    fn drop(&mut self) {
        self.reader.abort();
        if self.active.borrow().is_some() {
            let _ = send_hci_command(
                self.commands.fd.get_ref(),
                &scan_enable_packet(false, false),
            );
        }
    }
}

/// Read HCI events and forward matching advertisements while scanning.
async fn read_reports(
    async_fd: AsyncFd<OwnedFd>,
    active: watch::Receiver<Option<ServiceFilter>>,
    events: mpsc::Sender<ScanEvent>,
) {
    let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

    loop {
        // Wait for the socket to be readable
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                log::error!("HCI socket failed: {e}");
                break;
            }
        };

        // Drain all available packets before waiting again
        loop {
            let n = match guard.try_io(|inner| read_packet(inner, &mut buf)) {
                Ok(Ok(n)) if n > 0 => n,
                Ok(Ok(_)) => break,  // EOF or empty read
                Ok(Err(_)) => break, // Read error
                Err(_) => break,     // WouldBlock - no more data
            };

            let packet = &buf[..n];
            if n < 4
                || packet[0] != HCI_EVENT_PKT
                || packet[1] != EVT_LE_META_EVENT
                || packet[3] != EVT_LE_ADVERTISING_REPORT
            {
                continue;
            }

            let Some(event) = parse_advertising_report(packet) else {
                log::trace!("skipping truncated advertising report");
                continue;
            };

            let forward = should_forward(active.borrow().as_ref(), &event.record);
            if forward && events.send(event).await.is_err() {
                return;
            }
        }
    }
}
