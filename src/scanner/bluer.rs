//! BlueZ D-Bus backend for climate beacon scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running. Service
//! filtering and duplicate suppression are delegated to BlueZ through the
//! discovery filter.

use super::{ScanError, ScanEvent, ScanFuture, ScanSettings, ScanSource, ServiceFilter};
use crate::address::DeviceAddress;
use crate::advertisement::{
    AD_TYPE_COMPLETE_LOCAL_NAME, AD_TYPE_COMPLETE_UUID16, AD_TYPE_COMPLETE_UUID32,
    AD_TYPE_COMPLETE_UUID128, AD_TYPE_FLAGS, AD_TYPE_MANUFACTURER_DATA,
    AD_TYPE_SERVICE_DATA_UUID16, AD_TYPE_SERVICE_DATA_UUID32, AD_TYPE_SERVICE_DATA_UUID128,
    push_ad_structure, short_uuid, uuid_to_le_bytes,
};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

fn radio_unavailable(err: bluer::Error) -> ScanError {
    ScanError::RadioUnavailable(err.to_string())
}

/// Scan source backed by BlueZ device discovery.
pub struct BluerSource {
    _session: Session,
    adapter: Adapter,
    events: mpsc::Sender<ScanEvent>,
    discovery: Option<JoinHandle<()>>,
}

impl BluerSource {
    /// Connect to BlueZ and power on the default adapter.
    pub async fn open(events: mpsc::Sender<ScanEvent>) -> Result<Self, ScanError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        log::debug!("using adapter {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            events,
            discovery: None,
        })
    }

    async fn start_discovery(
        &mut self,
        filter: &ServiceFilter,
        settings: &ScanSettings,
    ) -> Result<(), ScanError> {
        if self.discovery.is_some() {
            return Ok(());
        }

        // BlueZ schedules the radio itself; the scan mode has no D-Bus knob.
        log::debug!("scan mode {:?} is managed by bluetoothd", settings.mode);

        let discovery_filter = DiscoveryFilter {
            uuids: filter.uuids.iter().copied().collect(),
            transport: DiscoveryTransport::Le,
            duplicate_data: !settings.filter_duplicates,
            ..Default::default()
        };
        self.adapter
            .set_discovery_filter(discovery_filter)
            .await
            .map_err(radio_unavailable)?;

        let known = self
            .adapter
            .device_addresses()
            .await
            .map_err(radio_unavailable)?;
        let discoveries = self
            .adapter
            .discover_devices_with_changes()
            .await
            .map_err(radio_unavailable)?;

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let mut cached = CachedDevices::new(known.into_iter().map(DeviceAddress::from));

        // Dropping the stream when this task is aborted ends the discovery session.
        self.discovery = Some(tokio::spawn(async move {
            let mut discoveries = Box::pin(discoveries);
            while let Some(event) = discoveries.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                if cached.is_replay(address.into()) {
                    log::trace!("skipping cached report of {address}");
                    continue;
                }
                match read_advertisement(&adapter, address).await {
                    Ok(Some(scan_event)) => {
                        if events.send(scan_event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::debug!("failed to read {address}: {e}"),
                }
            }
        }));

        Ok(())
    }
}

impl ScanSource for BluerSource {
    fn start<'a>(
        &'a mut self,
        filter: &'a ServiceFilter,
        settings: &'a ScanSettings,
    ) -> ScanFuture<'a> {
        Box::pin(self.start_discovery(filter, settings))
    }

    fn stop(&mut self) -> ScanFuture<'_> {
        Box::pin(async move {
            if let Some(discovery) = self.discovery.take() {
                discovery.abort();
            }
            Ok(())
        })
    }
}

impl Drop for BluerSource {
    fn drop(&mut self) {
        if let Some(discovery) = self.discovery.take() {
            discovery.abort();
        }
    }
}

/// Devices BlueZ already knew when a discovery session started.
///
/// A new session first reports every cached device, carrying whatever was
/// heard in an earlier window. Those first reports are skipped; later
/// reports of the same device come from property changes and are fresh.
#[derive(Debug, Default)]
struct CachedDevices {
    pending: HashSet<DeviceAddress>,
}

impl CachedDevices {
    fn new(known: impl IntoIterator<Item = DeviceAddress>) -> Self {
        Self {
            pending: known.into_iter().collect(),
        }
    }

    /// Whether this report of `address` is the replay of a cached device.
    fn is_replay(&mut self, address: DeviceAddress) -> bool {
        self.pending.remove(&address)
    }
}

/// Advertisement contents as BlueZ exposes them on a device object.
///
/// BlueZ parses flags, service UUIDs, service data, manufacturer data and
/// the local name into typed properties; `AdvertisingData` only keeps the
/// remaining AD types.
#[derive(Debug, Default, Clone, PartialEq)]
struct AdvertisedProperties {
    flags: Option<Vec<u8>>,
    uuids: HashSet<Uuid>,
    service_data: HashMap<Uuid, Vec<u8>>,
    manufacturer_data: HashMap<u16, Vec<u8>>,
    name: Option<String>,
    extra: HashMap<u8, Vec<u8>>,
}

impl AdvertisedProperties {
    /// Rebuild a raw record from the typed properties.
    ///
    /// Elements are laid out in the order a beacon puts them in its
    /// advertising PDU: flags, service UUID lists, service data,
    /// manufacturer data, other AD types by type. The local name goes last,
    /// where a scan response appends it.
    fn to_record(&self) -> Vec<u8> {
        let mut record = Vec::new();

        if let Some(flags) = &self.flags {
            push_ad_structure(&mut record, AD_TYPE_FLAGS, flags);
        }

        let mut uuids: Vec<&Uuid> = self.uuids.iter().collect();
        uuids.sort();
        let (mut uuid16, mut uuid32, mut uuid128) = (Vec::new(), Vec::new(), Vec::new());
        for uuid in uuids {
            match short_uuid(uuid) {
                Some(short) => match u16::try_from(short) {
                    Ok(short) => uuid16.extend_from_slice(&short.to_le_bytes()),
                    Err(_) => uuid32.extend_from_slice(&short.to_le_bytes()),
                },
                None => uuid128.extend_from_slice(&uuid_to_le_bytes(uuid)),
            }
        }
        for (ad_type, list) in [
            (AD_TYPE_COMPLETE_UUID16, uuid16),
            (AD_TYPE_COMPLETE_UUID32, uuid32),
            (AD_TYPE_COMPLETE_UUID128, uuid128),
        ] {
            if !list.is_empty() {
                push_ad_structure(&mut record, ad_type, &list);
            }
        }

        let mut service_data: Vec<(&Uuid, &Vec<u8>)> = self.service_data.iter().collect();
        service_data.sort();
        for (uuid, data) in service_data {
            let (ad_type, mut payload) = match short_uuid(uuid) {
                Some(short) => match u16::try_from(short) {
                    Ok(short) => (AD_TYPE_SERVICE_DATA_UUID16, short.to_le_bytes().to_vec()),
                    Err(_) => (AD_TYPE_SERVICE_DATA_UUID32, short.to_le_bytes().to_vec()),
                },
                None => (AD_TYPE_SERVICE_DATA_UUID128, uuid_to_le_bytes(uuid).to_vec()),
            };
            payload.extend_from_slice(data);
            push_ad_structure(&mut record, ad_type, &payload);
        }

        let mut manufacturer_data: Vec<(&u16, &Vec<u8>)> = self.manufacturer_data.iter().collect();
        manufacturer_data.sort();
        for (company, data) in manufacturer_data {
            let mut payload = company.to_le_bytes().to_vec();
            payload.extend_from_slice(data);
            push_ad_structure(&mut record, AD_TYPE_MANUFACTURER_DATA, &payload);
        }

        let mut extra: Vec<(&u8, &Vec<u8>)> = self.extra.iter().collect();
        extra.sort();
        for (ad_type, data) in extra {
            push_ad_structure(&mut record, *ad_type, data);
        }

        if let Some(name) = &self.name {
            push_ad_structure(&mut record, AD_TYPE_COMPLETE_LOCAL_NAME, name.as_bytes());
        }

        record
    }
}

/// Read the current advertisement of a discovered device.
///
/// Returns `Ok(None)` when the device is known to BlueZ but has not been
/// heard in this session.
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<ScanEvent>, bluer::Error> {
    let device = adapter.device(address)?;

    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };

    let properties = AdvertisedProperties {
        flags: device.advertising_flags().await?,
        uuids: device.uuids().await?.unwrap_or_default(),
        service_data: device.service_data().await?.unwrap_or_default(),
        manufacturer_data: device.manufacturer_data().await?.unwrap_or_default(),
        name: device.name().await?,
        extra: device.advertising_data().await?.unwrap_or_default(),
    };
    let record = properties.to_record();

    Ok(Some(ScanEvent {
        address: address.into(),
        name: properties.name,
        rssi,
        record,
        received_at: SystemTime::now(),
    }))
}
