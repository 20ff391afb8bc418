//! Helpers for the AD structures inside a raw advertisement record.
//!
//! A record is a sequence of `[length][type][data; length - 1]` elements.
//! A zero length terminates the significant part of the record.

use uuid::Uuid;

// AD types
pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_INCOMPLETE_UUID16: u8 = 0x02;
pub const AD_TYPE_COMPLETE_UUID16: u8 = 0x03;
pub const AD_TYPE_INCOMPLETE_UUID32: u8 = 0x04;
pub const AD_TYPE_COMPLETE_UUID32: u8 = 0x05;
pub const AD_TYPE_INCOMPLETE_UUID128: u8 = 0x06;
pub const AD_TYPE_COMPLETE_UUID128: u8 = 0x07;
pub const AD_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const AD_TYPE_SERVICE_DATA_UUID16: u8 = 0x16;
pub const AD_TYPE_SERVICE_DATA_UUID32: u8 = 0x20;
pub const AD_TYPE_SERVICE_DATA_UUID128: u8 = 0x21;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// The Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expand a 16- or 32-bit assigned number into a full UUID.
pub const fn uuid_from_short(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// The 16- or 32-bit assigned number of `uuid`, if it is built on the base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u32> {
    let value = uuid.as_u128();
    (value & !(u128::from(u32::MAX) << 96) == BLUETOOTH_BASE_UUID).then(|| (value >> 96) as u32)
}

/// `uuid` in the little-endian byte order used on air.
pub fn uuid_to_le_bytes(uuid: &Uuid) -> [u8; 16] {
    let mut bytes = *uuid.as_bytes();
    bytes.reverse();
    bytes
}

fn uuid_from_le_bytes(chunk: &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(chunk);
    bytes.reverse();
    Uuid::from_bytes(bytes)
}

/// One AD structure borrowed from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterator over the AD structures of a record.
///
/// Stops at the first zero-length element or at a structure that would run
/// past the end of the record.
#[derive(Debug, Clone)]
pub struct AdStructures<'a> {
    record: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.record.get(self.offset)? as usize;
        if len == 0 || self.offset + 1 + len > self.record.len() {
            return None;
        }

        let ad_type = self.record[self.offset + 1];
        let data = &self.record[self.offset + 2..self.offset + 1 + len];
        self.offset += 1 + len;

        Some(AdStructure { ad_type, data })
    }
}

/// Iterate over the AD structures of `record`.
pub fn ad_structures(record: &[u8]) -> AdStructures<'_> {
    AdStructures { record, offset: 0 }
}

/// Collect the service UUIDs advertised in `record`.
///
/// Includes 16-, 32- and 128-bit service class lists and the UUID prefix of
/// service data elements.
pub fn service_uuids(record: &[u8]) -> Vec<Uuid> {
    let mut uuids = Vec::new();

    for ad in ad_structures(record) {
        match ad.ad_type {
            AD_TYPE_INCOMPLETE_UUID16 | AD_TYPE_COMPLETE_UUID16 => {
                uuids.extend(
                    ad.data
                        .chunks_exact(2)
                        .map(|c| uuid_from_short(u16::from_le_bytes([c[0], c[1]]).into())),
                );
            }
            AD_TYPE_INCOMPLETE_UUID32 | AD_TYPE_COMPLETE_UUID32 => {
                uuids.extend(
                    ad.data
                        .chunks_exact(4)
                        .map(|c| uuid_from_short(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))),
                );
            }
            AD_TYPE_INCOMPLETE_UUID128 | AD_TYPE_COMPLETE_UUID128 => {
                uuids.extend(ad.data.chunks_exact(16).map(uuid_from_le_bytes));
            }
            AD_TYPE_SERVICE_DATA_UUID16 if ad.data.len() >= 2 => {
                let short = u16::from_le_bytes([ad.data[0], ad.data[1]]);
                uuids.push(uuid_from_short(short.into()));
            }
            AD_TYPE_SERVICE_DATA_UUID32 if ad.data.len() >= 4 => {
                let short = u32::from_le_bytes([ad.data[0], ad.data[1], ad.data[2], ad.data[3]]);
                uuids.push(uuid_from_short(short));
            }
            AD_TYPE_SERVICE_DATA_UUID128 if ad.data.len() >= 16 => {
                uuids.push(uuid_from_le_bytes(&ad.data[..16]));
            }
            _ => {}
        }
    }

    uuids
}

/// The complete local name of the advertiser, or the shortened one.
pub fn local_name(record: &[u8]) -> Option<String> {
    let mut shortened = None;

    for ad in ad_structures(record) {
        match ad.ad_type {
            AD_TYPE_COMPLETE_LOCAL_NAME => {
                return Some(String::from_utf8_lossy(ad.data).into_owned());
            }
            AD_TYPE_SHORTENED_LOCAL_NAME if shortened.is_none() => {
                shortened = Some(String::from_utf8_lossy(ad.data).into_owned());
            }
            _ => {}
        }
    }

    shortened
}

/// Append one AD structure to `record`.
///
/// Returns `false`, leaving `record` untouched, when `data` does not fit a
/// one-byte length.
pub fn push_ad_structure(record: &mut Vec<u8>, ad_type: u8, data: &[u8]) -> bool {
    let Ok(len) = u8::try_from(data.len() + 1) else {
        return false;
    };
    record.push(len);
    record.push(ad_type);
    record.extend_from_slice(data);
    true
}
