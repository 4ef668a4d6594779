//! GAP advertising data elements (Core Supplement, Part A)
//!
//! A payload is a list of length-type-value elements. The length byte counts the type
//! byte plus the data, so an element occupies `data.len() + 2` bytes on the air.

use core::fmt;

use heapless::Vec;

use crate::{
    Error,
    constants::{GAP_DATA_CAPACITY, MAX_ADVERTISING_DATA_LENGTH, MAX_GAP_ELEMENTS},
};

/// AD type of a GAP data element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GapDataType(pub u8);

impl GapDataType {
    /// Flags
    pub const FLAGS: Self = Self(0x01);
    /// Incomplete list of 16-bit service UUIDs
    pub const INCOMPLETE_LIST_16_BIT_UUIDS: Self = Self(0x02);
    /// Complete list of 16-bit service UUIDs
    pub const COMPLETE_LIST_16_BIT_UUIDS: Self = Self(0x03);
    /// Shortened local name
    pub const SHORTENED_LOCAL_NAME: Self = Self(0x08);
    /// Complete local name
    pub const COMPLETE_LOCAL_NAME: Self = Self(0x09);
    /// TX power level
    pub const TX_POWER_LEVEL: Self = Self(0x0A);
    /// Service data with a 16-bit UUID
    pub const SERVICE_DATA_16_BIT_UUID: Self = Self(0x16);
    /// Appearance
    pub const APPEARANCE: Self = Self(0x19);
    /// Encrypted data
    pub const ENCRYPTED_ADVERTISING_DATA: Self = Self(0x31);
    /// Manufacturer specific data
    pub const MANUFACTURER_SPECIFIC_DATA: Self = Self(0xFF);
}

/// Bits of the Flags element
pub struct AdvertisingFlags;

impl AdvertisingFlags {
    /// LE Limited Discoverable Mode
    pub const LE_LIMITED_DISCOVERABLE: u8 = 0x01;
    /// LE General Discoverable Mode
    pub const LE_GENERAL_DISCOVERABLE: u8 = 0x02;
    /// BR/EDR Not Supported
    pub const BR_EDR_NOT_SUPPORTED: u8 = 0x04;
}

/// One advertising data element
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GapData {
    /// AD type
    pub data_type: GapDataType,
    /// Element payload without length and type
    pub data: Vec<u8, GAP_DATA_CAPACITY>,
}

impl fmt::Debug for GapData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GapData({:#04x}, {} bytes)", self.data_type.0, self.data.len())
    }
}

impl GapData {
    /// Build an element
    ///
    /// # Errors
    /// Returns [`Error::BufferFull`] if `data` exceeds the element capacity
    pub fn new(data_type: GapDataType, data: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            data_type,
            data: Vec::from_slice(data).map_err(|()| Error::BufferFull)?,
        })
    }

    /// Flags element with a single flags byte
    #[must_use]
    pub fn flags(flags: u8) -> Self {
        let mut data = Vec::new();
        data.push(flags).ok();
        Self {
            data_type: GapDataType::FLAGS,
            data,
        }
    }

    /// Serialized size: length byte, type byte and payload
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len() + 2
    }

    fn write_to<const N: usize>(&self, out: &mut Vec<u8, N>) -> Result<(), Error> {
        let length = u8::try_from(self.data.len() + 1).map_err(|_| Error::InvalidParameter)?;
        out.push(length).map_err(|_| Error::BufferFull)?;
        out.push(self.data_type.0).map_err(|_| Error::BufferFull)?;
        out.extend_from_slice(&self.data)
            .map_err(|()| Error::BufferFull)
    }
}

/// An advertising, scan response or periodic payload
pub type GapPayload = Vec<GapData, MAX_GAP_ELEMENTS>;

/// A serialized payload
pub type SerializedPayload = Vec<u8, MAX_ADVERTISING_DATA_LENGTH>;

/// Sum of the serialized element sizes
#[must_use]
pub fn payload_length(payload: &[GapData]) -> usize {
    payload.iter().map(GapData::size).sum()
}

/// Whether the payload carries a Flags element
#[must_use]
pub fn has_flags(payload: &[GapData]) -> bool {
    payload
        .iter()
        .any(|element| element.data_type == GapDataType::FLAGS)
}

/// Serialize elements back to back
///
/// # Errors
/// * [`Error::InvalidParameter`] if an element is too long for its length byte
/// * [`Error::BufferFull`] if the payload exceeds [`MAX_ADVERTISING_DATA_LENGTH`]
pub fn serialize(payload: &[GapData]) -> Result<SerializedPayload, Error> {
    let mut out = SerializedPayload::new();
    for element in payload {
        element.write_to(&mut out)?;
    }
    Ok(out)
}

/// Parse a serialized payload
///
/// A zero length byte ends the payload, which lets padded legacy data be read back.
///
/// # Errors
/// * [`Error::Truncated`] if an element runs past the end of `bytes`
/// * [`Error::BufferFull`] if there are more elements than a [`GapPayload`] holds
pub fn parse(bytes: &[u8]) -> Result<GapPayload, Error> {
    let mut payload = GapPayload::new();
    let mut rest = bytes;
    while let [length, tail @ ..] = rest {
        let length = usize::from(*length);
        if length == 0 {
            break;
        }
        let element = tail.get(..length).ok_or(Error::Truncated)?;
        let gap = GapData::new(GapDataType(element[0]), &element[1..])?;
        payload.push(gap).map_err(|_| Error::BufferFull)?;
        rest = &tail[length..];
    }
    Ok(payload)
}
