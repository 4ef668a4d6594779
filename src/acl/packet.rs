//! ACL data packet framing (Core Vol 4, Part E, 5.4.2)

use crate::{Error, constants::ACL_HEADER_SIZE, hci::ConnectionHandle};

/// ACL Packet Boundary flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketBoundary {
    /// First fragment of a non-automatically-flushable PDU (host to controller only)
    FirstNonFlushable = 0x00,
    /// Continuing fragment
    ContinuingFragment = 0x01,
    /// First fragment of an automatically-flushable PDU
    FirstFlushable = 0x02,
    /// A complete automatically-flushable PDU (LE and AMP only)
    CompletePdu = 0x03,
}

impl PacketBoundary {
    /// Convert from the two flag bits
    #[must_use]
    pub fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0x00 => Self::FirstNonFlushable,
            0x01 => Self::ContinuingFragment,
            0x02 => Self::FirstFlushable,
            _ => Self::CompletePdu,
        }
    }

    /// Whether the packet starts a new L2CAP PDU
    #[must_use]
    pub fn is_start(self) -> bool {
        !matches!(self, Self::ContinuingFragment)
    }
}

/// ACL Broadcast flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BroadcastFlag {
    /// Point-to-point
    PointToPoint = 0x00,
    /// BR/EDR broadcast
    BrEdrBroadcast = 0x01,
    /// Reserved
    Reserved2 = 0x02,
    /// Reserved
    Reserved3 = 0x03,
}

impl BroadcastFlag {
    /// Convert from the two flag bits
    #[must_use]
    pub fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0x00 => Self::PointToPoint,
            0x01 => Self::BrEdrBroadcast,
            0x02 => Self::Reserved2,
            _ => Self::Reserved3,
        }
    }
}

/// ACL Data packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AclHeader {
    /// Connection handle
    pub handle: ConnectionHandle,
    /// Packet boundary flag
    pub packet_boundary: PacketBoundary,
    /// Broadcast flag
    pub broadcast_flag: BroadcastFlag,
    /// Length of the payload following the header
    pub data_length: u16,
}

impl AclHeader {
    /// Size of ACL header in bytes
    pub const SIZE: usize = ACL_HEADER_SIZE;

    /// Create a point-to-point header
    #[must_use]
    pub fn new(handle: ConnectionHandle, packet_boundary: PacketBoundary, data_length: u16) -> Self {
        Self {
            handle,
            packet_boundary,
            broadcast_flag: BroadcastFlag::PointToPoint,
            data_length,
        }
    }

    /// Parse an ACL header
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than four bytes are given
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let [a, b, c, d] = bytes
            .get(..Self::SIZE)
            .and_then(|head| <[u8; 4]>::try_from(head).ok())
            .ok_or(Error::Truncated)?;

        let handle_and_flags = u16::from_le_bytes([a, b]);
        Ok(Self {
            handle: ConnectionHandle::new(handle_and_flags),
            packet_boundary: PacketBoundary::from_bits((handle_and_flags >> 12) as u8),
            broadcast_flag: BroadcastFlag::from_bits((handle_and_flags >> 14) as u8),
            data_length: u16::from_le_bytes([c, d]),
        })
    }

    /// Convert header to bytes
    #[must_use]
    pub fn to_bytes(self) -> [u8; 4] {
        let handle_and_flags = self.handle.raw()
            | ((self.packet_boundary as u16) << 12)
            | ((self.broadcast_flag as u16) << 14);

        let mut bytes = [0u8; 4];
        bytes[0..2].copy_from_slice(&handle_and_flags.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.data_length.to_le_bytes());
        bytes
    }
}

/// A received ACL packet borrowing its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclPacket<'a> {
    /// ACL header
    pub header: AclHeader,
    /// Payload as declared by the header
    pub data: &'a [u8],
}

impl<'a> AclPacket<'a> {
    /// Parse an ACL packet
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if the buffer is shorter than the declared length
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, Error> {
        let header = AclHeader::from_bytes(bytes)?;
        let end = AclHeader::SIZE + usize::from(header.data_length);
        let data = bytes.get(AclHeader::SIZE..end).ok_or(Error::Truncated)?;
        Ok(Self { header, data })
    }
}
