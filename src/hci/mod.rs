//! HCI command and event plumbing
//!
//! Typed commands the managers emit, the events they consume, and the transport seam
//! that carries both. Wire formats follow Core Vol 4, Part E; the vendor multi-advertising
//! command follows the Android HCI extension.

pub mod bytes;
pub mod command;
pub mod event;
pub mod opcode;
pub mod status;
pub mod transport;

pub use command::{Command, EnabledSet, FlowSpec, MultiAdvtCommand, Operation, QosSpec};
pub use event::{Event, LeMetaEvent, VendorEvent};
pub use opcode::{MultiAdvtSubOp, OpCode};
pub use status::ErrorCode;
pub use transport::{CommandQueue, HciTransport};

/// A 12-bit connection handle assigned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionHandle(u16);

impl ConnectionHandle {
    /// Largest handle a controller may assign
    pub const MAX: u16 = 0x0EFF;

    /// Wrap a raw handle, discarding the flag bits
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw & 0x0FFF)
    }

    /// Raw 12-bit value
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl From<bt_hci::param::ConnHandle> for ConnectionHandle {
    fn from(handle: bt_hci::param::ConnHandle) -> Self {
        Self::new(handle.raw())
    }
}

impl TryFrom<ConnectionHandle> for bt_hci::param::ConnHandle {
    type Error = crate::Error;

    /// Handles above `0x0EFF` are reserved and cannot go on the wire
    fn try_from(handle: ConnectionHandle) -> Result<Self, Self::Error> {
        if handle.0 > ConnectionHandle::MAX {
            return Err(crate::Error::InvalidParameter);
        }
        Ok(bt_hci::param::ConnHandle::new(handle.0))
    }
}

/// Link role of the local device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Role {
    /// Central (formerly master)
    #[default]
    Central = 0x00,
    /// Peripheral (formerly slave)
    Peripheral = 0x01,
}

impl Role {
    /// Decode a role byte; anything but zero is treated as peripheral
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            Self::Central
        } else {
            Self::Peripheral
        }
    }
}

/// Physical transport of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transport {
    /// BR/EDR
    Classic,
    /// Low energy
    Le,
}

/// Power mode of a classic link as reported by Mode Change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkMode {
    /// Active mode
    Active,
    /// Hold mode
    Hold,
    /// Sniff mode
    Sniff,
    /// Park mode (reported by older peers only)
    Park,
}

impl LinkMode {
    /// Decode a current-mode byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Active),
            0x01 => Some(Self::Hold),
            0x02 => Some(Self::Sniff),
            0x03 => Some(Self::Park),
            _ => None,
        }
    }
}
