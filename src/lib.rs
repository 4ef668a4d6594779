#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines, clippy::struct_excessive_bools)]

#[cfg(test)]
extern crate std;

mod fmt;

pub mod acl;
mod address;
pub mod advertising;
pub mod api;
pub mod constants;
pub mod hci;
pub mod processor;

use core::fmt::{Display, Formatter};

pub use address::{Address, AddressType, AddressWithType};

use crate::{acl::AclOptions, advertising::AdvertisingOptions, hci::ErrorCode};

/// Host-side failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Invalid parameter provided (e.g., malformed address)
    InvalidParameter,
    /// Invalid state for the requested operation
    InvalidState,
    /// Input ended before the structure it should contain
    Truncated,
    /// Event code the host does not consume
    UnknownEvent(u8),
    /// A fixed-size table or queue is full
    BufferFull,
    /// The operation needs callbacks that were never registered
    NotRegistered,
    /// The link is not connected
    DeviceNotConnected,
    /// The controller rejected a command
    HciCommandFailed(ErrorCode),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidParameter => f.write_str("invalid parameter"),
            Self::InvalidState => f.write_str("invalid state"),
            Self::Truncated => f.write_str("truncated input"),
            Self::UnknownEvent(code) => write!(f, "unknown event 0x{code:02X}"),
            Self::BufferFull => f.write_str("buffer full"),
            Self::NotRegistered => f.write_str("callbacks not registered"),
            Self::DeviceNotConnected => f.write_str("device not connected"),
            Self::HciCommandFailed(status) => write!(f, "HCI command failed with {status}"),
        }
    }
}

/// Controller capabilities read during bring-up
///
/// The host runner does not read these itself; the platform fills them in from
/// `HCI_Read_BD_ADDR`, `HCI_Read_Buffer_Size`, the LE feature mask and the vendor
/// capabilities before constructing the [`processor::Host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerInfo {
    /// Public device address
    pub public_address: Address,
    /// Number of ACL data packets the controller can buffer
    pub acl_buffer_count: u16,
    /// Largest ACL data payload the controller accepts
    pub acl_buffer_size: u16,
    /// LE Extended Advertising feature bit
    pub supports_extended_advertising: bool,
    /// `HCI_LE_Read_Number_of_Supported_Advertising_Sets`
    pub supported_advertising_sets: u8,
    /// `max_advt_instances` of the vendor capabilities, zero without the extension
    pub vendor_max_advertising_instances: u8,
    /// `HCI_LE_Read_Maximum_Advertising_Data_Length`
    pub maximum_advertising_data_length: u16,
    /// LE Periodic Advertising feature bit
    pub supports_periodic_advertising: bool,
    /// LE Periodic Advertising ADI Support feature bit
    pub supports_periodic_advertising_adi: bool,
}

/// Options for configuring a [`processor::Host`]
///
/// # Examples
///
/// ```rust
/// use linkbird::HostOptions;
///
/// let mut options = HostOptions::default();
/// options.acl.allow_role_switch = false;
/// options.advertising.tx_path_loss_compensation = -3;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostOptions {
    /// Connection tunables
    pub acl: AclOptions,
    /// Advertising tunables
    pub advertising: AdvertisingOptions,
}
