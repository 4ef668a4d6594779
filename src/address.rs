use core::fmt;

use crate::Error;

/// A Bluetooth Device Address (`BD_ADDR`) wrapper for type safety
///
/// Bytes are stored in the over-the-air (little-endian) order used by HCI, so the
/// most significant byte of the printed form is `self.0[5]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address(pub [u8; 6]);

impl Address {
    /// The all-zero address, used as "no address"
    pub const EMPTY: Self = Self([0; 6]);

    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Whether this is the all-zero address
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Format the address as a colon-separated hex string, most significant byte first
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";

        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().rev().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            result.push(HEX[(byte >> 4) as usize] as char).ok();
            result.push(HEX[(byte & 0x0F) as usize] as char).ok();
        }
        result
    }

    /// Parse a Bluetooth address from a colon-separated hex string, most significant byte first
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if the string is not exactly 17 characters long
    /// or contains invalid characters
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        if hex.len() != 17 || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(Error::InvalidParameter);
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in hex.split(':').enumerate() {
            if i >= 6 || byte.len() != 2 {
                return Err(Error::InvalidParameter);
            }
            bytes[5 - i] = u8::from_str_radix(byte, 16).map_err(|_| Error::InvalidParameter)?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_hex())
    }
}

impl From<[u8; 6]> for Address {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<Address> for [u8; 6] {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl From<Address> for bt_hci::param::BdAddr {
    fn from(addr: Address) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl TryFrom<&str> for Address {
    type Error = Error;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        Address::from_hex(hex)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let addr: [u8; 6] = bytes.try_into().map_err(|_| Error::InvalidParameter)?;
        Ok(Address(addr))
    }
}

impl TryFrom<bt_hci::param::BdAddr> for Address {
    type Error = Error;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        bd_addr.raw().try_into()
    }
}

/// Address type as carried in HCI LE commands and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AddressType {
    /// Public device address
    #[default]
    PublicDevice = 0x00,
    /// Random device address (static, resolvable or non-resolvable)
    RandomDevice = 0x01,
    /// Public identity address (resolved by the controller)
    PublicIdentity = 0x02,
    /// Random static identity address (resolved by the controller)
    RandomIdentity = 0x03,
}

impl AddressType {
    /// Decode an address type byte
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] for reserved values
    pub fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            0x00 => Ok(Self::PublicDevice),
            0x01 => Ok(Self::RandomDevice),
            0x02 => Ok(Self::PublicIdentity),
            0x03 => Ok(Self::RandomIdentity),
            _ => Err(Error::InvalidParameter),
        }
    }

    /// Whether the address is one of the random kinds
    #[must_use]
    pub fn is_random(self) -> bool {
        matches!(self, Self::RandomDevice | Self::RandomIdentity)
    }
}

impl From<AddressType> for bt_hci::param::AddrKind {
    fn from(kind: AddressType) -> Self {
        match kind {
            AddressType::PublicDevice => bt_hci::param::AddrKind::PUBLIC,
            AddressType::RandomDevice => bt_hci::param::AddrKind::RANDOM,
            AddressType::PublicIdentity => bt_hci::param::AddrKind::RESOLVABLE_PRIVATE_OR_PUBLIC,
            AddressType::RandomIdentity => bt_hci::param::AddrKind::RESOLVABLE_PRIVATE_OR_RANDOM,
        }
    }
}

/// An address paired with its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressWithType {
    /// The address bytes
    pub address: Address,
    /// How the address should be interpreted
    pub address_type: AddressType,
}

impl AddressWithType {
    /// Pair an address with its type
    #[must_use]
    pub const fn new(address: Address, address_type: AddressType) -> Self {
        Self {
            address,
            address_type,
        }
    }

    /// A public device address
    #[must_use]
    pub const fn public(address: Address) -> Self {
        Self::new(address, AddressType::PublicDevice)
    }

    /// A random device address
    #[must_use]
    pub const fn random(address: Address) -> Self {
        Self::new(address, AddressType::RandomDevice)
    }
}

impl fmt::Display for AddressWithType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{:?}]", self.address, self.address_type)
    }
}
