//! Advertising set configuration

use crate::{
    AddressWithType,
    advertising::{encryption::KeyMaterial, gap::GapPayload},
    constants::{
        KEY_MATERIAL_NAME, MAX_ADVERTISING_FRAGMENT_LENGTH, MAX_PERIODIC_FRAGMENT_LENGTH,
    },
};

/// Address type a registrant asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertiserAddressType {
    /// Public or static identity address
    #[default]
    Public,
    /// Resolvable private address
    ResolvableRandom,
    /// Non-resolvable private address
    NonResolvableRandom,
}

/// PDU type of legacy advertising
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LegacyAdvertisingType {
    /// Connectable and scannable undirected
    #[default]
    AdvInd = 0x00,
    /// Connectable high duty cycle directed
    AdvDirectIndHigh = 0x01,
    /// Scannable undirected
    AdvScanInd = 0x02,
    /// Non-connectable undirected
    AdvNonconnInd = 0x03,
    /// Connectable low duty cycle directed
    AdvDirectIndLow = 0x04,
}

impl LegacyAdvertisingType {
    /// Whether a peer can connect
    #[must_use]
    pub fn is_connectable(self) -> bool {
        matches!(
            self,
            Self::AdvInd | Self::AdvDirectIndHigh | Self::AdvDirectIndLow
        )
    }

    /// Whether a scan response is sent
    #[must_use]
    pub fn is_scannable(self) -> bool {
        matches!(self, Self::AdvInd | Self::AdvScanInd)
    }

    /// Whether the PDU is addressed to one peer
    #[must_use]
    pub fn is_directed(self) -> bool {
        matches!(self, Self::AdvDirectIndHigh | Self::AdvDirectIndLow)
    }
}

/// Periodic advertising train of an extended set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeriodicAdvertisingParameters {
    /// Start the train together with the set
    pub enable: bool,
    /// Include the ADI field in AUX_SYNC_IND
    pub include_adi: bool,
    /// Minimum interval in 1.25 ms units
    pub min_interval: u16,
    /// Maximum interval in 1.25 ms units
    pub max_interval: u16,
    /// Include the tx power in the periodic PDUs
    pub include_tx_power: bool,
}

impl PeriodicAdvertisingParameters {
    const INCLUDE_TX_POWER: u16 = 1 << 6;

    /// Properties field of `LE_Set_Periodic_Advertising_Parameters`
    #[must_use]
    pub fn properties(&self) -> u16 {
        if self.include_tx_power {
            Self::INCLUDE_TX_POWER
        } else {
            0
        }
    }
}

/// Everything needed to create an advertising set
///
/// Legacy and vendor controllers only look at `advertising_type`; extended controllers
/// build their event properties from the flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingConfig {
    /// Advertising data
    pub advertisement: GapPayload,
    /// Scan response data
    pub scan_response: GapPayload,
    /// Periodic advertising data
    pub periodic_data: GapPayload,
    /// Elements sealed into the advertising data
    pub advertisement_enc: GapPayload,
    /// Elements sealed into the scan response
    pub scan_response_enc: GapPayload,
    /// Elements sealed into the periodic data
    pub periodic_data_enc: GapPayload,
    /// Minimum interval in 0.625 ms units
    pub interval_min: u32,
    /// Maximum interval in 0.625 ms units
    pub interval_max: u32,
    /// PDU type for legacy and vendor controllers
    pub advertising_type: LegacyAdvertisingType,
    /// Requested own address type
    pub requested_address_type: AdvertiserAddressType,
    /// Directed peer
    pub peer_address: AddressWithType,
    /// Primary channel map, bit 0 is channel 37
    pub channel_map: u8,
    /// Filter policy
    pub filter_policy: u8,
    /// Requested tx power in dBm
    pub tx_power: i8,
    /// Use legacy PDUs on an extended controller
    pub legacy_pdus: bool,
    /// Connectable
    pub connectable: bool,
    /// Scannable
    pub scannable: bool,
    /// Discoverable, selects whether Flags are added
    pub discoverable: bool,
    /// Directed
    pub directed: bool,
    /// High duty cycle directed
    pub high_duty_directed: bool,
    /// Omit the advertiser address
    pub anonymous: bool,
    /// Include the tx power in the extended header
    pub include_tx_power: bool,
    /// Use LE Coded on the primary channel
    pub use_le_coded_phy: bool,
    /// Secondary channel max skip
    pub secondary_max_skip: u8,
    /// Secondary PHY
    pub secondary_phy: u8,
    /// Report scan requests
    pub enable_scan_request_notifications: bool,
    /// Periodic train
    pub periodic_parameters: PeriodicAdvertisingParameters,
    /// Key material to use instead of the stored one
    pub enc_key_material: Option<KeyMaterial>,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self {
            advertisement: GapPayload::new(),
            scan_response: GapPayload::new(),
            periodic_data: GapPayload::new(),
            advertisement_enc: GapPayload::new(),
            scan_response_enc: GapPayload::new(),
            periodic_data_enc: GapPayload::new(),
            interval_min: 0x0800,
            interval_max: 0x0800,
            advertising_type: LegacyAdvertisingType::AdvInd,
            requested_address_type: AdvertiserAddressType::Public,
            peer_address: AddressWithType::default(),
            channel_map: 0x07,
            filter_policy: 0,
            tx_power: 0,
            legacy_pdus: false,
            connectable: false,
            scannable: false,
            discoverable: false,
            directed: false,
            high_duty_directed: false,
            anonymous: false,
            include_tx_power: false,
            use_le_coded_phy: false,
            secondary_max_skip: 0,
            secondary_phy: 1,
            enable_scan_request_notifications: false,
            periodic_parameters: PeriodicAdvertisingParameters::default(),
            enc_key_material: None,
        }
    }
}

impl AdvertisingConfig {
    const CONNECTABLE: u16 = 1 << 0;
    const SCANNABLE: u16 = 1 << 1;
    const DIRECTED: u16 = 1 << 2;
    const HIGH_DUTY_DIRECTED: u16 = 1 << 3;
    const LEGACY: u16 = 1 << 4;
    const ANONYMOUS: u16 = 1 << 5;
    const INCLUDE_TX_POWER: u16 = 1 << 6;

    /// Event properties of `LE_Set_Extended_Advertising_Parameters`
    ///
    /// Legacy PDUs only come in the five combinations the Core allows, so those are
    /// picked as a whole.
    #[must_use]
    pub fn extended_properties(&self) -> u16 {
        if self.legacy_pdus {
            return match (self.connectable, self.scannable, self.directed) {
                (true, _, true) if self.high_duty_directed => {
                    Self::LEGACY | Self::HIGH_DUTY_DIRECTED | Self::DIRECTED | Self::CONNECTABLE
                }
                (true, _, true) => Self::LEGACY | Self::DIRECTED | Self::CONNECTABLE,
                (true, _, false) => Self::LEGACY | Self::SCANNABLE | Self::CONNECTABLE,
                (false, true, _) => Self::LEGACY | Self::SCANNABLE,
                (false, false, _) => Self::LEGACY,
            };
        }
        let mut properties = 0;
        for (set, bit) in [
            (self.connectable, Self::CONNECTABLE),
            (self.scannable, Self::SCANNABLE),
            (self.directed, Self::DIRECTED),
            (self.high_duty_directed, Self::HIGH_DUTY_DIRECTED),
            (self.anonymous, Self::ANONYMOUS),
            (self.include_tx_power, Self::INCLUDE_TX_POWER),
        ] {
            if set {
                properties |= bit;
            }
        }
        properties
    }

    /// Reject combinations the controller would refuse
    #[must_use]
    pub fn is_valid_extended(&self) -> bool {
        if self.directed && self.peer_address.address.is_empty() {
            return false;
        }
        if self.channel_map == 0 {
            return false;
        }
        if !self.legacy_pdus
            && ((self.connectable && self.scannable) || self.high_duty_directed)
        {
            return false;
        }
        self.interval_min <= self.interval_max
    }
}

/// Advertising tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvertisingOptions {
    /// Added to the controller's tx power before reporting it
    pub tx_path_loss_compensation: i8,
    /// Data per extended data command
    pub fragment_length: usize,
    /// Data per periodic data command
    pub periodic_fragment_length: usize,
    /// Key store entry of the encrypted advertising key material
    pub key_material_name: &'static str,
}

impl Default for AdvertisingOptions {
    fn default() -> Self {
        Self {
            tx_path_loss_compensation: 0,
            fragment_length: MAX_ADVERTISING_FRAGMENT_LENGTH,
            periodic_fragment_length: MAX_PERIODIC_FRAGMENT_LENGTH,
            key_material_name: KEY_MATERIAL_NAME,
        }
    }
}
