//! Command construction for the three advertising HCI generations
//!
//! The manager picks one backend when it is created and never looks at the generation
//! again; everything that differs between legacy, vendor multi-advertising and extended
//! advertising is answered here.

use heapless::Vec;

use crate::{
    Address, AddressWithType, ControllerInfo, Error,
    advertising::config::AdvertisingConfig,
    constants::{ADVERTISING_SID_MODULUS, MAX_ADVERTISING_DATA_LENGTH, MAX_ADVERTISING_SETS},
    hci::{Command, EnabledSet, MultiAdvtCommand, Operation},
};

/// Fragment preference sent with extended data: the controller should not fragment
const CONTROLLER_SHOULD_NOT_FRAGMENT: u8 = 0x01;

const PHY_1M: u8 = 0x01;
const PHY_CODED: u8 = 0x03;

/// HCI generation used for advertising
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertisingApi {
    /// `LE_Set_Advertising_*`, a single set
    Legacy,
    /// Vendor `LE_MULTI_ADVT`
    AndroidHci,
    /// `LE_Set_Extended_Advertising_*`
    Extended,
}

impl AdvertisingApi {
    /// Best generation the controller supports
    #[must_use]
    pub fn select(controller: &ControllerInfo) -> Self {
        if controller.supports_extended_advertising {
            Self::Extended
        } else if controller.vendor_max_advertising_instances > 0 {
            Self::AndroidHci
        } else {
            Self::Legacy
        }
    }

    /// Whether set termination arrives before the set's identity is known to the ACL manager
    #[must_use]
    pub fn terminates_sets(self) -> bool {
        self != Self::Legacy
    }

    pub(crate) fn backend(self) -> &'static dyn AdvertisingBackend {
        match self {
            Self::Legacy => &LegacyBackend,
            Self::AndroidHci => &VendorBackend,
            Self::Extended => &ExtendedBackend,
        }
    }
}

/// Which payload of a set a data command carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PayloadKind {
    /// Advertising data
    Advertisement,
    /// Scan response data
    ScanResponse,
    /// Periodic advertising data
    Periodic,
}

/// Inputs of a parameters command
pub(crate) struct ParameterSet<'a> {
    pub id: u8,
    pub config: &'a AdvertisingConfig,
    pub own_address: AddressWithType,
    pub tx_power: i8,
}

impl ParameterSet<'_> {
    fn own_address_type(&self) -> u8 {
        u8::from(self.own_address.address_type.is_random())
    }
}

fn legacy_interval(interval: u32) -> u16 {
    u16::try_from(interval).unwrap_or(u16::MAX)
}

fn legacy_payload(chunk: &[u8]) -> Result<Vec<u8, 31>, Error> {
    Vec::from_slice(chunk).map_err(|()| Error::BufferFull)
}

pub(crate) trait AdvertisingBackend {
    /// Lowest advertiser id handed out
    fn first_id(&self) -> u8 {
        0
    }

    /// Number of ids, `first_id` included
    fn instances(&self, controller: &ControllerInfo) -> u8;

    /// Largest serialized payload of a set
    fn max_data_length(&self, controller: &ControllerInfo, legacy_pdus: bool) -> usize;

    /// Data is cut into fragments rather than sent whole
    fn fragments_data(&self) -> bool {
        false
    }

    /// The parameters completion carries the tx power the controller picked
    fn selects_tx_power(&self) -> bool {
        false
    }

    /// Random addresses come from the initiator rather than per set
    fn shares_initiator_address(&self) -> bool {
        false
    }

    /// One enable command covers every set
    fn batches_enable(&self) -> bool;

    /// Periodic advertising commands exist
    fn supports_periodic(&self) -> bool {
        false
    }

    fn parameters(&self, set: &ParameterSet<'_>) -> Command;

    fn data(
        &self,
        id: u8,
        kind: PayloadKind,
        operation: Operation,
        chunk: &[u8],
    ) -> Result<Command, Error>;

    fn enable(&self, enable: bool, sets: &[EnabledSet]) -> Command;

    fn random_address(&self, _id: u8, _address: Address) -> Option<Command> {
        None
    }

    fn remove(&self, _id: u8) -> Option<Command> {
        None
    }
}

struct LegacyBackend;

impl AdvertisingBackend for LegacyBackend {
    fn instances(&self, _controller: &ControllerInfo) -> u8 {
        1
    }

    fn max_data_length(&self, _controller: &ControllerInfo, _legacy_pdus: bool) -> usize {
        31
    }

    fn shares_initiator_address(&self) -> bool {
        true
    }

    fn batches_enable(&self) -> bool {
        true
    }

    fn parameters(&self, set: &ParameterSet<'_>) -> Command {
        Command::LeSetAdvertisingParameters {
            interval_min: legacy_interval(set.config.interval_min),
            interval_max: legacy_interval(set.config.interval_max),
            advertising_type: set.config.advertising_type as u8,
            own_address_type: set.own_address_type(),
            peer: set.config.peer_address,
            channel_map: set.config.channel_map,
            filter_policy: set.config.filter_policy,
        }
    }

    fn data(
        &self,
        _id: u8,
        kind: PayloadKind,
        _operation: Operation,
        chunk: &[u8],
    ) -> Result<Command, Error> {
        let data = legacy_payload(chunk)?;
        match kind {
            PayloadKind::Advertisement => Ok(Command::LeSetAdvertisingData { data }),
            PayloadKind::ScanResponse => Ok(Command::LeSetScanResponseData { data }),
            PayloadKind::Periodic => Err(Error::InvalidState),
        }
    }

    fn enable(&self, enable: bool, _sets: &[EnabledSet]) -> Command {
        Command::LeSetAdvertisingEnable { enable }
    }
}

struct VendorBackend;

impl AdvertisingBackend for VendorBackend {
    fn first_id(&self) -> u8 {
        1
    }

    fn instances(&self, controller: &ControllerInfo) -> u8 {
        let instances = controller.vendor_max_advertising_instances.saturating_add(1);
        instances.min(MAX_ADVERTISING_SETS as u8)
    }

    fn max_data_length(&self, _controller: &ControllerInfo, _legacy_pdus: bool) -> usize {
        31
    }

    fn batches_enable(&self) -> bool {
        false
    }

    fn parameters(&self, set: &ParameterSet<'_>) -> Command {
        Command::LeMultiAdvt(MultiAdvtCommand::SetParam {
            interval_min: legacy_interval(set.config.interval_min),
            interval_max: legacy_interval(set.config.interval_max),
            advertising_type: set.config.advertising_type as u8,
            own_address_type: set.own_address_type(),
            own_address: set.own_address.address,
            peer: set.config.peer_address,
            channel_map: set.config.channel_map,
            filter_policy: set.config.filter_policy,
            instance: set.id,
            tx_power: set.tx_power,
        })
    }

    fn data(
        &self,
        id: u8,
        kind: PayloadKind,
        _operation: Operation,
        chunk: &[u8],
    ) -> Result<Command, Error> {
        let data = legacy_payload(chunk)?;
        match kind {
            PayloadKind::Advertisement => Ok(Command::LeMultiAdvt(MultiAdvtCommand::SetData {
                data,
                instance: id,
            })),
            PayloadKind::ScanResponse => {
                Ok(Command::LeMultiAdvt(MultiAdvtCommand::SetScanResp {
                    data,
                    instance: id,
                }))
            }
            PayloadKind::Periodic => Err(Error::InvalidState),
        }
    }

    fn enable(&self, enable: bool, sets: &[EnabledSet]) -> Command {
        let instance = sets
            .first()
            .map_or(EnabledSet::INVALID_HANDLE, |set| set.advertising_handle);
        Command::LeMultiAdvt(MultiAdvtCommand::SetEnable { enable, instance })
    }

    fn random_address(&self, id: u8, address: Address) -> Option<Command> {
        Some(Command::LeMultiAdvt(MultiAdvtCommand::SetRandomAddr {
            address,
            instance: id,
        }))
    }
}

struct ExtendedBackend;

impl AdvertisingBackend for ExtendedBackend {
    fn instances(&self, controller: &ControllerInfo) -> u8 {
        controller
            .supported_advertising_sets
            .min(MAX_ADVERTISING_SETS as u8)
    }

    fn max_data_length(&self, controller: &ControllerInfo, legacy_pdus: bool) -> usize {
        if legacy_pdus {
            31
        } else {
            usize::from(controller.maximum_advertising_data_length).min(MAX_ADVERTISING_DATA_LENGTH)
        }
    }

    fn fragments_data(&self) -> bool {
        true
    }

    fn selects_tx_power(&self) -> bool {
        true
    }

    fn batches_enable(&self) -> bool {
        true
    }

    fn supports_periodic(&self) -> bool {
        true
    }

    fn parameters(&self, set: &ParameterSet<'_>) -> Command {
        let config = set.config;
        Command::LeSetExtendedAdvertisingParameters {
            handle: set.id,
            properties: config.extended_properties(),
            interval_min: config.interval_min,
            interval_max: config.interval_max,
            channel_map: config.channel_map,
            own_address_type: set.own_address_type(),
            peer: config.peer_address,
            filter_policy: config.filter_policy,
            tx_power: set.tx_power,
            primary_phy: if config.use_le_coded_phy {
                PHY_CODED
            } else {
                PHY_1M
            },
            secondary_max_skip: config.secondary_max_skip,
            secondary_phy: config.secondary_phy,
            sid: set.id % ADVERTISING_SID_MODULUS,
            scan_request_notification_enable: config.enable_scan_request_notifications,
        }
    }

    fn data(
        &self,
        id: u8,
        kind: PayloadKind,
        operation: Operation,
        chunk: &[u8],
    ) -> Result<Command, Error> {
        match kind {
            PayloadKind::Advertisement => Ok(Command::LeSetExtendedAdvertisingData {
                handle: id,
                operation,
                fragment_preference: CONTROLLER_SHOULD_NOT_FRAGMENT,
                data: Vec::from_slice(chunk).map_err(|()| Error::BufferFull)?,
            }),
            PayloadKind::ScanResponse => Ok(Command::LeSetExtendedScanResponseData {
                handle: id,
                operation,
                fragment_preference: CONTROLLER_SHOULD_NOT_FRAGMENT,
                data: Vec::from_slice(chunk).map_err(|()| Error::BufferFull)?,
            }),
            PayloadKind::Periodic => Ok(Command::LeSetPeriodicAdvertisingData {
                handle: id,
                operation,
                data: Vec::from_slice(chunk).map_err(|()| Error::BufferFull)?,
            }),
        }
    }

    fn enable(&self, enable: bool, sets: &[EnabledSet]) -> Command {
        Command::LeSetExtendedAdvertisingEnable {
            enable,
            sets: sets.iter().copied().collect(),
        }
    }

    fn random_address(&self, id: u8, address: Address) -> Option<Command> {
        Some(Command::LeSetAdvertisingSetRandomAddress {
            handle: id,
            address,
        })
    }

    fn remove(&self, id: u8) -> Option<Command> {
        Some(Command::LeRemoveAdvertisingSet { handle: id })
    }
}
