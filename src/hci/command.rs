//! Typed HCI commands
//!
//! Every command the managers can emit is a [`Command`] variant. Encoding produces the
//! HCI command packet body (opcode, parameter length, parameters) without the H4
//! packet indicator, which belongs to the transport.

use bt_hci::{
    FromHciBytes, WriteHci,
    cmd::{
        Cmd,
        controller_baseband::ReadTransmitPowerLevel,
        le::{
            LeAddDeviceToFilterAcceptList, LeConnUpdate, LeCreateConn, LeCreateConnCancel,
            LeReadAdvPhysicalChannelTxPower, LeRemoveAdvSet, LeRemoveDeviceFromFilterAcceptList,
            LeSetAdvData, LeSetAdvEnable, LeSetAdvParams, LeSetAdvSetRandomAddr, LeSetExtAdvData,
            LeSetExtAdvEnable, LeSetExtAdvParams, LeSetExtScanResponseData, LeSetPeriodicAdvData,
            LeSetPeriodicAdvParams, LeSetScanResponseData,
        },
        link_control::{
            AcceptConnectionRequest, AuthenticationRequested, CreateConnection,
            CreateConnectionCancel, Disconnect, ReadClockOffset, ReadRemoteVersionInformation,
            RejectConnectionRequest,
        },
        status::ReadRssi,
    },
    param::{self as hci, AdvHandle, AdvSet, AllowRoleSwitch, ConnHandle, Duration, ExtDuration},
};
use heapless::Vec;

use crate::{
    Address, AddressWithType, Error,
    constants::{
        COMMAND_BUFFER_SIZE, MAX_ADVERTISING_FRAGMENT_LENGTH, MAX_ADVERTISING_SETS,
        MAX_LEGACY_ADVERTISING_DATA_LENGTH, MAX_PERIODIC_FRAGMENT_LENGTH,
    },
    hci::{ConnectionHandle, ErrorCode, MultiAdvtSubOp, OpCode, Role, bytes::ByteWriter},
};

/// Largest parameter block of a single command
const MAX_PARAMETERS: usize = 255;

/// Fragment position of an extended or periodic data command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Operation {
    /// Intermediate fragment
    Intermediate = 0x00,
    /// First fragment
    First = 0x01,
    /// Last fragment
    Last = 0x02,
    /// The whole payload in one command
    Complete = 0x03,
    /// Keep the data, only change the advertising DID
    UnchangedData = 0x04,
}

impl From<Operation> for hci::Operation {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Intermediate => hci::Operation::IntermediateFragment,
            Operation::First => hci::Operation::FirstFragment,
            Operation::Last => hci::Operation::LastFragment,
            Operation::Complete => hci::Operation::Complete,
            Operation::UnchangedData => hci::Operation::Unchanged,
        }
    }
}

impl Operation {
    /// Whether a completion for this fragment finishes the payload
    #[must_use]
    pub fn finishes_payload(self) -> bool {
        matches!(self, Self::Complete | Self::Last)
    }
}

/// Per-set entry of an extended advertising enable command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnabledSet {
    /// Advertising handle, [`EnabledSet::INVALID_HANDLE`] when the slot is unused
    pub advertising_handle: u8,
    /// Duration in 10 ms units, zero for no limit
    pub duration: u16,
    /// Maximum number of extended advertising events, zero for no limit
    pub max_extended_advertising_events: u8,
}

impl EnabledSet {
    /// Handle value marking an unused slot
    pub const INVALID_HANDLE: u8 = 0xFF;

    /// A disabled slot
    pub const DISABLED: Self = Self {
        advertising_handle: Self::INVALID_HANDLE,
        duration: 0,
        max_extended_advertising_events: 0,
    };

    /// An enable record for `handle` without limits
    #[must_use]
    pub const fn new(handle: u8) -> Self {
        Self {
            advertising_handle: handle,
            duration: 0,
            max_extended_advertising_events: 0,
        }
    }

    /// Whether the slot is in use
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.advertising_handle != Self::INVALID_HANDLE
    }
}

impl Default for EnabledSet {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Parameters of `HCI_QoS_Setup`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QosSpec {
    /// 0 no traffic, 1 best effort, 2 guaranteed
    pub service_type: u8,
    /// Token rate in octets per second
    pub token_rate: u32,
    /// Peak bandwidth in octets per second
    pub peak_bandwidth: u32,
    /// Latency in microseconds
    pub latency: u32,
    /// Delay variation in microseconds
    pub delay_variation: u32,
}

/// Parameters of `HCI_Flow_Specification`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlowSpec {
    /// 0 outgoing, 1 incoming
    pub flow_direction: u8,
    /// 0 no traffic, 1 best effort, 2 guaranteed
    pub service_type: u8,
    /// Token rate in octets per second
    pub token_rate: u32,
    /// Token bucket size in octets
    pub token_bucket_size: u32,
    /// Peak bandwidth in octets per second
    pub peak_bandwidth: u32,
    /// Access latency in microseconds
    pub access_latency: u32,
}

/// Sub-commands of the vendor `LE_MULTI_ADVT` command
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MultiAdvtCommand {
    /// Set the parameters of an instance
    SetParam {
        /// Minimum advertising interval in 0.625 ms units
        interval_min: u16,
        /// Maximum advertising interval in 0.625 ms units
        interval_max: u16,
        /// Legacy advertising type
        advertising_type: u8,
        /// Own address type
        own_address_type: u8,
        /// Own address
        own_address: Address,
        /// Directed peer
        peer: AddressWithType,
        /// Primary channel map
        channel_map: u8,
        /// Filter policy
        filter_policy: u8,
        /// Instance id
        instance: u8,
        /// Requested tx power in dBm
        tx_power: i8,
    },
    /// Set the advertising data of an instance
    SetData {
        /// Payload, at most 31 bytes
        data: Vec<u8, MAX_LEGACY_ADVERTISING_DATA_LENGTH>,
        /// Instance id
        instance: u8,
    },
    /// Set the scan response data of an instance
    SetScanResp {
        /// Payload, at most 31 bytes
        data: Vec<u8, MAX_LEGACY_ADVERTISING_DATA_LENGTH>,
        /// Instance id
        instance: u8,
    },
    /// Set the random address of an instance
    SetRandomAddr {
        /// New random address
        address: Address,
        /// Instance id
        instance: u8,
    },
    /// Enable or disable an instance
    SetEnable {
        /// Enable flag
        enable: bool,
        /// Instance id
        instance: u8,
    },
}

impl MultiAdvtCommand {
    /// Sub-operation code
    #[must_use]
    pub fn sub_opcode(&self) -> MultiAdvtSubOp {
        match self {
            Self::SetParam { .. } => MultiAdvtSubOp::SetParam,
            Self::SetData { .. } => MultiAdvtSubOp::SetData,
            Self::SetScanResp { .. } => MultiAdvtSubOp::SetScanResp,
            Self::SetRandomAddr { .. } => MultiAdvtSubOp::SetRandomAddr,
            Self::SetEnable { .. } => MultiAdvtSubOp::SetEnable,
        }
    }

    /// Instance the sub-command applies to
    #[must_use]
    pub fn instance(&self) -> u8 {
        match self {
            Self::SetParam { instance, .. }
            | Self::SetData { instance, .. }
            | Self::SetScanResp { instance, .. }
            | Self::SetRandomAddr { instance, .. }
            | Self::SetEnable { instance, .. } => *instance,
        }
    }
}

/// An HCI command issued by the host
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Command {
    CreateConnection {
        peer: Address,
        packet_type: u16,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
        allow_role_switch: bool,
    },
    Disconnect {
        handle: ConnectionHandle,
        reason: ErrorCode,
    },
    CreateConnectionCancel {
        peer: Address,
    },
    AcceptConnectionRequest {
        peer: Address,
        role: Role,
    },
    RejectConnectionRequest {
        peer: Address,
        reason: ErrorCode,
    },
    AuthenticationRequested {
        handle: ConnectionHandle,
    },
    ReadRemoteVersionInformation {
        handle: ConnectionHandle,
    },
    ReadClockOffset {
        handle: ConnectionHandle,
    },
    HoldMode {
        handle: ConnectionHandle,
        max_interval: u16,
        min_interval: u16,
    },
    SniffMode {
        handle: ConnectionHandle,
        max_interval: u16,
        min_interval: u16,
        attempt: u16,
        timeout: u16,
    },
    ExitSniffMode {
        handle: ConnectionHandle,
    },
    ParkState {
        handle: ConnectionHandle,
        beacon_max_interval: u16,
        beacon_min_interval: u16,
    },
    ExitParkState {
        handle: ConnectionHandle,
    },
    QosSetup {
        handle: ConnectionHandle,
        qos: QosSpec,
    },
    RoleDiscovery {
        handle: ConnectionHandle,
    },
    SwitchRole {
        peer: Address,
        role: Role,
    },
    ReadLinkPolicySettings {
        handle: ConnectionHandle,
    },
    WriteLinkPolicySettings {
        handle: ConnectionHandle,
        settings: u16,
    },
    FlowSpecification {
        handle: ConnectionHandle,
        flow: FlowSpec,
    },
    SniffSubrating {
        handle: ConnectionHandle,
        maximum_latency: u16,
        minimum_remote_timeout: u16,
        minimum_local_timeout: u16,
    },
    Flush {
        handle: ConnectionHandle,
    },
    ReadAutomaticFlushTimeout {
        handle: ConnectionHandle,
    },
    WriteAutomaticFlushTimeout {
        handle: ConnectionHandle,
        timeout: u16,
    },
    ReadTransmitPowerLevel {
        handle: ConnectionHandle,
        maximum: bool,
    },
    ReadLinkSupervisionTimeout {
        handle: ConnectionHandle,
    },
    WriteLinkSupervisionTimeout {
        handle: ConnectionHandle,
        timeout: u16,
    },
    ReadFailedContactCounter {
        handle: ConnectionHandle,
    },
    ResetFailedContactCounter {
        handle: ConnectionHandle,
    },
    ReadLinkQuality {
        handle: ConnectionHandle,
    },
    ReadRssi {
        handle: ConnectionHandle,
    },
    ReadAfhChannelMap {
        handle: ConnectionHandle,
    },
    ReadClock {
        handle: ConnectionHandle,
        piconet_clock: bool,
    },
    LeCreateConnection {
        scan_interval: u16,
        scan_window: u16,
        use_filter_accept_list: bool,
        peer: AddressWithType,
        own_address_type: u8,
        connection_interval_min: u16,
        connection_interval_max: u16,
        max_latency: u16,
        supervision_timeout: u16,
    },
    LeCreateConnectionCancel,
    LeAddDeviceToFilterAcceptList {
        peer: AddressWithType,
    },
    LeRemoveDeviceFromFilterAcceptList {
        peer: AddressWithType,
    },
    LeConnectionUpdate {
        handle: ConnectionHandle,
        interval_min: u16,
        interval_max: u16,
        max_latency: u16,
        supervision_timeout: u16,
    },
    LeSetAdvertisingParameters {
        interval_min: u16,
        interval_max: u16,
        advertising_type: u8,
        own_address_type: u8,
        peer: AddressWithType,
        channel_map: u8,
        filter_policy: u8,
    },
    LeReadAdvertisingPhysicalChannelTxPower,
    LeSetAdvertisingData {
        data: Vec<u8, MAX_LEGACY_ADVERTISING_DATA_LENGTH>,
    },
    LeSetScanResponseData {
        data: Vec<u8, MAX_LEGACY_ADVERTISING_DATA_LENGTH>,
    },
    LeSetAdvertisingEnable {
        enable: bool,
    },
    LeSetAdvertisingSetRandomAddress {
        handle: u8,
        address: Address,
    },
    LeSetExtendedAdvertisingParameters {
        handle: u8,
        properties: u16,
        interval_min: u32,
        interval_max: u32,
        channel_map: u8,
        own_address_type: u8,
        peer: AddressWithType,
        filter_policy: u8,
        tx_power: i8,
        primary_phy: u8,
        secondary_max_skip: u8,
        secondary_phy: u8,
        sid: u8,
        scan_request_notification_enable: bool,
    },
    LeSetExtendedAdvertisingData {
        handle: u8,
        operation: Operation,
        fragment_preference: u8,
        data: Vec<u8, MAX_ADVERTISING_FRAGMENT_LENGTH>,
    },
    LeSetExtendedScanResponseData {
        handle: u8,
        operation: Operation,
        fragment_preference: u8,
        data: Vec<u8, MAX_ADVERTISING_FRAGMENT_LENGTH>,
    },
    LeSetExtendedAdvertisingEnable {
        enable: bool,
        sets: Vec<EnabledSet, MAX_ADVERTISING_SETS>,
    },
    LeRemoveAdvertisingSet {
        handle: u8,
    },
    LeSetPeriodicAdvertisingParameters {
        handle: u8,
        interval_min: u16,
        interval_max: u16,
        properties: u16,
    },
    LeSetPeriodicAdvertisingData {
        handle: u8,
        operation: Operation,
        data: Vec<u8, MAX_PERIODIC_FRAGMENT_LENGTH>,
    },
    LeSetPeriodicAdvertisingEnable {
        enable: bool,
        include_adi: bool,
        handle: u8,
    },
    LeMultiAdvt(MultiAdvtCommand),
}

impl Command {
    /// Opcode of the command
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::CreateConnection { .. } => OpCode::CREATE_CONNECTION,
            Self::Disconnect { .. } => OpCode::DISCONNECT,
            Self::CreateConnectionCancel { .. } => OpCode::CREATE_CONNECTION_CANCEL,
            Self::AcceptConnectionRequest { .. } => OpCode::ACCEPT_CONNECTION_REQUEST,
            Self::RejectConnectionRequest { .. } => OpCode::REJECT_CONNECTION_REQUEST,
            Self::AuthenticationRequested { .. } => OpCode::AUTHENTICATION_REQUESTED,
            Self::ReadRemoteVersionInformation { .. } => OpCode::READ_REMOTE_VERSION_INFORMATION,
            Self::ReadClockOffset { .. } => OpCode::READ_CLOCK_OFFSET,
            Self::HoldMode { .. } => OpCode::HOLD_MODE,
            Self::SniffMode { .. } => OpCode::SNIFF_MODE,
            Self::ExitSniffMode { .. } => OpCode::EXIT_SNIFF_MODE,
            Self::ParkState { .. } => OpCode::PARK_STATE,
            Self::ExitParkState { .. } => OpCode::EXIT_PARK_STATE,
            Self::QosSetup { .. } => OpCode::QOS_SETUP,
            Self::RoleDiscovery { .. } => OpCode::ROLE_DISCOVERY,
            Self::SwitchRole { .. } => OpCode::SWITCH_ROLE,
            Self::ReadLinkPolicySettings { .. } => OpCode::READ_LINK_POLICY_SETTINGS,
            Self::WriteLinkPolicySettings { .. } => OpCode::WRITE_LINK_POLICY_SETTINGS,
            Self::FlowSpecification { .. } => OpCode::FLOW_SPECIFICATION,
            Self::SniffSubrating { .. } => OpCode::SNIFF_SUBRATING,
            Self::Flush { .. } => OpCode::FLUSH,
            Self::ReadAutomaticFlushTimeout { .. } => OpCode::READ_AUTOMATIC_FLUSH_TIMEOUT,
            Self::WriteAutomaticFlushTimeout { .. } => OpCode::WRITE_AUTOMATIC_FLUSH_TIMEOUT,
            Self::ReadTransmitPowerLevel { .. } => OpCode::READ_TRANSMIT_POWER_LEVEL,
            Self::ReadLinkSupervisionTimeout { .. } => OpCode::READ_LINK_SUPERVISION_TIMEOUT,
            Self::WriteLinkSupervisionTimeout { .. } => OpCode::WRITE_LINK_SUPERVISION_TIMEOUT,
            Self::ReadFailedContactCounter { .. } => OpCode::READ_FAILED_CONTACT_COUNTER,
            Self::ResetFailedContactCounter { .. } => OpCode::RESET_FAILED_CONTACT_COUNTER,
            Self::ReadLinkQuality { .. } => OpCode::READ_LINK_QUALITY,
            Self::ReadRssi { .. } => OpCode::READ_RSSI,
            Self::ReadAfhChannelMap { .. } => OpCode::READ_AFH_CHANNEL_MAP,
            Self::ReadClock { .. } => OpCode::READ_CLOCK,
            Self::LeCreateConnection { .. } => OpCode::LE_CREATE_CONNECTION,
            Self::LeCreateConnectionCancel => OpCode::LE_CREATE_CONNECTION_CANCEL,
            Self::LeAddDeviceToFilterAcceptList { .. } => {
                OpCode::LE_ADD_DEVICE_TO_FILTER_ACCEPT_LIST
            }
            Self::LeRemoveDeviceFromFilterAcceptList { .. } => {
                OpCode::LE_REMOVE_DEVICE_FROM_FILTER_ACCEPT_LIST
            }
            Self::LeConnectionUpdate { .. } => OpCode::LE_CONNECTION_UPDATE,
            Self::LeSetAdvertisingParameters { .. } => OpCode::LE_SET_ADVERTISING_PARAMETERS,
            Self::LeReadAdvertisingPhysicalChannelTxPower => {
                OpCode::LE_READ_ADVERTISING_PHYSICAL_CHANNEL_TX_POWER
            }
            Self::LeSetAdvertisingData { .. } => OpCode::LE_SET_ADVERTISING_DATA,
            Self::LeSetScanResponseData { .. } => OpCode::LE_SET_SCAN_RESPONSE_DATA,
            Self::LeSetAdvertisingEnable { .. } => OpCode::LE_SET_ADVERTISING_ENABLE,
            Self::LeSetAdvertisingSetRandomAddress { .. } => {
                OpCode::LE_SET_ADVERTISING_SET_RANDOM_ADDRESS
            }
            Self::LeSetExtendedAdvertisingParameters { .. } => {
                OpCode::LE_SET_EXTENDED_ADVERTISING_PARAMETERS
            }
            Self::LeSetExtendedAdvertisingData { .. } => OpCode::LE_SET_EXTENDED_ADVERTISING_DATA,
            Self::LeSetExtendedScanResponseData { .. } => {
                OpCode::LE_SET_EXTENDED_SCAN_RESPONSE_DATA
            }
            Self::LeSetExtendedAdvertisingEnable { .. } => {
                OpCode::LE_SET_EXTENDED_ADVERTISING_ENABLE
            }
            Self::LeRemoveAdvertisingSet { .. } => OpCode::LE_REMOVE_ADVERTISING_SET,
            Self::LeSetPeriodicAdvertisingParameters { .. } => {
                OpCode::LE_SET_PERIODIC_ADVERTISING_PARAMETERS
            }
            Self::LeSetPeriodicAdvertisingData { .. } => OpCode::LE_SET_PERIODIC_ADVERTISING_DATA,
            Self::LeSetPeriodicAdvertisingEnable { .. } => {
                OpCode::LE_SET_PERIODIC_ADVERTISING_ENABLE
            }
            Self::LeMultiAdvt(_) => OpCode::LE_MULTI_ADVT,
        }
    }

    /// Connection the command targets, for per-link commands
    #[must_use]
    pub fn connection_handle(&self) -> Option<ConnectionHandle> {
        match *self {
            Self::Disconnect { handle, .. }
            | Self::AuthenticationRequested { handle }
            | Self::ReadRemoteVersionInformation { handle }
            | Self::ReadClockOffset { handle }
            | Self::HoldMode { handle, .. }
            | Self::SniffMode { handle, .. }
            | Self::ExitSniffMode { handle }
            | Self::ParkState { handle, .. }
            | Self::ExitParkState { handle }
            | Self::QosSetup { handle, .. }
            | Self::RoleDiscovery { handle }
            | Self::ReadLinkPolicySettings { handle }
            | Self::WriteLinkPolicySettings { handle, .. }
            | Self::FlowSpecification { handle, .. }
            | Self::SniffSubrating { handle, .. }
            | Self::Flush { handle }
            | Self::ReadAutomaticFlushTimeout { handle }
            | Self::WriteAutomaticFlushTimeout { handle, .. }
            | Self::ReadTransmitPowerLevel { handle, .. }
            | Self::ReadLinkSupervisionTimeout { handle }
            | Self::WriteLinkSupervisionTimeout { handle, .. }
            | Self::ReadFailedContactCounter { handle }
            | Self::ResetFailedContactCounter { handle }
            | Self::ReadLinkQuality { handle }
            | Self::ReadRssi { handle }
            | Self::ReadAfhChannelMap { handle }
            | Self::ReadClock { handle, .. }
            | Self::LeConnectionUpdate { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Encode the command packet: opcode, parameter length, parameters
    ///
    /// Commands bt-hci models are serialized through its typed command structs. The
    /// link policy group, the per-link timers and counters, the periodic enable with
    /// its ADI bit and the vendor multi-advertising command are written by hand.
    ///
    /// # Errors
    /// Returns [`Error::BufferFull`] if the parameters exceed 255 bytes and
    /// [`Error::InvalidParameter`] when a field holds a value the wire format forbids
    pub fn encode(&self) -> Result<Vec<u8, COMMAND_BUFFER_SIZE>, Error> {
        if let Some(packet) = self.encode_typed()? {
            return Ok(packet);
        }

        let mut params: ByteWriter<MAX_PARAMETERS> = ByteWriter::new();
        self.write_parameters(&mut params)?;
        let params = params.finish();

        let mut packet: ByteWriter<COMMAND_BUFFER_SIZE> = ByteWriter::new();
        packet
            .u16(self.opcode().raw())?
            .u8(u8::try_from(params.len()).map_err(|_| Error::BufferFull)?)?
            .bytes(&params)?;
        Ok(packet.finish())
    }

    fn encode_typed(&self) -> Result<Option<Vec<u8, COMMAND_BUFFER_SIZE>>, Error> {
        let packet = match self {
            Self::CreateConnection {
                peer,
                packet_type,
                page_scan_repetition_mode,
                clock_offset,
                allow_role_switch,
            } => {
                let role_switch = if *allow_role_switch {
                    AllowRoleSwitch::Allowed
                } else {
                    AllowRoleSwitch::NotAllowed
                };
                write_cmd(&CreateConnection::new(
                    (*peer).into(),
                    hci_param(&packet_type.to_le_bytes())?,
                    hci_param(&[*page_scan_repetition_mode])?,
                    0,
                    hci_param(&clock_offset.to_le_bytes())?,
                    role_switch,
                ))?
            }
            Self::Disconnect { handle, reason } => write_cmd(&Disconnect::new(
                ConnHandle::try_from(*handle)?,
                hci_param(&[reason.raw()])?,
            ))?,
            Self::CreateConnectionCancel { peer } => {
                write_cmd(&CreateConnectionCancel::new((*peer).into()))?
            }
            Self::AcceptConnectionRequest { peer, role } => write_cmd(
                &AcceptConnectionRequest::new((*peer).into(), hci_param(&[*role as u8])?),
            )?,
            Self::RejectConnectionRequest { peer, reason } => write_cmd(
                &RejectConnectionRequest::new((*peer).into(), hci_param(&[reason.raw()])?),
            )?,
            Self::AuthenticationRequested { handle } => {
                write_cmd(&AuthenticationRequested::new(ConnHandle::try_from(*handle)?))?
            }
            Self::ReadRemoteVersionInformation { handle } => {
                write_cmd(&ReadRemoteVersionInformation::new(ConnHandle::try_from(*handle)?))?
            }
            Self::ReadClockOffset { handle } => {
                write_cmd(&ReadClockOffset::new(ConnHandle::try_from(*handle)?))?
            }
            Self::ReadTransmitPowerLevel { handle, maximum } => {
                let kind = if *maximum {
                    hci::PowerLevelKind::Maximum
                } else {
                    hci::PowerLevelKind::Current
                };
                write_cmd(&ReadTransmitPowerLevel::new(ConnHandle::try_from(*handle)?, kind))?
            }
            Self::ReadRssi { handle } => write_cmd(&ReadRssi::new(ConnHandle::try_from(*handle)?))?,
            Self::LeCreateConnection {
                scan_interval,
                scan_window,
                use_filter_accept_list,
                peer,
                own_address_type,
                connection_interval_min,
                connection_interval_max,
                max_latency,
                supervision_timeout,
            } => write_cmd(&LeCreateConn::new(
                Duration::from_u16(*scan_interval),
                Duration::from_u16(*scan_window),
                *use_filter_accept_list,
                peer.address_type.into(),
                peer.address.into(),
                hci_param(&[*own_address_type])?,
                Duration::from_u16(*connection_interval_min),
                Duration::from_u16(*connection_interval_max),
                *max_latency,
                Duration::from_u16(*supervision_timeout),
                Duration::from_u16(0),
                Duration::from_u16(0),
            ))?,
            Self::LeCreateConnectionCancel => write_cmd(&LeCreateConnCancel::new())?,
            Self::LeAddDeviceToFilterAcceptList { peer } => write_cmd(
                &LeAddDeviceToFilterAcceptList::new(peer.address_type.into(), peer.address.into()),
            )?,
            Self::LeRemoveDeviceFromFilterAcceptList { peer } => {
                write_cmd(&LeRemoveDeviceFromFilterAcceptList::new(
                    peer.address_type.into(),
                    peer.address.into(),
                ))?
            }
            Self::LeConnectionUpdate {
                handle,
                interval_min,
                interval_max,
                max_latency,
                supervision_timeout,
            } => write_cmd(&LeConnUpdate::new(
                ConnHandle::try_from(*handle)?,
                Duration::from_u16(*interval_min),
                Duration::from_u16(*interval_max),
                *max_latency,
                Duration::from_u16(*supervision_timeout),
                Duration::from_u16(0),
                Duration::from_u16(0),
            ))?,
            Self::LeSetAdvertisingParameters {
                interval_min,
                interval_max,
                advertising_type,
                own_address_type,
                peer,
                channel_map,
                filter_policy,
            } => write_cmd(&LeSetAdvParams::new(
                Duration::from_u16(*interval_min),
                Duration::from_u16(*interval_max),
                hci_param(&[*advertising_type])?,
                hci_param(&[*own_address_type])?,
                peer.address_type.into(),
                peer.address.into(),
                hci_param(&[*channel_map])?,
                hci_param(&[*filter_policy])?,
            ))?,
            Self::LeReadAdvertisingPhysicalChannelTxPower => {
                write_cmd(&LeReadAdvPhysicalChannelTxPower::new())?
            }
            Self::LeSetAdvertisingData { data } => {
                write_cmd(&LeSetAdvData::new(data_length(data)?, legacy_block(data)))?
            }
            Self::LeSetScanResponseData { data } => {
                write_cmd(&LeSetScanResponseData::new(data_length(data)?, legacy_block(data)))?
            }
            Self::LeSetAdvertisingEnable { enable } => write_cmd(&LeSetAdvEnable::new(*enable))?,
            Self::LeSetAdvertisingSetRandomAddress { handle, address } => write_cmd(
                &LeSetAdvSetRandomAddr::new(AdvHandle::new(*handle), (*address).into()),
            )?,
            Self::LeSetExtendedAdvertisingParameters {
                handle,
                properties,
                interval_min,
                interval_max,
                channel_map,
                own_address_type,
                peer,
                filter_policy,
                tx_power,
                primary_phy,
                secondary_max_skip,
                secondary_phy,
                sid,
                scan_request_notification_enable,
            } => write_cmd(&LeSetExtAdvParams::new(
                AdvHandle::new(*handle),
                hci_param(&properties.to_le_bytes())?,
                extended_interval(*interval_min)?,
                extended_interval(*interval_max)?,
                hci_param(&[*channel_map])?,
                hci_param(&[*own_address_type])?,
                peer.address_type.into(),
                peer.address.into(),
                hci_param(&[*filter_policy])?,
                *tx_power,
                hci_param(&[*primary_phy])?,
                *secondary_max_skip,
                hci_param(&[*secondary_phy])?,
                *sid,
                *scan_request_notification_enable,
            ))?,
            Self::LeSetExtendedAdvertisingData {
                handle,
                operation,
                fragment_preference,
                data,
            } => write_cmd(&LeSetExtAdvData::new(
                AdvHandle::new(*handle),
                (*operation).into(),
                *fragment_preference != 0,
                data,
            ))?,
            Self::LeSetExtendedScanResponseData {
                handle,
                operation,
                fragment_preference,
                data,
            } => write_cmd(&LeSetExtScanResponseData::new(
                AdvHandle::new(*handle),
                (*operation).into(),
                *fragment_preference != 0,
                data,
            ))?,
            Self::LeSetExtendedAdvertisingEnable { enable, sets } => {
                let sets: Vec<AdvSet, MAX_ADVERTISING_SETS> = sets
                    .iter()
                    .map(|set| AdvSet {
                        adv_handle: AdvHandle::new(set.advertising_handle),
                        duration: Duration::from_u16(set.duration),
                        max_ext_adv_events: set.max_extended_advertising_events,
                    })
                    .collect();
                write_cmd(&LeSetExtAdvEnable::new(*enable, &sets))?
            }
            Self::LeRemoveAdvertisingSet { handle } => {
                write_cmd(&LeRemoveAdvSet::new(AdvHandle::new(*handle)))?
            }
            Self::LeSetPeriodicAdvertisingParameters {
                handle,
                interval_min,
                interval_max,
                properties,
            } => write_cmd(&LeSetPeriodicAdvParams::new(
                AdvHandle::new(*handle),
                Duration::from_u16(*interval_min),
                Duration::from_u16(*interval_max),
                hci_param(&properties.to_le_bytes())?,
            ))?,
            Self::LeSetPeriodicAdvertisingData {
                handle,
                operation,
                data,
            } => write_cmd(&LeSetPeriodicAdvData::new(
                AdvHandle::new(*handle),
                (*operation).into(),
                data,
            ))?,
            _ => return Ok(None),
        };
        Ok(Some(packet))
    }

    /// Parameters of the commands bt-hci has no struct for
    fn write_parameters(&self, w: &mut ByteWriter<MAX_PARAMETERS>) -> Result<(), Error> {
        match self {
            Self::SwitchRole { peer, role } => {
                w.bytes(peer.as_bytes())?.u8(*role as u8)?;
            }
            Self::ExitSniffMode { handle }
            | Self::ExitParkState { handle }
            | Self::RoleDiscovery { handle }
            | Self::ReadLinkPolicySettings { handle }
            | Self::Flush { handle }
            | Self::ReadAutomaticFlushTimeout { handle }
            | Self::ReadLinkSupervisionTimeout { handle }
            | Self::ReadFailedContactCounter { handle }
            | Self::ResetFailedContactCounter { handle }
            | Self::ReadLinkQuality { handle }
            | Self::ReadAfhChannelMap { handle } => {
                w.u16(handle.raw())?;
            }
            Self::HoldMode {
                handle,
                max_interval,
                min_interval,
            } => {
                w.u16(handle.raw())?.u16(*max_interval)?.u16(*min_interval)?;
            }
            Self::ParkState {
                handle,
                beacon_max_interval,
                beacon_min_interval,
            } => {
                w.u16(handle.raw())?
                    .u16(*beacon_max_interval)?
                    .u16(*beacon_min_interval)?;
            }
            Self::SniffMode {
                handle,
                max_interval,
                min_interval,
                attempt,
                timeout,
            } => {
                w.u16(handle.raw())?
                    .u16(*max_interval)?
                    .u16(*min_interval)?
                    .u16(*attempt)?
                    .u16(*timeout)?;
            }
            Self::QosSetup { handle, qos } => {
                w.u16(handle.raw())?
                    .u8(0)?
                    .u8(qos.service_type)?
                    .u32(qos.token_rate)?
                    .u32(qos.peak_bandwidth)?
                    .u32(qos.latency)?
                    .u32(qos.delay_variation)?;
            }
            Self::WriteLinkPolicySettings { handle, settings } => {
                w.u16(handle.raw())?.u16(*settings)?;
            }
            Self::FlowSpecification { handle, flow } => {
                w.u16(handle.raw())?
                    .u8(0)?
                    .u8(flow.flow_direction)?
                    .u8(flow.service_type)?
                    .u32(flow.token_rate)?
                    .u32(flow.token_bucket_size)?
                    .u32(flow.peak_bandwidth)?
                    .u32(flow.access_latency)?;
            }
            Self::SniffSubrating {
                handle,
                maximum_latency,
                minimum_remote_timeout,
                minimum_local_timeout,
            } => {
                w.u16(handle.raw())?
                    .u16(*maximum_latency)?
                    .u16(*minimum_remote_timeout)?
                    .u16(*minimum_local_timeout)?;
            }
            Self::WriteAutomaticFlushTimeout { handle, timeout }
            | Self::WriteLinkSupervisionTimeout { handle, timeout } => {
                w.u16(handle.raw())?.u16(*timeout)?;
            }
            Self::ReadClock {
                handle,
                piconet_clock,
            } => {
                w.u16(handle.raw())?.u8(u8::from(*piconet_clock))?;
            }
            // bt-hci has no ADI bit on its periodic enable
            Self::LeSetPeriodicAdvertisingEnable {
                enable,
                include_adi,
                handle,
            } => {
                let flags = u8::from(*enable) | (u8::from(*include_adi) << 1);
                w.u8(flags)?.u8(*handle)?;
            }
            Self::LeMultiAdvt(sub) => {
                w.u8(sub.sub_opcode() as u8)?;
                match sub {
                    MultiAdvtCommand::SetParam {
                        interval_min,
                        interval_max,
                        advertising_type,
                        own_address_type,
                        own_address,
                        peer,
                        channel_map,
                        filter_policy,
                        instance,
                        tx_power,
                    } => {
                        w.u16(*interval_min)?
                            .u16(*interval_max)?
                            .u8(*advertising_type)?
                            .u8(*own_address_type)?
                            .bytes(own_address.as_bytes())?
                            .u8(peer.address_type as u8)?
                            .bytes(peer.address.as_bytes())?
                            .u8(*channel_map)?
                            .u8(*filter_policy)?
                            .u8(*instance)?
                            .i8(*tx_power)?;
                    }
                    MultiAdvtCommand::SetData { data, instance }
                    | MultiAdvtCommand::SetScanResp { data, instance } => {
                        w.u8(data_length(data)?)?.bytes(&legacy_block(data))?.u8(*instance)?;
                    }
                    MultiAdvtCommand::SetRandomAddr { address, instance } => {
                        w.bytes(address.as_bytes())?.u8(*instance)?;
                    }
                    MultiAdvtCommand::SetEnable { enable, instance } => {
                        w.u8(u8::from(*enable))?.u8(*instance)?;
                    }
                }
            }
            _ => {
                error!("[HOST] {:?} has no hand-written encoding", self.opcode());
                return Err(Error::InvalidParameter);
            }
        }
        Ok(())
    }
}

fn data_length<T>(data: &[T]) -> Result<u8, Error> {
    u8::try_from(data.len()).map_err(|_| Error::BufferFull)
}

/// Legacy data commands always carry a 31-byte field after the significant length
fn legacy_block(data: &[u8]) -> [u8; MAX_LEGACY_ADVERTISING_DATA_LENGTH] {
    let mut block = [0u8; MAX_LEGACY_ADVERTISING_DATA_LENGTH];
    for (slot, byte) in block.iter_mut().zip(data) {
        *slot = *byte;
    }
    block
}

fn hci_param<T: for<'de> FromHciBytes<'de>>(raw: &[u8]) -> Result<T, Error> {
    T::from_hci_bytes_complete(raw).map_err(|_| Error::InvalidParameter)
}

/// Extended advertising intervals are 24-bit on the wire
fn extended_interval(value: u32) -> Result<ExtDuration<625>, Error> {
    if value >= 1 << 24 {
        return Err(Error::InvalidParameter);
    }
    Ok(ExtDuration::from_u32(value))
}

fn write_cmd<C: Cmd>(command: &C) -> Result<Vec<u8, COMMAND_BUFFER_SIZE>, Error> {
    let mut buffer = [0u8; COMMAND_BUFFER_SIZE];
    let packet = buffer
        .get_mut(..command.size())
        .ok_or(Error::BufferFull)?;
    command
        .write_hci(&mut *packet)
        .map_err(|_| Error::BufferFull)?;
    Vec::from_slice(packet).map_err(|_| Error::BufferFull)
}
