//! Connection handles given to applications and the callback traits they register

use crate::{
    Address, AddressWithType,
    hci::{ConnectionHandle, ErrorCode, FlowSpec, LinkMode, OpCode, QosSpec, Role},
};

/// Identifies one incarnation of a link
///
/// Controllers reuse handles after Disconnection Complete, so a handle alone cannot tell
/// a live link from a torn-down one. The generation is bumped for every new link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkId {
    /// Controller handle
    pub handle: ConnectionHandle,
    /// Host-side incarnation counter
    pub generation: u16,
}

/// A classic (BR/EDR) ACL link owned by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClassicConnection {
    /// Link identity
    pub link: LinkId,
    /// Remote device
    pub peer: Address,
    /// Local role when the link came up
    pub role: Role,
    /// Whether the local host paged the peer
    pub locally_initiated: bool,
}

impl ClassicConnection {
    /// Controller handle of the link
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.link.handle
    }

    /// Remote device address
    #[must_use]
    pub fn address(&self) -> Address {
        self.peer
    }
}

/// An LE ACL link owned by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LeConnection {
    /// Link identity
    pub link: LinkId,
    /// Remote device
    pub peer: AddressWithType,
    /// Local address the link was made with
    pub local_address: AddressWithType,
    /// Local role
    pub role: Role,
    /// Connection interval in 1.25 ms units
    pub interval: u16,
    /// Peripheral latency
    pub latency: u16,
    /// Supervision timeout in 10 ms units
    pub supervision_timeout: u16,
    /// Whether the advertising set that produced the link was discoverable
    pub discoverable: bool,
}

impl LeConnection {
    /// Controller handle of the link
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.link.handle
    }

    /// Remote device address and type
    #[must_use]
    pub fn address(&self) -> AddressWithType {
        self.peer
    }
}

/// Classic connection lifecycle notifications
pub trait ConnectionCallbacks {
    /// A link came up
    fn on_connect_success(&self, connection: ClassicConnection);

    /// A connection attempt ended without a link
    fn on_connect_fail(&self, peer: Address, reason: ErrorCode, locally_initiated: bool);
}

/// LE connection lifecycle notifications
pub trait LeConnectionCallbacks {
    /// A link came up
    fn on_le_connect_success(&self, peer: AddressWithType, connection: LeConnection);

    /// A connection attempt ended without a link
    fn on_le_connect_fail(&self, peer: AddressWithType, reason: ErrorCode);
}

/// Per-link notifications for a classic connection
///
/// Every method has an empty default so implementors only override what they use.
#[allow(unused_variables)]
pub trait ConnectionManagementCallbacks {
    /// Authentication Complete
    fn on_authentication_complete(&self, status: ErrorCode) {}
    /// Mode Change after a hold, sniff or park request, or the exit from one
    fn on_mode_change(&self, status: ErrorCode, mode: LinkMode, interval: u16) {}
    /// Sniff Subrating event
    fn on_sniff_subrating(
        &self,
        status: ErrorCode,
        maximum_transmit_latency: u16,
        maximum_receive_latency: u16,
        minimum_remote_timeout: u16,
        minimum_local_timeout: u16,
    ) {
    }
    /// QoS Setup Complete
    fn on_qos_setup_complete(&self, qos: QosSpec) {}
    /// Flow Specification Complete
    fn on_flow_specification_complete(&self, flow: FlowSpec) {}
    /// The controller flushed the link
    fn on_flush_occurred(&self) {}
    /// Role Discovery result
    fn on_role_discovery_complete(&self, role: Role) {}
    /// Read Link Policy Settings result
    fn on_read_link_policy_settings_complete(&self, settings: u16) {}
    /// Write Link Policy Settings succeeded with the new value
    fn on_write_link_policy_settings_complete(&self, settings: u16) {}
    /// Read Automatic Flush Timeout result
    fn on_read_automatic_flush_timeout_complete(&self, timeout: u16) {}
    /// Write Automatic Flush Timeout succeeded with the new value
    fn on_write_automatic_flush_timeout_complete(&self, timeout: u16) {}
    /// Read Transmit Power Level result in dBm
    fn on_read_transmit_power_level_complete(&self, level: i8) {}
    /// Read Link Supervision Timeout result
    fn on_read_link_supervision_timeout_complete(&self, timeout: u16) {}
    /// Write Link Supervision Timeout succeeded with the new value
    fn on_write_link_supervision_timeout_complete(&self, timeout: u16) {}
    /// Read Failed Contact Counter result
    fn on_read_failed_contact_counter_complete(&self, counter: u16) {}
    /// Failed contact counter reset
    fn on_failed_contact_counter_reset(&self) {}
    /// Read Link Quality result
    fn on_read_link_quality_complete(&self, quality: u8) {}
    /// Read AFH Channel Map result
    fn on_read_afh_channel_map_complete(&self, mode: u8, channel_map: [u8; 10]) {}
    /// Read RSSI result
    fn on_read_rssi_complete(&self, rssi: i8) {}
    /// Read Clock result
    fn on_read_clock_complete(&self, clock: u32, accuracy: u16) {}
    /// Read Clock Offset result
    fn on_read_clock_offset_complete(&self, clock_offset: u16) {}
    /// Role Change event
    fn on_role_change(&self, status: ErrorCode, new_role: Role) {}
    /// Read Remote Version Information result
    fn on_read_remote_version_information_complete(
        &self,
        status: ErrorCode,
        version: u8,
        manufacturer_name: u16,
        sub_version: u16,
    ) {
    }
    /// A link command was rejected or failed
    fn on_command_failed(&self, opcode: OpCode, status: ErrorCode) {}
    /// The link is gone
    fn on_disconnection(&self, reason: ErrorCode);
}

/// Per-link notifications for an LE connection
#[allow(unused_variables)]
pub trait LeConnectionManagementCallbacks {
    /// Connection parameters changed
    fn on_connection_update(
        &self,
        status: ErrorCode,
        interval: u16,
        latency: u16,
        supervision_timeout: u16,
    ) {
    }
    /// Read RSSI result
    fn on_read_rssi_complete(&self, rssi: i8) {}
    /// Read Remote Version Information result
    fn on_read_remote_version_information_complete(
        &self,
        status: ErrorCode,
        version: u8,
        manufacturer_name: u16,
        sub_version: u16,
    ) {
    }
    /// A link command was rejected or failed
    fn on_command_failed(&self, opcode: OpCode, status: ErrorCode) {}
    /// The link is gone
    fn on_disconnection(&self, reason: ErrorCode);
}
