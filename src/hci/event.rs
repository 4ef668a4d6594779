//! HCI events consumed by the host
//!
//! [`Event::from_hci_bytes`] decodes a raw event packet (event code, parameter length,
//! parameters). Events the managers never react to are reported as
//! [`Error::UnknownEvent`] so the caller can log and drop them.

use bt_hci::{
    FromHciBytes, FromHciBytesError,
    event::{self as hci, le::LeEvent},
    param::BdAddr,
};
use heapless::Vec;

use crate::{
    Address, AddressType, AddressWithType, Error,
    constants::{MAX_COMPLETED_PACKET_ENTRIES, MAX_RETURN_PARAMETERS},
    hci::{ConnectionHandle, ErrorCode, FlowSpec, LinkMode, OpCode, QosSpec, Role, bytes::ByteReader},
};

const COMMAND_COMPLETE: u8 = 0x0E;
const MODE_CHANGE: u8 = 0x14;
const LE_META: u8 = 0x3E;
const VENDOR_SPECIFIC: u8 = 0xFF;

/// LE subevents the host reacts to
const LE_SUBEVENTS: [u8; 5] = [0x01, 0x03, 0x0A, 0x12, 0x13];

const VENDOR_MULTI_ADV_STATE_CHANGE: u8 = 0x55;

/// Number of completed packets for one handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CompletedPackets {
    /// Connection the packets were sent on
    pub handle: ConnectionHandle,
    /// Packets the controller has finished with
    pub count: u16,
}

/// LE Connection Complete and LE Enhanced Connection Complete, unified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LeConnectionComplete {
    /// Outcome
    pub status: ErrorCode,
    /// Handle of the new link
    pub handle: ConnectionHandle,
    /// Local role
    pub role: Role,
    /// Peer identity (or over-the-air address when not resolved)
    pub peer: AddressWithType,
    /// Local resolvable private address used, when the enhanced event reports one
    pub local_resolvable_address: Option<Address>,
    /// Connection interval in 1.25 ms units
    pub interval: u16,
    /// Peripheral latency
    pub latency: u16,
    /// Supervision timeout in 10 ms units
    pub supervision_timeout: u16,
}

/// LE meta subevents
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeMetaEvent {
    /// A link was established or initiation stopped
    ConnectionComplete(LeConnectionComplete),
    /// Connection parameters changed
    ConnectionUpdateComplete {
        /// Outcome
        status: ErrorCode,
        /// Link
        handle: ConnectionHandle,
        /// Connection interval in 1.25 ms units
        interval: u16,
        /// Peripheral latency
        latency: u16,
        /// Supervision timeout in 10 ms units
        supervision_timeout: u16,
    },
    /// An extended advertising set stopped
    AdvertisingSetTerminated {
        /// Why the set stopped
        status: ErrorCode,
        /// Set that stopped
        advertising_handle: u8,
        /// Connection created by the set, when it stopped because of one
        connection_handle: ConnectionHandle,
        /// Completed extended advertising events
        num_completed_events: u8,
    },
    /// A scanner requested the scan response of a set
    ScanRequestReceived {
        /// Set that was scanned
        advertising_handle: u8,
        /// Scanner address
        scanner: AddressWithType,
    },
}

/// Vendor-specific events
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VendorEvent {
    /// A multi-advertising instance changed state
    MultiAdvStateChange {
        /// Instance id
        advertising_instance: u8,
        /// Reason, `0x00` when a connection was received
        reason: u8,
        /// Connection created by the instance
        connection_handle: ConnectionHandle,
    },
}

impl VendorEvent {
    /// State-change reason reported when the instance stopped because it was connected
    pub const CONNECTION_RECEIVED: u8 = 0x00;
}

/// HCI events understood by the host
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Event {
    ConnectionComplete {
        status: ErrorCode,
        handle: ConnectionHandle,
        peer: Address,
        link_type: u8,
        encryption_enabled: bool,
    },
    ConnectionRequest {
        peer: Address,
        class_of_device: u32,
        link_type: u8,
    },
    DisconnectionComplete {
        status: ErrorCode,
        handle: ConnectionHandle,
        reason: ErrorCode,
    },
    AuthenticationComplete {
        status: ErrorCode,
        handle: ConnectionHandle,
    },
    ReadRemoteVersionInformationComplete {
        status: ErrorCode,
        handle: ConnectionHandle,
        version: u8,
        manufacturer_name: u16,
        sub_version: u16,
    },
    QosSetupComplete {
        status: ErrorCode,
        handle: ConnectionHandle,
        qos: QosSpec,
    },
    CommandComplete {
        num_hci_command_packets: u8,
        opcode: OpCode,
        return_parameters: Vec<u8, MAX_RETURN_PARAMETERS>,
    },
    CommandStatus {
        status: ErrorCode,
        num_hci_command_packets: u8,
        opcode: OpCode,
    },
    FlushOccurred {
        handle: ConnectionHandle,
    },
    RoleChange {
        status: ErrorCode,
        peer: Address,
        new_role: Role,
    },
    NumberOfCompletedPackets {
        entries: Vec<CompletedPackets, MAX_COMPLETED_PACKET_ENTRIES>,
    },
    ModeChange {
        status: ErrorCode,
        handle: ConnectionHandle,
        mode: LinkMode,
        interval: u16,
    },
    ReadClockOffsetComplete {
        status: ErrorCode,
        handle: ConnectionHandle,
        clock_offset: u16,
    },
    FlowSpecificationComplete {
        status: ErrorCode,
        handle: ConnectionHandle,
        flow: FlowSpec,
    },
    SniffSubrating {
        status: ErrorCode,
        handle: ConnectionHandle,
        maximum_transmit_latency: u16,
        maximum_receive_latency: u16,
        minimum_remote_timeout: u16,
        minimum_local_timeout: u16,
    },
    LeMeta(LeMetaEvent),
    Vendor(VendorEvent),
}

impl Event {
    /// Decode a raw HCI event packet
    ///
    /// bt-hci does the parsing. Two shapes it rejects are handled here: a Command
    /// Complete that only hands back command credits, and a Mode Change reporting
    /// park mode.
    ///
    /// # Errors
    /// * [`Error::Truncated`] if the packet is shorter than its header claims
    /// * [`Error::UnknownEvent`] for events the host does not consume
    /// * [`Error::InvalidParameter`] for malformed fields
    pub fn from_hci_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut header = ByteReader::new(bytes);
        let code = header.u8()?;
        let length = header.u8()?;
        let params = header.take(usize::from(length))?;

        match code {
            COMMAND_COMPLETE if params.len() == 3 => return credits_only(params),
            MODE_CHANGE => return mode_change(params),
            LE_META => {
                if let Some(subevent) = params.first() {
                    if !LE_SUBEVENTS.contains(subevent) {
                        return Err(Error::UnknownEvent(LE_META));
                    }
                }
            }
            _ => {}
        }

        let (event, _) = hci::Event::from_hci_bytes(bytes).map_err(decode_error)?;
        let event = match event {
            hci::Event::ConnectionComplete(e) => Self::ConnectionComplete {
                status: e.status.into(),
                handle: e.handle.into(),
                peer: Address::try_from(e.bd_addr)?,
                link_type: e.link_type as u8,
                encryption_enabled: e.encryption_enabled,
            },
            hci::Event::ConnectionRequest(e) => {
                let [low, mid, high] = e.class_of_device;
                Self::ConnectionRequest {
                    peer: Address::try_from(e.bd_addr)?,
                    class_of_device: u32::from_le_bytes([low, mid, high, 0]),
                    link_type: e.link_type as u8,
                }
            }
            hci::Event::DisconnectionComplete(e) => Self::DisconnectionComplete {
                status: e.status.into(),
                handle: e.handle.into(),
                reason: e.reason.into(),
            },
            hci::Event::AuthenticationComplete(e) => Self::AuthenticationComplete {
                status: e.status.into(),
                handle: e.handle.into(),
            },
            hci::Event::ReadRemoteVersionInformationComplete(e) => {
                Self::ReadRemoteVersionInformationComplete {
                    status: e.status.into(),
                    handle: e.handle.into(),
                    version: e.version.into_inner(),
                    manufacturer_name: e.company_id,
                    sub_version: e.subversion,
                }
            }
            hci::Event::QosSetupComplete(e) => Self::QosSetupComplete {
                status: e.status.into(),
                handle: e.handle.into(),
                qos: QosSpec {
                    service_type: e.service_type as u8,
                    token_rate: e.token_rate,
                    peak_bandwidth: e.peak_bandwidth,
                    latency: e.latency,
                    delay_variation: e.delay_variation,
                },
            },
            hci::Event::CommandComplete(e) => {
                // Return parameters are handed on with their leading status byte
                let mut return_parameters = Vec::new();
                return_parameters
                    .push(e.status.into_inner())
                    .map_err(|_| Error::InvalidParameter)?;
                return_parameters
                    .extend_from_slice(&e.return_param_bytes)
                    .map_err(|()| Error::InvalidParameter)?;
                Self::CommandComplete {
                    num_hci_command_packets: e.num_hci_cmd_pkts,
                    opcode: OpCode(e.cmd_opcode.to_raw()),
                    return_parameters,
                }
            }
            hci::Event::CommandStatus(e) => Self::CommandStatus {
                status: e.status.into(),
                num_hci_command_packets: e.num_hci_cmd_pkts,
                opcode: OpCode(e.cmd_opcode.to_raw()),
            },
            hci::Event::FlushOccurred(e) => Self::FlushOccurred {
                handle: e.handle.into(),
            },
            hci::Event::RoleChange(e) => Self::RoleChange {
                status: e.status.into(),
                peer: Address::try_from(e.bd_addr)?,
                new_role: Role::from_u8(e.new_role as u8),
            },
            hci::Event::NumberOfCompletedPackets(e) => {
                let mut entries = Vec::new();
                for entry in e.completed_packets {
                    let entry = CompletedPackets {
                        handle: entry.handle().map_err(decode_error)?.into(),
                        count: entry.num_completed_packets().map_err(decode_error)?,
                    };
                    entries.push(entry).map_err(|_| Error::InvalidParameter)?;
                }
                Self::NumberOfCompletedPackets { entries }
            }
            hci::Event::ReadClockOffsetComplete(e) => Self::ReadClockOffsetComplete {
                status: e.status.into(),
                handle: e.handle.into(),
                clock_offset: u16::from_le_bytes(e.clock_offset.into_inner()),
            },
            hci::Event::FlowSpecificationComplete(e) => Self::FlowSpecificationComplete {
                status: e.status.into(),
                handle: e.handle.into(),
                flow: FlowSpec {
                    flow_direction: e.flow_direction as u8,
                    service_type: e.service_type as u8,
                    token_rate: e.token_rate,
                    token_bucket_size: e.token_bucket_size,
                    peak_bandwidth: e.peak_bandwidth,
                    access_latency: e.access_latency,
                },
            },
            hci::Event::SniffSubrating(e) => Self::SniffSubrating {
                status: e.status.into(),
                handle: e.handle.into(),
                maximum_transmit_latency: e.max_tx_latency,
                maximum_receive_latency: e.max_rx_latency,
                minimum_remote_timeout: e.min_remote_timeout,
                minimum_local_timeout: e.min_local_timeout,
            },
            hci::Event::Le(le) => Self::LeMeta(le_meta(le)?),
            hci::Event::Vendor(e) => Self::Vendor(vendor(&e.params)?),
            _ => return Err(Error::UnknownEvent(code)),
        };
        Ok(event)
    }
}

fn le_meta(event: LeEvent<'_>) -> Result<LeMetaEvent, Error> {
    let event = match event {
        LeEvent::LeConnectionComplete(e) => LeMetaEvent::ConnectionComplete(LeConnectionComplete {
            status: e.status.into(),
            handle: e.handle.into(),
            role: Role::from_u8(e.role as u8),
            peer: peer_address(e.peer_addr_kind.into_inner(), e.peer_addr)?,
            local_resolvable_address: None,
            interval: e.conn_interval.as_u16(),
            latency: e.peripheral_latency,
            supervision_timeout: e.supervision_timeout.as_u16(),
        }),
        LeEvent::LeEnhancedConnectionComplete(e) => {
            let local = Address::try_from(e.local_resolvable_private_addr)?;
            LeMetaEvent::ConnectionComplete(LeConnectionComplete {
                status: e.status.into(),
                handle: e.handle.into(),
                role: Role::from_u8(e.role as u8),
                peer: peer_address(e.peer_addr_kind.into_inner(), e.peer_addr)?,
                local_resolvable_address: (!local.is_empty()).then_some(local),
                interval: e.conn_interval.as_u16(),
                latency: e.peripheral_latency,
                supervision_timeout: e.supervision_timeout.as_u16(),
            })
        }
        LeEvent::LeConnectionUpdateComplete(e) => LeMetaEvent::ConnectionUpdateComplete {
            status: e.status.into(),
            handle: e.handle.into(),
            interval: e.conn_interval.as_u16(),
            latency: e.peripheral_latency,
            supervision_timeout: e.supervision_timeout.as_u16(),
        },
        LeEvent::LeAdvertisingSetTerminated(e) => LeMetaEvent::AdvertisingSetTerminated {
            status: e.status.into(),
            advertising_handle: e.adv_handle.as_raw(),
            connection_handle: e.handle.into(),
            num_completed_events: e.num_completed_ext_adv_evts,
        },
        LeEvent::LeScanRequestReceived(e) => LeMetaEvent::ScanRequestReceived {
            advertising_handle: e.adv_handle.as_raw(),
            scanner: peer_address(e.scanner_addr_kind.into_inner(), e.scanner_addr)?,
        },
        _ => return Err(Error::UnknownEvent(LE_META)),
    };
    Ok(event)
}

fn vendor(params: &[u8]) -> Result<VendorEvent, Error> {
    let mut r = ByteReader::new(params);
    match r.u8()? {
        VENDOR_MULTI_ADV_STATE_CHANGE => Ok(VendorEvent::MultiAdvStateChange {
            advertising_instance: r.u8()?,
            reason: r.u8()?,
            connection_handle: ConnectionHandle::new(r.u16()?),
        }),
        _ => Err(Error::UnknownEvent(VENDOR_SPECIFIC)),
    }
}

/// Command Complete without a status byte, as sent for the NOP opcode
fn credits_only(params: &[u8]) -> Result<Event, Error> {
    let mut r = ByteReader::new(params);
    Ok(Event::CommandComplete {
        num_hci_command_packets: r.u8()?,
        opcode: OpCode(r.u16()?),
        return_parameters: Vec::new(),
    })
}

fn mode_change(params: &[u8]) -> Result<Event, Error> {
    let mut r = ByteReader::new(params);
    let event = Event::ModeChange {
        status: ErrorCode(r.u8()?),
        handle: ConnectionHandle::new(r.u16()?),
        mode: LinkMode::from_u8(r.u8()?).ok_or(Error::InvalidParameter)?,
        interval: r.u16()?,
    };
    Ok(event)
}

fn peer_address(kind: u8, address: BdAddr) -> Result<AddressWithType, Error> {
    Ok(AddressWithType::new(
        Address::try_from(address)?,
        AddressType::from_u8(kind)?,
    ))
}

fn decode_error(error: FromHciBytesError) -> Error {
    match error {
        FromHciBytesError::InvalidSize => Error::Truncated,
        FromHciBytesError::InvalidValue => Error::InvalidParameter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_complete_keeps_return_parameters() {
        let bytes = [0x0E, 0x06, 0x01, 0x05, 0x14, 0x00, 0x40, 0x00];
        let event = Event::from_hci_bytes(&bytes).unwrap();
        match event {
            Event::CommandComplete {
                num_hci_command_packets,
                opcode,
                return_parameters,
            } => {
                assert_eq!(num_hci_command_packets, 1);
                assert_eq!(opcode, OpCode::READ_RSSI);
                assert_eq!(return_parameters.as_slice(), &[0x00, 0x40, 0x00]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_command_status() {
        let event = Event::from_hci_bytes(&[0x0F, 0x04, 0x04, 0x01, 0x05, 0x04]).unwrap();
        assert_eq!(
            event,
            Event::CommandStatus {
                status: ErrorCode::PAGE_TIMEOUT,
                num_hci_command_packets: 1,
                opcode: OpCode::CREATE_CONNECTION,
            }
        );
    }

    #[test]
    fn test_connection_complete() {
        let bytes = [
            0x03, 0x0B, 0x00, 0x40, 0x00, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x01, 0x00,
        ];
        let event = Event::from_hci_bytes(&bytes).unwrap();
        assert_eq!(
            event,
            Event::ConnectionComplete {
                status: ErrorCode::SUCCESS,
                handle: ConnectionHandle::new(0x40),
                peer: Address::new([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]),
                link_type: 1,
                encryption_enabled: false,
            }
        );
    }

    #[test]
    fn test_number_of_completed_packets() {
        let bytes = [0x13, 0x09, 0x02, 0x40, 0x00, 0x02, 0x00, 0x41, 0x00, 0x01, 0x00];
        let Event::NumberOfCompletedPackets { entries } = Event::from_hci_bytes(&bytes).unwrap()
        else {
            panic!("wrong event");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].handle, ConnectionHandle::new(0x40));
        assert_eq!(entries[0].count, 2);
        assert_eq!(entries[1].count, 1);
    }

    #[test]
    fn test_enhanced_le_connection_complete() {
        let mut bytes = [0u8; 33];
        bytes[..5].copy_from_slice(&[0x3E, 31, 0x0A, 0x00, 0x41]);
        bytes[6] = 0x01; // peripheral
        bytes[7] = 0x01; // random peer
        bytes[8..14].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        bytes[14..20].copy_from_slice(&[9, 9, 9, 9, 9, 0x49]);
        bytes[26] = 0x18;
        let Event::LeMeta(LeMetaEvent::ConnectionComplete(complete)) =
            Event::from_hci_bytes(&bytes).unwrap()
        else {
            panic!("wrong event");
        };
        assert_eq!(complete.handle, ConnectionHandle::new(0x41));
        assert_eq!(complete.role, Role::Peripheral);
        assert_eq!(
            complete.peer,
            AddressWithType::random(Address::new([1, 2, 3, 4, 5, 6]))
        );
        assert_eq!(
            complete.local_resolvable_address,
            Some(Address::new([9, 9, 9, 9, 9, 0x49]))
        );
        assert_eq!(complete.interval, 0x18);
    }

    #[test]
    fn test_advertising_set_terminated() {
        let bytes = [0x3E, 0x06, 0x12, 0x43, 0x02, 0x00, 0x00, 0x05];
        assert_eq!(
            Event::from_hci_bytes(&bytes).unwrap(),
            Event::LeMeta(LeMetaEvent::AdvertisingSetTerminated {
                status: ErrorCode::LIMIT_REACHED,
                advertising_handle: 2,
                connection_handle: ConnectionHandle::new(0),
                num_completed_events: 5,
            })
        );
    }

    #[test]
    fn test_vendor_state_change() {
        let bytes = [0xFF, 0x05, 0x55, 0x03, 0x00, 0x42, 0x00];
        assert_eq!(
            Event::from_hci_bytes(&bytes).unwrap(),
            Event::Vendor(VendorEvent::MultiAdvStateChange {
                advertising_instance: 3,
                reason: VendorEvent::CONNECTION_RECEIVED,
                connection_handle: ConnectionHandle::new(0x42),
            })
        );
    }

    #[test]
    fn test_malformed_events() {
        assert_eq!(Event::from_hci_bytes(&[0x0E]), Err(Error::Truncated));
        assert_eq!(
            Event::from_hci_bytes(&[0x05, 0x03, 0x00, 0x40, 0x00]),
            Err(Error::Truncated)
        );
        assert_eq!(
            Event::from_hci_bytes(&[0x05, 0x04, 0x00, 0x40]),
            Err(Error::Truncated)
        );
        assert_eq!(
            Event::from_hci_bytes(&[0x10, 0x01, 0x00]),
            Err(Error::UnknownEvent(0x10))
        );
        assert_eq!(
            Event::from_hci_bytes(&[0x3E, 0x02, 0x02, 0x00]),
            Err(Error::UnknownEvent(0x3E))
        );
    }

    #[test]
    fn test_credit_only_command_complete() {
        assert_eq!(
            Event::from_hci_bytes(&[0x0E, 0x03, 0x05, 0x00, 0x00]).unwrap(),
            Event::CommandComplete {
                num_hci_command_packets: 5,
                opcode: OpCode(0),
                return_parameters: Vec::new(),
            }
        );
    }

    #[test]
    fn test_mode_change_reports_park() {
        let bytes = [0x14, 0x06, 0x00, 0x40, 0x00, 0x03, 0x00, 0x08];
        assert_eq!(
            Event::from_hci_bytes(&bytes).unwrap(),
            Event::ModeChange {
                status: ErrorCode::SUCCESS,
                handle: ConnectionHandle::new(0x40),
                mode: LinkMode::Park,
                interval: 0x0800,
            }
        );
    }

    #[test]
    fn test_connection_request_class_of_device() {
        let bytes = [
            0x04, 0x0A, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x0C, 0x02, 0x5A, 0x01,
        ];
        assert_eq!(
            Event::from_hci_bytes(&bytes).unwrap(),
            Event::ConnectionRequest {
                peer: Address::new([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]),
                class_of_device: 0x5A020C,
                link_type: 1,
            }
        );
    }
}
