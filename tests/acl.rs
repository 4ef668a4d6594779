mod common;

use std::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use linkbird::{
    Address, AddressWithType, Error,
    constants::MAX_CONNECTIONS,
    acl::{
        AclBuffers, AclManager, AclOptions, ConnectionManagementCallbacks,
        LeConnectionManagementCallbacks, LeConnectionParameters, LinkId,
    },
    hci::{
        Command, ConnectionHandle, ErrorCode, Event, LeMetaEvent, LinkMode, OpCode, Role,
        event::{CompletedPackets, LeConnectionComplete},
    },
};

use common::*;

const PEER_A: Address = Address::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
const PEER_B: Address = Address::new([0x21, 0x22, 0x33, 0x44, 0x55, 0x66]);
const PEER_C: Address = Address::new([0x31, 0x22, 0x33, 0x44, 0x55, 0x66]);

const LE_PEER_A: AddressWithType = AddressWithType::random(Address::new([0xA1, 0, 0, 0, 0, 0xC0]));
const LE_PEER_B: AddressWithType = AddressWithType::random(Address::new([0xB1, 0, 0, 0, 0, 0xC0]));

/// Everything a link reported back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    PolicyWritten(u16),
    Rssi(i8),
    Role(Role),
    Clock(u32, u16),
    Mode(ErrorCode, LinkMode, u16),
    Failed(OpCode, ErrorCode),
    Updated(ErrorCode, u16, u16, u16),
    Disconnected(ErrorCode),
}

#[derive(Default)]
struct LinkLog {
    events: RefCell<Vec<Link>>,
}

impl LinkLog {
    fn take(&self) -> Vec<Link> {
        self.events.take()
    }

    fn push(&self, event: Link) {
        self.events.borrow_mut().push(event);
    }
}

impl ConnectionManagementCallbacks for LinkLog {
    fn on_write_link_policy_settings_complete(&self, settings: u16) {
        self.push(Link::PolicyWritten(settings));
    }

    fn on_read_rssi_complete(&self, rssi: i8) {
        self.push(Link::Rssi(rssi));
    }

    fn on_role_discovery_complete(&self, role: Role) {
        self.push(Link::Role(role));
    }

    fn on_read_clock_complete(&self, clock: u32, accuracy: u16) {
        self.push(Link::Clock(clock, accuracy));
    }

    fn on_mode_change(&self, status: ErrorCode, mode: LinkMode, interval: u16) {
        self.push(Link::Mode(status, mode, interval));
    }

    fn on_command_failed(&self, opcode: OpCode, status: ErrorCode) {
        self.push(Link::Failed(opcode, status));
    }

    fn on_disconnection(&self, reason: ErrorCode) {
        self.push(Link::Disconnected(reason));
    }
}

impl LeConnectionManagementCallbacks for LinkLog {
    fn on_connection_update(
        &self,
        status: ErrorCode,
        interval: u16,
        latency: u16,
        supervision_timeout: u16,
    ) {
        self.push(Link::Updated(status, interval, latency, supervision_timeout));
    }

    fn on_read_rssi_complete(&self, rssi: i8) {
        self.push(Link::Rssi(rssi));
    }

    fn on_disconnection(&self, reason: ErrorCode) {
        self.push(Link::Disconnected(reason));
    }
}

fn manager<'d>(
    transport: &'d Recorder,
    buffers: &'d AclBuffers<NoopRawMutex>,
    options: AclOptions,
) -> AclManager<'d, NoopRawMutex> {
    AclManager::new(
        transport,
        buffers,
        options,
        AddressWithType::public(PUBLIC_ADDRESS),
    )
}

fn connection_complete(status: ErrorCode, handle: u16, peer: Address) -> Event {
    Event::ConnectionComplete {
        status,
        handle: ConnectionHandle::new(handle),
        peer,
        link_type: 0x01,
        encryption_enabled: false,
    }
}

fn le_connection_complete(
    status: ErrorCode,
    handle: u16,
    role: Role,
    peer: AddressWithType,
    local_resolvable_address: Option<Address>,
) -> Event {
    Event::LeMeta(LeMetaEvent::ConnectionComplete(LeConnectionComplete {
        status,
        handle: ConnectionHandle::new(handle),
        role,
        peer,
        local_resolvable_address,
        interval: 24,
        latency: 0,
        supervision_timeout: 500,
    }))
}

fn disconnection_complete(handle: ConnectionHandle, reason: ErrorCode) -> Event {
    Event::DisconnectionComplete {
        status: ErrorCode::SUCCESS,
        handle,
        reason,
    }
}

fn paged_peer(command: &Command) -> Option<Address> {
    match command {
        Command::CreateConnection { peer, .. } => Some(*peer),
        _ => None,
    }
}

fn classic_link(lifecycle: &LifecycleLog) -> LinkId {
    match lifecycle.take().as_slice() {
        [Lifecycle::Connected(connection)] => connection.link,
        other => panic!("expected one connection, got {:?}", other),
    }
}

fn le_link(lifecycle: &LifecycleLog) -> LinkId {
    match lifecycle.take().as_slice() {
        [Lifecycle::LeConnected(_, connection)] => connection.link,
        other => panic!("expected one LE connection, got {:?}", other),
    }
}

#[test]
fn test_pages_are_serialized_in_request_order() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);

    acl.create_connection(PEER_A).unwrap();
    acl.create_connection(PEER_B).unwrap();
    acl.create_connection(PEER_C).unwrap();
    acl.create_connection(PEER_B).unwrap();
    let commands = transport.take();
    assert_eq!(commands.len(), 1);
    assert_eq!(paged_peer(&commands[0]), Some(PEER_A));

    acl.on_command_status(OpCode::CREATE_CONNECTION, ErrorCode::SUCCESS);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let commands = transport.take();
    assert_eq!(paged_peer(&commands[0]), Some(PEER_B));

    acl.on_command_status(OpCode::CREATE_CONNECTION, ErrorCode::SUCCESS);
    acl.on_event(&connection_complete(ErrorCode::PAGE_TIMEOUT, 0, PEER_B));
    let commands = transport.take();
    assert_eq!(paged_peer(&commands[0]), Some(PEER_C));

    let events = lifecycle.take();
    assert_eq!(events.len(), 2);
    match events[0] {
        Lifecycle::Connected(connection) => {
            assert_eq!(connection.peer, PEER_A);
            assert_eq!(connection.role, Role::Central);
            assert!(connection.locally_initiated);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        events[1],
        Lifecycle::Failed(PEER_B, ErrorCode::PAGE_TIMEOUT, true)
    );
    assert!(acl.is_connected(PEER_A));
    assert!(!acl.is_connected(PEER_B));
}

#[test]
fn test_connecting_to_a_connected_peer_fails_immediately() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    lifecycle.take();

    acl.create_connection(PEER_A).unwrap();

    assert!(transport.take().is_empty());
    assert_eq!(
        lifecycle.take(),
        [Lifecycle::Failed(
            PEER_A,
            ErrorCode::CONNECTION_ALREADY_EXISTS,
            true
        )]
    );
}

#[test]
fn test_cancel_connect_drops_queued_and_stops_outstanding() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.create_connection(PEER_A).unwrap();
    acl.create_connection(PEER_B).unwrap();
    acl.on_command_status(OpCode::CREATE_CONNECTION, ErrorCode::SUCCESS);
    transport.take();

    acl.cancel_connect(PEER_B);
    assert!(transport.take().is_empty());

    acl.cancel_connect(PEER_A);
    assert_eq!(
        transport.take(),
        [Command::CreateConnectionCancel { peer: PEER_A }]
    );
    acl.on_command_complete(OpCode::CREATE_CONNECTION_CANCEL, &[0]);
    acl.on_event(&connection_complete(ErrorCode::UNKNOWN_CONNECTION, 0, PEER_A));

    // PEER_B was withdrawn, so nothing else is paged
    assert!(transport.take().is_empty());
    assert_eq!(
        lifecycle.take(),
        [Lifecycle::Failed(PEER_A, ErrorCode::UNKNOWN_CONNECTION, true)]
    );
}

#[test]
fn test_incoming_connection_is_accepted_with_callbacks() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);

    acl.on_event(&Event::ConnectionRequest {
        peer: PEER_B,
        class_of_device: 0x5A020C,
        link_type: 0x01,
    });
    assert_eq!(
        transport.take(),
        [Command::AcceptConnectionRequest {
            peer: PEER_B,
            role: Role::Peripheral,
        }]
    );
    acl.on_command_status(OpCode::ACCEPT_CONNECTION_REQUEST, ErrorCode::SUCCESS);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x41, PEER_B));

    match lifecycle.take().as_slice() {
        [Lifecycle::Connected(connection)] => {
            assert_eq!(connection.peer, PEER_B);
            assert_eq!(connection.role, Role::Peripheral);
            assert!(!connection.locally_initiated);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_incoming_connection_is_rejected_without_callbacks() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let mut acl = manager(&transport, &buffers, AclOptions::default());

    acl.on_event(&Event::ConnectionRequest {
        peer: PEER_B,
        class_of_device: 0,
        link_type: 0x01,
    });

    assert_eq!(
        transport.take(),
        [Command::RejectConnectionRequest {
            peer: PEER_B,
            reason: ErrorCode::CONNECTION_REJECTED_LIMITED_RESOURCES,
        }]
    );
    assert_eq!(acl.create_connection(PEER_A), Err(Error::NotRegistered));
}

#[test]
fn test_direct_le_connection() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);
    let options = *acl.options();

    acl.create_le_connection(LE_PEER_A, false).unwrap();
    match transport.take().as_slice() {
        [
            Command::LeCreateConnection {
                scan_interval,
                scan_window,
                use_filter_accept_list,
                peer,
                own_address_type,
                ..
            },
        ] => {
            assert_eq!(*scan_interval, options.le_scan_interval_fast);
            assert_eq!(*scan_window, options.le_scan_window_fast);
            assert!(!use_filter_accept_list);
            assert_eq!(*peer, LE_PEER_A);
            assert_eq!(*own_address_type, 0);
        }
        other => panic!("unexpected {:?}", other),
    }
    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::SUCCESS);

    let rpa = Address::new([0x07, 0, 0, 0, 0, 0x40]);
    acl.on_event(&le_connection_complete(
        ErrorCode::SUCCESS,
        0x50,
        Role::Central,
        LE_PEER_A,
        Some(rpa),
    ));

    match lifecycle.take().as_slice() {
        [Lifecycle::LeConnected(peer, connection)] => {
            assert_eq!(*peer, LE_PEER_A);
            assert_eq!(connection.local_address, AddressWithType::random(rpa));
            assert_eq!(connection.role, Role::Central);
            assert_eq!(connection.interval, 24);
            assert_eq!(connection.supervision_timeout, 500);
            assert!(!connection.discoverable);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(acl.connection_count(), 1);
    assert!(transport.take().is_empty());
}

#[test]
fn test_new_request_restarts_initiation_after_cancel() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);
    let options = *acl.options();
    acl.create_le_connection(LE_PEER_A, false).unwrap();
    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::SUCCESS);
    transport.take();

    acl.create_le_connection(LE_PEER_B, false).unwrap();
    assert_eq!(transport.take(), [Command::LeCreateConnectionCancel]);

    // Cancel completes first; the initiator waits for the connection complete
    acl.on_command_complete(OpCode::LE_CREATE_CONNECTION_CANCEL, &[0]);
    assert!(transport.take().is_empty());

    acl.on_event(&le_connection_complete(
        ErrorCode::UNKNOWN_CONNECTION,
        0,
        Role::Central,
        AddressWithType::default(),
        None,
    ));
    match transport.take().as_slice() {
        [
            Command::LeCreateConnection {
                scan_interval,
                peer,
                ..
            },
        ] => {
            assert_eq!(*scan_interval, options.le_scan_interval_slow);
            assert_eq!(*peer, LE_PEER_B);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(lifecycle.take().is_empty());

    // The older request is served once the newer one is done
    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::SUCCESS);
    acl.on_event(&le_connection_complete(
        ErrorCode::SUCCESS,
        0x52,
        Role::Central,
        LE_PEER_B,
        None,
    ));
    match transport.take().as_slice() {
        [Command::LeCreateConnection { peer, .. }] => assert_eq!(*peer, LE_PEER_A),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(le_link(&lifecycle).handle, ConnectionHandle::new(0x52));
}

#[test]
fn test_failed_cancel_waits_for_the_running_attempt() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);
    acl.create_le_connection(LE_PEER_A, false).unwrap();
    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::SUCCESS);
    transport.take();
    acl.create_le_connection(LE_PEER_B, false).unwrap();
    assert_eq!(transport.take(), [Command::LeCreateConnectionCancel]);

    // The controller already has the link but has not reported it yet
    acl.on_command_complete(
        OpCode::LE_CREATE_CONNECTION_CANCEL,
        &[ErrorCode::CONNECTION_ALREADY_EXISTS.0],
    );
    assert!(transport.take().is_empty());
    assert!(!acl.expects(OpCode::LE_CREATE_CONNECTION));

    acl.on_event(&le_connection_complete(
        ErrorCode::SUCCESS,
        0x53,
        Role::Central,
        LE_PEER_A,
        None,
    ));
    match transport.take().as_slice() {
        [Command::LeCreateConnection { peer, .. }] => assert_eq!(*peer, LE_PEER_B),
        other => panic!("unexpected {:?}", other),
    }
    match lifecycle.take().as_slice() {
        [Lifecycle::LeConnected(peer, _)] => assert_eq!(*peer, LE_PEER_A),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_failed_cancel_then_failed_attempt_moves_on() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);
    acl.create_le_connection(LE_PEER_A, false).unwrap();
    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::SUCCESS);
    acl.create_le_connection(LE_PEER_B, false).unwrap();
    transport.take();

    acl.on_command_complete(
        OpCode::LE_CREATE_CONNECTION_CANCEL,
        &[ErrorCode::COMMAND_DISALLOWED.0],
    );
    assert!(transport.take().is_empty());

    acl.on_event(&le_connection_complete(
        ErrorCode::CONNECTION_FAILED_ESTABLISHMENT,
        0,
        Role::Central,
        LE_PEER_A,
        None,
    ));
    match lifecycle.take().as_slice() {
        [Lifecycle::LeFailed(peer, reason)] => {
            assert_eq!(*peer, LE_PEER_A);
            assert_eq!(*reason, ErrorCode::CONNECTION_FAILED_ESTABLISHMENT);
        }
        other => panic!("unexpected {:?}", other),
    }
    match transport.take().as_slice() {
        [Command::LeCreateConnection { peer, .. }] => assert_eq!(*peer, LE_PEER_B),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_connection_that_wins_the_cancel_race() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);
    let options = *acl.options();
    acl.create_le_connection(LE_PEER_A, false).unwrap();
    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::SUCCESS);
    acl.create_le_connection(LE_PEER_B, false).unwrap();
    transport.take();

    acl.on_event(&le_connection_complete(
        ErrorCode::SUCCESS,
        0x50,
        Role::Central,
        LE_PEER_A,
        None,
    ));
    assert!(transport.take().is_empty());
    match lifecycle.take().as_slice() {
        [Lifecycle::LeConnected(peer, connection)] => {
            assert_eq!(*peer, LE_PEER_A);
            assert_eq!(
                connection.local_address,
                AddressWithType::public(PUBLIC_ADDRESS)
            );
        }
        other => panic!("unexpected {:?}", other),
    }

    // Nothing left to cancel
    acl.on_command_complete(
        OpCode::LE_CREATE_CONNECTION_CANCEL,
        &[ErrorCode::CONNECTION_ALREADY_EXISTS.0],
    );
    match transport.take().as_slice() {
        [
            Command::LeCreateConnection {
                scan_interval,
                peer,
                ..
            },
        ] => {
            assert_eq!(*scan_interval, options.le_scan_interval_slow);
            assert_eq!(*peer, LE_PEER_B);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_accept_list_entries_follow_requests() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);

    acl.create_le_connection(LE_PEER_A, true).unwrap();
    assert_eq!(
        transport.take(),
        [Command::LeAddDeviceToFilterAcceptList { peer: LE_PEER_A }]
    );
    acl.on_command_complete(OpCode::LE_ADD_DEVICE_TO_FILTER_ACCEPT_LIST, &[0]);
    match transport.take().as_slice() {
        [
            Command::LeCreateConnection {
                use_filter_accept_list,
                peer,
                ..
            },
        ] => {
            assert!(*use_filter_accept_list);
            assert_eq!(*peer, AddressWithType::default());
        }
        other => panic!("unexpected {:?}", other),
    }
    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::SUCCESS);

    acl.on_event(&le_connection_complete(
        ErrorCode::SUCCESS,
        0x51,
        Role::Central,
        LE_PEER_A,
        None,
    ));
    assert_eq!(
        transport.take(),
        [Command::LeRemoveDeviceFromFilterAcceptList { peer: LE_PEER_A }]
    );
    acl.on_command_complete(OpCode::LE_REMOVE_DEVICE_FROM_FILTER_ACCEPT_LIST, &[0]);
    assert!(transport.take().is_empty());
    assert_eq!(lifecycle.take().len(), 1);
}

#[test]
fn test_cancelling_background_connection_clears_accept_list() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);
    acl.create_le_connection(LE_PEER_A, true).unwrap();
    acl.on_command_complete(OpCode::LE_ADD_DEVICE_TO_FILTER_ACCEPT_LIST, &[0]);
    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::SUCCESS);
    transport.take();

    acl.cancel_le_connect(LE_PEER_A);
    assert_eq!(transport.take(), [Command::LeCreateConnectionCancel]);

    acl.on_event(&le_connection_complete(
        ErrorCode::UNKNOWN_CONNECTION,
        0,
        Role::Central,
        AddressWithType::default(),
        None,
    ));
    assert!(transport.take().is_empty());
    acl.on_command_complete(OpCode::LE_CREATE_CONNECTION_CANCEL, &[0]);

    assert_eq!(
        transport.take(),
        [Command::LeRemoveDeviceFromFilterAcceptList { peer: LE_PEER_A }]
    );
    assert!(lifecycle.take().is_empty());
}

#[test]
fn test_rejected_initiation_fails_the_direct_request() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);
    acl.create_le_connection(LE_PEER_A, false).unwrap();
    transport.take();

    acl.on_command_status(OpCode::LE_CREATE_CONNECTION, ErrorCode::COMMAND_DISALLOWED);

    assert_eq!(
        lifecycle.take(),
        [Lifecycle::LeFailed(LE_PEER_A, ErrorCode::COMMAND_DISALLOWED)]
    );
    assert!(transport.take().is_empty());
    assert!(!acl.expects(OpCode::LE_CREATE_CONNECTION));
}

#[test]
fn test_peripheral_connection_waits_for_its_advertising_set() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let options = AclOptions {
        defer_peripheral_connections: true,
        ..AclOptions::default()
    };
    let mut acl = manager(&transport, &buffers, options);
    acl.register_le_callbacks(&lifecycle);

    acl.on_event(&le_connection_complete(
        ErrorCode::SUCCESS,
        0x60,
        Role::Peripheral,
        LE_PEER_B,
        None,
    ));
    assert!(lifecycle.take().is_empty());
    assert_eq!(acl.connection_count(), 0);

    let advertiser = AddressWithType::random(Address::new([0x09, 0, 0, 0, 0, 0x40]));
    acl.on_advertising_set_terminated(ConnectionHandle::new(0x61), advertiser, true);
    assert!(lifecycle.take().is_empty());

    acl.on_advertising_set_terminated(ConnectionHandle::new(0x60), advertiser, true);
    match lifecycle.take().as_slice() {
        [Lifecycle::LeConnected(peer, connection)] => {
            assert_eq!(*peer, LE_PEER_B);
            assert_eq!(connection.role, Role::Peripheral);
            assert_eq!(connection.local_address, advertiser);
            assert!(connection.discoverable);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(acl.link(ConnectionHandle::new(0x60)).is_some());
}

#[test]
fn test_peripheral_connection_without_deferral_is_reported_at_once() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);

    acl.on_event(&le_connection_complete(
        ErrorCode::SUCCESS,
        0x60,
        Role::Peripheral,
        LE_PEER_B,
        None,
    ));

    let link = le_link(&lifecycle);
    assert_eq!(link.handle, ConnectionHandle::new(0x60));
}

#[test]
fn test_link_operations_report_through_link_callbacks() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let link_log = LinkLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let link = classic_link(&lifecycle);
    acl.register_connection_callbacks(link, &link_log);

    acl.write_link_policy_settings(link, 0x0005);
    assert_eq!(
        transport.take(),
        [Command::WriteLinkPolicySettings {
            handle: link.handle,
            settings: 0x0005,
        }]
    );
    acl.on_command_complete(OpCode::WRITE_LINK_POLICY_SETTINGS, &[0, 0x40, 0x00]);
    assert_eq!(acl.link_policy_settings(link), 0x0005);

    acl.read_rssi(link);
    acl.on_command_complete(OpCode::READ_RSSI, &[0, 0x40, 0x00, 0xF6]);
    acl.role_discovery(link);
    acl.on_command_complete(OpCode::ROLE_DISCOVERY, &[0, 0x40, 0x00, 0x01]);
    acl.read_clock(link, true);
    acl.on_command_complete(
        OpCode::READ_CLOCK,
        &[0, 0x40, 0x00, 0x78, 0x56, 0x34, 0x12, 0x03, 0x00],
    );
    acl.read_link_quality(link);
    acl.on_command_complete(OpCode::READ_LINK_QUALITY, &[ErrorCode::UNKNOWN_CONNECTION.0]);
    acl.sniff_mode(link, 800, 400, 4, 1);
    acl.on_command_status(OpCode::SNIFF_MODE, ErrorCode::COMMAND_DISALLOWED);

    assert_eq!(
        link_log.take(),
        [
            Link::PolicyWritten(0x0005),
            Link::Rssi(-10),
            Link::Role(Role::Peripheral),
            Link::Clock(0x1234_5678, 3),
            Link::Failed(OpCode::READ_LINK_QUALITY, ErrorCode::UNKNOWN_CONNECTION),
            Link::Failed(OpCode::SNIFF_MODE, ErrorCode::COMMAND_DISALLOWED),
        ]
    );
    assert!(!acl.expects(OpCode::SNIFF_MODE));
}

#[test]
fn test_park_state_entry_and_exit() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let link_log = LinkLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let link = classic_link(&lifecycle);
    acl.register_connection_callbacks(link, &link_log);

    acl.park_state(link, 0x0400, 0x0200);
    assert_eq!(
        transport.take(),
        [Command::ParkState {
            handle: link.handle,
            beacon_max_interval: 0x0400,
            beacon_min_interval: 0x0200,
        }]
    );
    acl.on_command_status(OpCode::PARK_STATE, ErrorCode::SUCCESS);
    acl.on_event(&Event::ModeChange {
        status: ErrorCode::SUCCESS,
        handle: link.handle,
        mode: LinkMode::Park,
        interval: 0x0300,
    });

    acl.exit_park_state(link);
    assert_eq!(transport.take(), [Command::ExitParkState { handle: link.handle }]);
    acl.on_command_status(OpCode::EXIT_PARK_STATE, ErrorCode::COMMAND_DISALLOWED);

    assert_eq!(
        link_log.take(),
        [
            Link::Mode(ErrorCode::SUCCESS, LinkMode::Park, 0x0300),
            Link::Failed(OpCode::EXIT_PARK_STATE, ErrorCode::COMMAND_DISALLOWED),
        ]
    );
    assert!(!acl.expects(OpCode::PARK_STATE));
}

#[test]
fn test_le_connection_update_and_rssi() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let link_log = LinkLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_le_callbacks(&lifecycle);
    acl.on_event(&le_connection_complete(
        ErrorCode::SUCCESS,
        0x70,
        Role::Peripheral,
        LE_PEER_A,
        None,
    ));
    let link = le_link(&lifecycle);
    acl.register_le_connection_callbacks(link, &link_log);

    acl.connection_update(
        link,
        LeConnectionParameters {
            interval_min: 40,
            interval_max: 56,
            max_latency: 0,
            supervision_timeout: 420,
        },
    );
    assert_eq!(
        transport.take(),
        [Command::LeConnectionUpdate {
            handle: link.handle,
            interval_min: 40,
            interval_max: 56,
            max_latency: 0,
            supervision_timeout: 420,
        }]
    );
    acl.on_command_status(OpCode::LE_CONNECTION_UPDATE, ErrorCode::SUCCESS);
    acl.on_event(&Event::LeMeta(LeMetaEvent::ConnectionUpdateComplete {
        status: ErrorCode::SUCCESS,
        handle: link.handle,
        interval: 48,
        latency: 0,
        supervision_timeout: 420,
    }));

    acl.read_rssi(link);
    acl.on_command_complete(OpCode::READ_RSSI, &[0, 0x70, 0x00, 0xC4]);

    assert_eq!(
        link_log.take(),
        [
            Link::Updated(ErrorCode::SUCCESS, 48, 0, 420),
            Link::Rssi(-60),
        ]
    );
}

#[test]
fn test_completed_packets_and_disconnection_return_credits() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let link_log = LinkLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.configure_buffers(4, 27);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let link = classic_link(&lifecycle);
    acl.register_connection_callbacks(link, &link_log);

    let queue = buffers.queue_end(link);
    queue.enqueue(&[1, 0, 0x40, 0, 0xAA]).unwrap();
    queue.enqueue(&[1, 0, 0x40, 0, 0xBB]).unwrap();
    queue.enqueue(&[1, 0, 0x40, 0, 0xCC]).unwrap();
    assert_eq!(acl.pump_outbound(), 3);
    assert_eq!(transport.take_acl().len(), 3);
    assert_eq!(buffers.credits(), 1);
    assert_eq!(buffers.unacked(link.handle), 3);

    acl.on_event(&Event::NumberOfCompletedPackets {
        entries: heapless::Vec::from_slice(&[CompletedPackets {
            handle: link.handle,
            count: 1,
        }])
        .unwrap(),
    });
    assert_eq!(buffers.credits(), 2);
    assert_eq!(buffers.unacked(link.handle), 2);

    acl.disconnect(link, ErrorCode::REMOTE_USER_TERMINATED_CONNECTION);
    assert_eq!(
        transport.take(),
        [Command::Disconnect {
            handle: link.handle,
            reason: ErrorCode::REMOTE_USER_TERMINATED_CONNECTION,
        }]
    );
    acl.on_command_status(OpCode::DISCONNECT, ErrorCode::SUCCESS);
    acl.on_event(&disconnection_complete(
        link.handle,
        ErrorCode::CONNECTION_TERMINATED_BY_LOCAL_HOST,
    ));

    assert_eq!(buffers.credits(), 4);
    assert_eq!(acl.connection_count(), 0);
    assert_eq!(acl.link(link.handle), None);
    assert_eq!(
        link_log.take(),
        [Link::Disconnected(
            ErrorCode::CONNECTION_TERMINATED_BY_LOCAL_HOST
        )]
    );
    assert_eq!(queue.enqueue(&[1, 0, 0x40, 0, 0xDD]), Err(Error::DeviceNotConnected));
}

#[test]
fn test_refused_fragments_keep_their_credits() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.configure_buffers(16, 27);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let link = classic_link(&lifecycle);

    let mut frame = vec![0u8; 254];
    frame[..4].copy_from_slice(&[250, 0, 0x40, 0]);
    buffers.queue_end(link).enqueue(&frame).unwrap();
    transport.limit_acl(8);

    // Ten fragments are due but only eight fit the transport
    assert_eq!(acl.pump_outbound(), 8);
    assert_eq!(transport.acl_len(), 8);
    assert_eq!(buffers.unacked(link.handle), 8);
    assert_eq!(buffers.credits(), 8);

    let mut sent = transport.take_acl();
    assert_eq!(acl.pump_outbound(), 2);
    sent.extend(transport.take_acl());
    assert_eq!(sent.len(), 10);
    assert_eq!(buffers.unacked(link.handle), 10);
    assert_eq!(buffers.credits() + buffers.unacked(link.handle), 16);

    let payload: Vec<u8> = sent.iter().flat_map(|packet| packet[4..].to_vec()).collect();
    assert_eq!(payload, frame);
    assert_eq!(sent[8][1] & 0x30, 0x10);
}

#[test]
fn test_refused_page_fails_the_request() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    transport.limit_commands(0);

    acl.create_connection(PEER_A).unwrap();
    assert!(!acl.expects(OpCode::CREATE_CONNECTION));
    match lifecycle.take().as_slice() {
        [Lifecycle::Failed(peer, reason, true)] => {
            assert_eq!(*peer, PEER_A);
            assert_eq!(*reason, ErrorCode::MEMORY_CAPACITY_EXCEEDED);
        }
        other => panic!("unexpected {:?}", other),
    }

    // The failed page does not block the next one
    transport.limit_commands(1);
    acl.create_connection(PEER_B).unwrap();
    assert_eq!(transport.take().iter().filter_map(paged_peer).collect::<Vec<_>>(), [PEER_B]);
}

#[test]
fn test_refused_link_command_reports_failure() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let link_log = LinkLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let link = classic_link(&lifecycle);
    acl.register_connection_callbacks(link, &link_log);
    transport.limit_commands(0);

    acl.read_rssi(link);
    assert!(!acl.expects(OpCode::READ_RSSI));
    assert_eq!(
        link_log.take(),
        [Link::Failed(OpCode::READ_RSSI, ErrorCode::MEMORY_CAPACITY_EXCEEDED)]
    );
}

#[test]
fn test_disconnect_with_a_status_code_is_refused() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let link_log = LinkLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let link = classic_link(&lifecycle);
    acl.register_connection_callbacks(link, &link_log);
    transport.take();

    acl.disconnect(link, ErrorCode::COMMAND_DISALLOWED);
    assert!(transport.take().is_empty());
    assert!(!acl.expects(OpCode::DISCONNECT));
    assert_eq!(
        link_log.take(),
        [Link::Failed(OpCode::DISCONNECT, ErrorCode::INVALID_HCI_COMMAND_PARAMETERS)]
    );

    acl.disconnect(link, ErrorCode::REMOTE_USER_TERMINATED_CONNECTION);
    assert_eq!(
        transport.take(),
        [Command::Disconnect {
            handle: ConnectionHandle::new(0x40),
            reason: ErrorCode::REMOTE_USER_TERMINATED_CONNECTION,
        }]
    );
}

#[test]
fn test_link_table_overflow_disconnects_the_newcomer() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    for index in 0..MAX_CONNECTIONS {
        let peer = Address::new([index as u8, 0, 0, 0, 0, 0x80]);
        acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40 + index as u16, peer));
    }
    assert_eq!(lifecycle.take().len(), MAX_CONNECTIONS);
    transport.take();

    let overflow = ConnectionHandle::new(0x60);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, overflow.raw(), PEER_B));
    assert!(lifecycle.take().is_empty());
    assert_eq!(
        transport.take(),
        [Command::Disconnect {
            handle: overflow,
            reason: ErrorCode::REMOTE_DEVICE_TERMINATED_CONNECTION_LOW_RESOURCES,
        }]
    );
    assert!(acl.expects(OpCode::DISCONNECT));

    acl.on_command_status(OpCode::DISCONNECT, ErrorCode::SUCCESS);
    assert!(!acl.expects(OpCode::DISCONNECT));
    acl.on_event(&disconnection_complete(
        overflow,
        ErrorCode::CONNECTION_TERMINATED_BY_LOCAL_HOST,
    ));
    assert_eq!(acl.connection_count(), MAX_CONNECTIONS);
}

#[test]
fn test_reused_handle_gets_a_new_link() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);

    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let first = classic_link(&lifecycle);
    acl.on_event(&disconnection_complete(
        first.handle,
        ErrorCode::REMOTE_USER_TERMINATED_CONNECTION,
    ));
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_B));
    let second = classic_link(&lifecycle);

    assert_eq!(first.handle, second.handle);
    assert_ne!(first, second);
    assert_eq!(acl.link(second.handle), Some(second));
}

#[test]
#[should_panic(expected = "operation on stale connection")]
fn test_old_link_is_stale_after_handle_reuse() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let first = classic_link(&lifecycle);
    acl.on_event(&disconnection_complete(
        first.handle,
        ErrorCode::REMOTE_USER_TERMINATED_CONNECTION,
    ));
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_B));

    acl.flush(first);
}

#[test]
fn test_shutdown_forgets_links_and_requests() {
    let transport = Recorder::default();
    let buffers = AclBuffers::new();
    let lifecycle = LifecycleLog::default();
    let mut acl = manager(&transport, &buffers, AclOptions::default());
    acl.register_callbacks(&lifecycle);
    acl.register_le_callbacks(&lifecycle);
    acl.on_event(&connection_complete(ErrorCode::SUCCESS, 0x40, PEER_A));
    let link = classic_link(&lifecycle);
    acl.create_connection(PEER_B).unwrap();
    acl.create_le_connection(LE_PEER_A, false).unwrap();
    transport.take();

    acl.shutdown();

    assert_eq!(acl.connection_count(), 0);
    assert!(!acl.expects(OpCode::CREATE_CONNECTION));
    assert!(!acl.expects(OpCode::LE_CREATE_CONNECTION));
    assert_eq!(
        buffers.queue_end(link).enqueue(&[1, 0, 0x40, 0, 0xAA]),
        Err(Error::DeviceNotConnected)
    );

    // A fresh request starts from an idle initiator
    acl.create_connection(PEER_B).unwrap();
    assert_eq!(transport.opcodes(), [OpCode::CREATE_CONNECTION]);
}
