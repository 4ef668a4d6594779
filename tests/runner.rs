mod common;

use embassy_futures::{
    block_on,
    select::{Either, select},
};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use linkbird::{
    Address, AddressWithType, ControllerInfo, HostOptions,
    acl::LinkId,
    advertising::{
        AddressPolicy, AdvertisingConfig, AdvertisingStatus, GapData, GapDataType, GapPayload,
    },
    api::{LinkOperation, Request, Response},
    hci::{
        Command, ConnectionHandle, ErrorCode, Event, LeMetaEvent, OpCode, Role,
        event::LeConnectionComplete, transport::AclPacketBuffer,
    },
    processor::{Host, HostResources, InboundPacket, OutboundPacket},
};

use common::*;

type TestHost = Host<'static, NoopRawMutex>;
type TestResources = HostResources<'static, NoopRawMutex>;

const PEER_A: Address = Address::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// Build a host whose resources, collaborators and callbacks live for the whole test
fn host(controller: ControllerInfo, policy: AddressPolicy) -> (TestHost, &'static TestResources) {
    let resources: &'static TestResources = leak(HostResources::new());
    let platform = Box::leak(Box::new(Platform::new(policy)));
    let (collaborators, _, _, _) = platform.collaborators();
    let host = Host::new(resources, controller, HostOptions::default(), collaborators);
    (host, resources)
}

/// Commands waiting on the outbound channel
fn drain_commands(resources: &TestResources) -> Vec<Command> {
    let mut commands = Vec::new();
    while let Some(packet) = resources.try_next_outbound() {
        if let OutboundPacket::Command(command) = packet {
            commands.push(command);
        }
    }
    commands
}

/// Answer every command the host sends with a successful Command Complete
fn settle(host: &mut TestHost, resources: &TestResources) -> Vec<OpCode> {
    let mut sent = Vec::new();
    loop {
        host.flush_outbound();
        let Some(packet) = resources.try_next_outbound() else {
            return sent;
        };
        let OutboundPacket::Command(command) = packet else {
            continue;
        };
        let opcode = command.opcode();
        let params: &[u8] = match opcode {
            OpCode::LE_SET_EXTENDED_ADVERTISING_PARAMETERS => &[0x00, 0x05],
            OpCode::LE_READ_ADVERTISING_PHYSICAL_CHANNEL_TX_POWER => &[0x00, 0x09],
            _ => &[0x00],
        };
        host.handle_event(&command_complete(opcode, params));
        sent.push(opcode);
    }
}

fn raw_event(bytes: &[u8]) -> InboundPacket {
    InboundPacket::Event(heapless::Vec::from_slice(bytes).unwrap())
}

fn connect_classic(host: &mut TestHost, lifecycle: &LifecycleLog) -> LinkId {
    let mut bytes = vec![0x03, 0x0B, 0x00, 0x40, 0x00];
    bytes.extend_from_slice(PEER_A.as_bytes());
    bytes.extend_from_slice(&[0x01, 0x00]);
    host.handle_packet(&raw_event(&bytes));
    match lifecycle.take().as_slice() {
        [Lifecycle::Connected(connection)] => connection.link,
        other => panic!("expected one connection, got {:?}", other),
    }
}

#[test]
fn test_peripheral_deferral_follows_the_advertising_generation() {
    let (legacy, _) = host(legacy_controller(), AddressPolicy::UsePublicAddress);
    assert!(!legacy.acl().options().defer_peripheral_connections);

    let (extended, _) = host(extended_controller(), AddressPolicy::UsePublicAddress);
    assert!(extended.acl().options().defer_peripheral_connections);
}

#[test]
fn test_commands_wait_for_controller_credit() {
    let (mut host, resources) = host(legacy_controller(), AddressPolicy::UsePublicAddress);
    let lifecycle = leak(LifecycleLog::default());
    host.start();
    assert_eq!(
        drain_commands(resources),
        [Command::LeReadAdvertisingPhysicalChannelTxPower]
    );

    assert_eq!(
        host.handle_request(Request::RegisterConnectionCallbacks(lifecycle)),
        Some(Response::Ack)
    );
    assert_eq!(
        host.handle_request(Request::CreateConnection(PEER_A)),
        Some(Response::Done(Ok(())))
    );
    host.flush_outbound();
    assert!(resources.try_next_outbound().is_none());

    // The tx power completion refreshes the credit and goes to the advertising manager
    host.handle_packet(&raw_event(&[0x0E, 0x05, 0x01, 0x07, 0x20, 0x00, 0x09]));
    assert!(!host.advertising().expects(OpCode::LE_READ_ADVERTISING_PHYSICAL_CHANNEL_TX_POWER));
    host.flush_outbound();
    match drain_commands(resources).as_slice() {
        [Command::CreateConnection { peer, .. }] => assert_eq!(*peer, PEER_A),
        other => panic!("unexpected {:?}", other),
    }

    host.handle_packet(&raw_event(&[0x0F, 0x04, 0x00, 0x01, 0x05, 0x04]));
    assert!(!host.acl().expects(OpCode::CREATE_CONNECTION));

    let link = connect_classic(&mut host, lifecycle);
    assert_eq!(link.handle, ConnectionHandle::new(0x40));
    assert!(host.acl().is_connected(PEER_A));
}

#[test]
fn test_acl_data_moves_between_queues_and_wire() {
    let (mut host, resources) = host(legacy_controller(), AddressPolicy::UsePublicAddress);
    let lifecycle = leak(LifecycleLog::default());
    host.handle_request(Request::RegisterConnectionCallbacks(lifecycle));
    let link = connect_classic(&mut host, lifecycle);

    resources
        .queue_end(link)
        .enqueue(&[0x01, 0x00, 0x40, 0x00, 0xBB])
        .unwrap();
    host.flush_outbound();
    assert_eq!(
        resources.try_next_outbound(),
        Some(OutboundPacket::Acl(
            AclPacketBuffer::from_slice(&[0x40, 0x00, 0x05, 0x00, 0x01, 0x00, 0x40, 0x00, 0xBB])
                .unwrap()
        ))
    );

    host.handle_packet(&InboundPacket::Acl(
        AclPacketBuffer::from_slice(&[0x40, 0x20, 0x05, 0x00, 0x01, 0x00, 0x40, 0x00, 0xAA])
            .unwrap(),
    ));
    let frame = resources.queue_end(link).try_dequeue().unwrap();
    assert_eq!(frame.as_slice(), &[0x01, 0x00, 0x40, 0x00, 0xAA]);

    // Data for a handle nobody owns is dropped
    host.handle_packet(&InboundPacket::Acl(
        AclPacketBuffer::from_slice(&[0x41, 0x20, 0x05, 0x00, 0x01, 0x00, 0x40, 0x00, 0xAA])
            .unwrap(),
    ));
    assert!(resources.queue_end(link).try_dequeue().is_none());
}

#[test]
fn test_link_requests_reach_the_acl_manager() {
    let (mut host, resources) = host(legacy_controller(), AddressPolicy::UsePublicAddress);
    let lifecycle = leak(LifecycleLog::default());
    host.handle_request(Request::RegisterConnectionCallbacks(lifecycle));
    let link = connect_classic(&mut host, lifecycle);

    assert_eq!(
        host.handle_request(Request::Link(link, LinkOperation::ReadRssi)),
        None
    );
    host.flush_outbound();
    assert_eq!(
        drain_commands(resources),
        [Command::ReadRssi {
            handle: link.handle
        }]
    );
    assert!(host.acl().expects(OpCode::READ_RSSI));

    host.handle_event(&command_complete(OpCode::READ_RSSI, &[0x00, 0x40, 0x00, 0xF0]));
    assert!(!host.acl().expects(OpCode::READ_RSSI));

    host.handle_request(Request::Link(
        link,
        LinkOperation::Disconnect(ErrorCode::REMOTE_USER_TERMINATED_CONNECTION),
    ));
    host.flush_outbound();
    assert_eq!(
        drain_commands(resources),
        [Command::Disconnect {
            handle: link.handle,
            reason: ErrorCode::REMOTE_USER_TERMINATED_CONNECTION,
        }]
    );
    host.handle_event(&command_status(OpCode::DISCONNECT, ErrorCode::SUCCESS));
    host.handle_packet(&raw_event(&[0x05, 0x04, 0x00, 0x40, 0x00, 0x16]));
    assert_eq!(host.acl().connection_count(), 0);
}

#[test]
fn test_set_termination_releases_the_deferred_link() {
    let (mut host, resources) = host(extended_controller(), AddressPolicy::UsePublicAddress);
    let lifecycle = leak(LifecycleLog::default());
    let advertising = leak(AdvertisingLog::default());
    host.start();
    host.handle_request(Request::RegisterLeConnectionCallbacks(lifecycle));
    host.handle_request(Request::RegisterAdvertisingCallbacks(advertising));

    let config = AdvertisingConfig {
        connectable: true,
        discoverable: true,
        advertisement: GapPayload::from_slice(&[GapData::new(
            GapDataType::COMPLETE_LOCAL_NAME,
            b"bird",
        )
        .unwrap()])
        .unwrap(),
        ..AdvertisingConfig::default()
    };
    host.handle_request(Request::CreateExtendedAdvertiser {
        reg_id: 3,
        config,
        duration: 0,
        max_extended_advertising_events: 0,
    });
    let sent = settle(&mut host, resources);
    assert_eq!(sent.last(), Some(&OpCode::LE_SET_EXTENDED_ADVERTISING_ENABLE));
    let id = match advertising.take().as_slice() {
        [
            Advertising::SetStarted {
                reg_id: 3,
                id,
                tx_power: 5,
                status: AdvertisingStatus::Success,
            },
        ] => *id,
        other => panic!("unexpected {:?}", other),
    };

    let peer = AddressWithType::random(Address::new([0x0A, 0, 0, 0, 0, 0xC0]));
    host.handle_event(&Event::LeMeta(LeMetaEvent::ConnectionComplete(
        LeConnectionComplete {
            status: ErrorCode::SUCCESS,
            handle: ConnectionHandle::new(0x40),
            role: Role::Peripheral,
            peer,
            local_resolvable_address: None,
            interval: 24,
            latency: 0,
            supervision_timeout: 500,
        },
    )));
    assert!(lifecycle.take().is_empty());

    host.handle_event(&Event::LeMeta(LeMetaEvent::ScanRequestReceived {
        advertising_handle: id,
        scanner: peer,
    }));
    host.handle_event(&Event::LeMeta(LeMetaEvent::AdvertisingSetTerminated {
        status: ErrorCode::SUCCESS,
        advertising_handle: id,
        connection_handle: ConnectionHandle::new(0x40),
        num_completed_events: 0,
    }));

    assert_eq!(advertising.take(), [Advertising::ScanRequest(id, peer)]);
    match lifecycle.take().as_slice() {
        [Lifecycle::LeConnected(connected, connection)] => {
            assert_eq!(*connected, peer);
            assert_eq!(
                connection.local_address,
                AddressWithType::public(PUBLIC_ADDRESS)
            );
            assert!(connection.discoverable);
            assert_eq!(connection.role, Role::Peripheral);
        }
        other => panic!("unexpected {:?}", other),
    }

    // The set comes back on after handing out its connection
    assert_eq!(
        settle(&mut host, resources),
        [OpCode::LE_SET_EXTENDED_ADVERTISING_ENABLE]
    );
}

#[test]
fn test_advertiser_registration_answers_with_an_id() {
    let (mut host, _) = host(extended_controller(), AddressPolicy::UsePublicAddress);
    let first = host.handle_request(Request::RegisterAdvertiser);
    let second = host.handle_request(Request::RegisterAdvertiser);

    match (first, second) {
        (
            Some(Response::AdvertiserId(Ok(first))),
            Some(Response::AdvertiserId(Ok(second))),
        ) => assert_ne!(first, second),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_client_calls_are_served_by_the_runner() {
    let (mut host, resources) = host(legacy_controller(), AddressPolicy::UsePublicAddress);
    let lifecycle = leak(LifecycleLog::default());
    let client = resources.client();

    let outcome = block_on(select(host.run(), async {
        client.register_connection_callbacks(lifecycle).await;
        client.create_connection(PEER_A).await
    }));
    let Either::Second(result) = outcome else {
        unreachable!("the runner never returns");
    };
    assert_eq!(result, Ok(()));

    // The page waits behind the bring-up command for a credit
    assert_eq!(
        drain_commands(resources),
        [Command::LeReadAdvertisingPhysicalChannelTxPower]
    );
    assert!(host.acl().expects(OpCode::CREATE_CONNECTION));
}
