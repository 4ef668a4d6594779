//! Host runner
//!
//! [`Host`] owns the ACL and advertising managers and is the single execution context
//! that touches them. Everything else talks to it through a [`HostResources`]:
//!
//! * the controller driver pushes raw events and ACL packets with
//!   [`HostResources::deliver_event`] / [`HostResources::deliver_acl`] and drains
//!   [`HostResources::next_outbound`] onto the wire,
//! * applications use the [`HostClient`] proxies,
//! * applications move L2CAP frames through [`HostResources::queue_end`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
//! use linkbird::{HostOptions, processor::{Host, HostResources}};
//!
//! static RESOURCES: HostResources<'static, CriticalSectionRawMutex> = HostResources::new();
//!
//! #[embassy_executor::task]
//! async fn host_task(collaborators: AdvertisingCollaborators<'static>, controller: ControllerInfo) {
//!     let mut host = Host::new(&RESOURCES, controller, HostOptions::default(), collaborators);
//!     host.run().await
//! }
//! ```
//!
//! # Ordering
//!
//! Commands leave the runner in the order the managers issued them, gated by the
//! controller's command credit. Command Complete and Command Status events refresh the
//! credit and are routed to whichever manager is waiting for that opcode.

use embassy_futures::select::{Either3, select3};
use embassy_sync::{blocking_mutex::raw::RawMutex, channel::Channel};
use heapless::Vec;

use crate::{
    AddressWithType, ControllerInfo, Error, HostOptions,
    acl::{AclBuffers, AclManager, AclQueueEnd, LinkId},
    advertising::{AdvertisingCollaborators, LeAdvertisingManager},
    api::{HostClient, LinkOperation, Request, Response},
    constants::{EVENT_BUFFER_SIZE, INBOUND_QUEUE_DEPTH, OUTBOUND_QUEUE_DEPTH, REQUEST_QUEUE_DEPTH},
    hci::{Command, CommandQueue, Event, LeMetaEvent, transport::AclPacketBuffer},
};

/// A raw HCI event as received from the controller
pub type EventBuffer = Vec<u8, EVENT_BUFFER_SIZE>;

/// Controller-to-host traffic
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InboundPacket {
    /// Event packet (code, length, parameters)
    Event(EventBuffer),
    /// ACL data packet, header included
    Acl(AclPacketBuffer),
}

/// Host-to-controller traffic, ready for the driver to encode
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutboundPacket {
    /// A command the controller has credit for
    Command(Command),
    /// Encoded ACL data packet
    Acl(AclPacketBuffer),
}

/// Channels and shared buffers between the runner, the driver and applications
pub struct HostResources<'d, M: RawMutex> {
    pub(crate) requests: Channel<M, Request<'d>, REQUEST_QUEUE_DEPTH>,
    pub(crate) responses: Channel<M, Response, REQUEST_QUEUE_DEPTH>,
    inbound: Channel<M, InboundPacket, INBOUND_QUEUE_DEPTH>,
    outbound: Channel<M, OutboundPacket, OUTBOUND_QUEUE_DEPTH>,
    commands: CommandQueue<M>,
    buffers: AclBuffers<M>,
}

impl<'d, M: RawMutex> HostResources<'d, M> {
    /// Create empty resources
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requests: Channel::new(),
            responses: Channel::new(),
            inbound: Channel::new(),
            outbound: Channel::new(),
            commands: CommandQueue::new(),
            buffers: AclBuffers::new(),
        }
    }

    /// Application-side proxy
    #[must_use]
    pub fn client(&self) -> HostClient<'_, 'd, M> {
        HostClient::new(self)
    }

    /// Application end of a link's frame queues
    #[must_use]
    pub fn queue_end(&self, link: LinkId) -> AclQueueEnd<'_, M> {
        self.buffers.queue_end(link)
    }

    /// Hand a raw event packet to the runner
    pub async fn deliver_event(&self, bytes: &[u8]) {
        match EventBuffer::from_slice(bytes) {
            Ok(buffer) => self.inbound.send(InboundPacket::Event(buffer)).await,
            Err(()) => warn!("[HOST] Dropping event of {} bytes", bytes.len()),
        }
    }

    /// Hand a raw ACL packet to the runner
    pub async fn deliver_acl(&self, bytes: &[u8]) {
        match AclPacketBuffer::from_slice(bytes) {
            Ok(buffer) => self.inbound.send(InboundPacket::Acl(buffer)).await,
            Err(()) => warn!("[HOST] Dropping ACL packet of {} bytes", bytes.len()),
        }
    }

    /// Wait for the next packet to put on the wire
    pub async fn next_outbound(&self) -> OutboundPacket {
        self.outbound.receive().await
    }

    /// Next packet to put on the wire, if any
    pub fn try_next_outbound(&self) -> Option<OutboundPacket> {
        self.outbound.try_receive().ok()
    }
}

impl<M: RawMutex> Default for HostResources<'_, M> {
    fn default() -> Self {
        Self::new()
    }
}

/// The host runner
pub struct Host<'d, M: RawMutex> {
    resources: &'d HostResources<'d, M>,
    acl: AclManager<'d, M>,
    advertising: LeAdvertisingManager<'d>,
}

impl<'d, M: RawMutex> Host<'d, M> {
    /// Build both managers on top of `resources`
    ///
    /// Peripheral links are held back until their advertising set reports its
    /// termination whenever the advertising API emits such reports.
    pub fn new(
        resources: &'d HostResources<'d, M>,
        controller: ControllerInfo,
        options: HostOptions,
        collaborators: AdvertisingCollaborators<'d>,
    ) -> Self {
        let advertising = LeAdvertisingManager::new(
            &resources.commands,
            controller,
            options.advertising,
            collaborators,
        );
        let mut acl_options = options.acl;
        acl_options.defer_peripheral_connections = advertising.api().terminates_sets();
        let acl = AclManager::new(
            &resources.commands,
            &resources.buffers,
            acl_options,
            AddressWithType::public(controller.public_address),
        );
        acl.configure_buffers(controller.acl_buffer_count, controller.acl_buffer_size);
        Self {
            resources,
            acl,
            advertising,
        }
    }

    /// The ACL manager
    #[must_use]
    pub fn acl(&self) -> &AclManager<'d, M> {
        &self.acl
    }

    /// The advertising manager
    #[must_use]
    pub fn advertising(&self) -> &LeAdvertisingManager<'d> {
        &self.advertising
    }

    /// Issue the bring-up commands of the managers
    pub fn start(&mut self) {
        info!("[HOST] Starting");
        self.advertising.initialize();
        self.flush_outbound();
    }

    /// Run forever, serving the controller and the applications
    pub async fn run(&mut self) -> ! {
        self.start();
        let resources = self.resources;
        loop {
            match select3(
                resources.inbound.receive(),
                resources.requests.receive(),
                resources.buffers.wait_outbound(),
            )
            .await
            {
                Either3::First(packet) => self.handle_packet(&packet),
                Either3::Second(request) => {
                    if let Some(response) = self.handle_request(request) {
                        resources.responses.send(response).await;
                    }
                }
                Either3::Third(()) => trace!("[HOST] Outbound data queued"),
            }
            self.flush_outbound();
        }
    }

    /// Move whatever the controller can take onto the outbound channel
    ///
    /// Fragmenting stops whenever the ACL packet queue fills, so pumping and draining
    /// alternate until neither makes progress.
    pub fn flush_outbound(&mut self) {
        let resources = self.resources;
        loop {
            let pumped = self.acl.pump_outbound();
            let mut moved = 0;
            while !resources.outbound.is_full() {
                let packet = match resources.commands.pop_command() {
                    Some(command) => OutboundPacket::Command(command),
                    None => match resources.commands.pop_acl() {
                        Some(packet) => OutboundPacket::Acl(packet),
                        None => break,
                    },
                };
                if resources.outbound.try_send(packet).is_err() {
                    error!("[HOST] Outbound channel refused a packet");
                    break;
                }
                moved += 1;
            }
            trace!("[HOST] Pumped {} ACL packets, moved {} packets", pumped, moved);
            if moved == 0 {
                break;
            }
        }
    }

    /// Decode and dispatch one packet from the controller
    pub fn handle_packet(&mut self, packet: &InboundPacket) {
        match packet {
            InboundPacket::Acl(bytes) => self.acl.on_acl_data(bytes),
            InboundPacket::Event(bytes) => match Event::from_hci_bytes(bytes) {
                Ok(event) => self.handle_event(&event),
                Err(Error::UnknownEvent(code)) => trace!("[HOST] Ignoring event 0x{:02X}", code),
                Err(e) => warn!("[HOST] Dropping malformed event: {:?}", e),
            },
        }
    }

    /// Dispatch a decoded event
    pub fn handle_event(&mut self, event: &Event) {
        match event {
            Event::CommandComplete {
                num_hci_command_packets,
                opcode,
                return_parameters,
            } => {
                self.resources.commands.set_credits(*num_hci_command_packets);
                if self.acl.expects(*opcode) {
                    self.acl.on_command_complete(*opcode, return_parameters);
                } else if self.advertising.expects(*opcode) {
                    self.advertising
                        .on_command_complete(*opcode, return_parameters);
                } else {
                    debug!("[HOST] Nobody waits for {:?}", opcode);
                }
            }
            Event::CommandStatus {
                status,
                num_hci_command_packets,
                opcode,
            } => {
                self.resources.commands.set_credits(*num_hci_command_packets);
                if self.acl.expects(*opcode) {
                    self.acl.on_command_status(*opcode, *status);
                } else if self.advertising.expects(*opcode) {
                    self.advertising.on_command_status(*opcode, *status);
                } else {
                    debug!("[HOST] Nobody waits for {:?}", opcode);
                }
            }
            Event::LeMeta(
                LeMetaEvent::AdvertisingSetTerminated { .. }
                | LeMetaEvent::ScanRequestReceived { .. },
            )
            | Event::Vendor(_) => {
                if let Some(termination) = self.advertising.on_event(event) {
                    self.acl.on_advertising_set_terminated(
                        termination.connection_handle,
                        termination.local_address,
                        termination.discoverable,
                    );
                }
            }
            _ => self.acl.on_event(event),
        }
    }

    /// Apply one API request, returning the response the caller waits for
    pub fn handle_request(&mut self, request: Request<'d>) -> Option<Response> {
        let acl = &mut self.acl;
        let advertising = &mut self.advertising;
        match request {
            Request::RegisterConnectionCallbacks(callbacks) => acl.register_callbacks(callbacks),
            Request::UnregisterConnectionCallbacks => acl.unregister_callbacks(),
            Request::RegisterLeConnectionCallbacks(callbacks) => {
                acl.register_le_callbacks(callbacks);
            }
            Request::UnregisterLeConnectionCallbacks => acl.unregister_le_callbacks(),
            Request::RegisterConnectionManagementCallbacks(link, callbacks) => {
                acl.register_connection_callbacks(link, callbacks);
            }
            Request::RegisterLeConnectionManagementCallbacks(link, callbacks) => {
                acl.register_le_connection_callbacks(link, callbacks);
            }
            Request::RegisterAdvertisingCallbacks(callbacks) => {
                advertising.register_callbacks(callbacks);
            }
            Request::UnregisterAdvertisingCallbacks => advertising.unregister_callbacks(),
            Request::Shutdown => acl.shutdown(),
            Request::CreateConnection(peer) => {
                return Some(Response::Done(acl.create_connection(peer)));
            }
            Request::CreateLeConnection {
                peer,
                use_accept_list,
            } => {
                return Some(Response::Done(
                    acl.create_le_connection(peer, use_accept_list),
                ));
            }
            Request::RegisterAdvertiser => {
                return Some(Response::AdvertiserId(advertising.register_advertiser()));
            }
            other => {
                self.dispatch(other);
                return None;
            }
        }
        Some(Response::Ack)
    }

    /// Requests nobody waits on
    fn dispatch(&mut self, request: Request<'d>) {
        let advertising = &mut self.advertising;
        match request {
            Request::CancelConnect(peer) => self.acl.cancel_connect(peer),
            Request::CancelLeConnect(peer) => self.acl.cancel_le_connect(peer),
            Request::Link(link, operation) => self.link_operation(link, operation),
            Request::StartAdvertising {
                advertiser_id,
                config,
                duration,
            } => advertising.start_advertising(advertiser_id, &config, duration),
            Request::CreateAdvertiser { reg_id, config } => {
                advertising.create_advertiser(reg_id, &config);
            }
            Request::CreateExtendedAdvertiser {
                reg_id,
                config,
                duration,
                max_extended_advertising_events,
            } => advertising.create_extended_advertiser(
                reg_id,
                &config,
                duration,
                max_extended_advertising_events,
            ),
            Request::SetParameters {
                advertiser_id,
                config,
            } => advertising.set_parameters(advertiser_id, &config),
            Request::SetData {
                advertiser_id,
                scan_response,
                data,
            } => advertising.set_data(advertiser_id, scan_response, &data),
            Request::SetEncryptedData {
                advertiser_id,
                scan_response,
                data,
            } => advertising.set_encrypted_data(advertiser_id, scan_response, &data),
            Request::EnableAdvertiser {
                advertiser_id,
                enable,
                duration,
                max_extended_advertising_events,
            } => advertising.enable_advertiser(
                advertiser_id,
                enable,
                duration,
                max_extended_advertising_events,
            ),
            Request::SetPeriodicParameters {
                advertiser_id,
                parameters,
            } => advertising.set_periodic_parameters(advertiser_id, &parameters),
            Request::SetPeriodicData {
                advertiser_id,
                data,
            } => advertising.set_periodic_data(advertiser_id, &data),
            Request::EnablePeriodicAdvertising {
                advertiser_id,
                enable,
                include_adi,
            } => advertising.enable_periodic_advertising(advertiser_id, enable, include_adi),
            Request::GetOwnAddress(advertiser_id) => advertising.get_own_address(advertiser_id),
            Request::RemoveAdvertiser(advertiser_id) => {
                advertising.remove_advertiser(advertiser_id);
            }
            Request::ResetAdvertiser(advertiser_id) => advertising.reset_advertiser(advertiser_id),
            Request::ReadKeyMaterial => advertising.read_key_material(),
            Request::PauseAdvertising => advertising.on_pause(),
            Request::ResumeAdvertising => advertising.on_resume(),
            Request::IrkChanged => advertising.on_irk_change(),
            Request::RotationTimerFired(advertiser_id) => {
                advertising.on_rotation_timer(advertiser_id);
            }
            _ => error!("[HOST] Request needs a response"),
        }
    }

    fn link_operation(&mut self, link: LinkId, operation: LinkOperation) {
        let acl = &mut self.acl;
        match operation {
            LinkOperation::SwitchRole(role) => acl.switch_role(link, role),
            LinkOperation::ReadLinkPolicySettings => acl.read_link_policy_settings(link),
            LinkOperation::WriteLinkPolicySettings(settings) => {
                acl.write_link_policy_settings(link, settings);
            }
            LinkOperation::AuthenticationRequested => acl.authentication_requested(link),
            LinkOperation::HoldMode {
                max_interval,
                min_interval,
            } => acl.hold_mode(link, max_interval, min_interval),
            LinkOperation::SniffMode {
                max_interval,
                min_interval,
                attempt,
                timeout,
            } => acl.sniff_mode(link, max_interval, min_interval, attempt, timeout),
            LinkOperation::ExitSniffMode => acl.exit_sniff_mode(link),
            LinkOperation::ParkState {
                beacon_max_interval,
                beacon_min_interval,
            } => acl.park_state(link, beacon_max_interval, beacon_min_interval),
            LinkOperation::ExitParkState => acl.exit_park_state(link),
            LinkOperation::QosSetup(qos) => acl.qos_setup(link, qos),
            LinkOperation::FlowSpecification(flow) => acl.flow_specification(link, flow),
            LinkOperation::Flush => acl.flush(link),
            LinkOperation::RoleDiscovery => acl.role_discovery(link),
            LinkOperation::ReadRssi => acl.read_rssi(link),
            LinkOperation::ReadClock { piconet_clock } => acl.read_clock(link, piconet_clock),
            LinkOperation::ReadClockOffset => acl.read_clock_offset(link),
            LinkOperation::ReadLinkQuality => acl.read_link_quality(link),
            LinkOperation::ReadAfhChannelMap => acl.read_afh_channel_map(link),
            LinkOperation::ReadAutomaticFlushTimeout => acl.read_automatic_flush_timeout(link),
            LinkOperation::WriteAutomaticFlushTimeout(timeout) => {
                acl.write_automatic_flush_timeout(link, timeout);
            }
            LinkOperation::ReadTransmitPowerLevel { maximum } => {
                acl.read_transmit_power_level(link, maximum);
            }
            LinkOperation::ReadLinkSupervisionTimeout => acl.read_link_supervision_timeout(link),
            LinkOperation::WriteLinkSupervisionTimeout(timeout) => {
                acl.write_link_supervision_timeout(link, timeout);
            }
            LinkOperation::ReadFailedContactCounter => acl.read_failed_contact_counter(link),
            LinkOperation::ResetFailedContactCounter => acl.reset_failed_contact_counter(link),
            LinkOperation::SniffSubrating {
                maximum_latency,
                minimum_remote_timeout,
                minimum_local_timeout,
            } => acl.sniff_subrating(
                link,
                maximum_latency,
                minimum_remote_timeout,
                minimum_local_timeout,
            ),
            LinkOperation::ReadRemoteVersionInformation => {
                acl.read_remote_version_information(link);
            }
            LinkOperation::ConnectionUpdate(parameters) => acl.connection_update(link, parameters),
            LinkOperation::Disconnect(reason) => acl.disconnect(link, reason),
        }
    }
}
