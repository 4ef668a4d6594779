//! ACL connection management
//!
//! [`AclManager`] is a synchronous state machine driven by the host runner. It turns
//! application requests into HCI commands on an [`HciTransport`], correlates Command
//! Complete and Command Status events with the commands it issued, and reports
//! outcomes through registered callback traits.
//!
//! ## Classic links
//!
//! Only one page is outstanding at a time. Further `create_connection` requests wait in
//! a FIFO and are issued once the outstanding one completes or fails.
//!
//! ## LE links
//!
//! Only one `LE_Create_Connection` is outstanding. A new request while one is in flight
//! cancels it first; the initiator is re-armed once both the cancel completion and the
//! connection complete for the cancelled attempt have been seen. When the cancel fails the
//! attempt is still running, so the initiator waits for its connection complete alone.
//! Direct initiation always targets the newest request. Filter accept list updates are
//! only issued while the initiator is idle.
//!
//! ## Data
//!
//! Outbound frames are taken from [`AclBuffers`] against the controller's buffer
//! credits and fragmented to its packet size. A fragment only consumes a credit once the
//! transport has accepted it. Inbound packets are reassembled per link
//! and pushed to the link's inbound queue.

pub mod assembler;
pub mod buffers;
pub mod connection;
pub mod packet;

use bt_hci::{FromHciBytes, param::DisconnectReason};
use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::{Deque, Vec};

pub use buffers::{AclBuffers, AclQueueEnd, Fragment};
pub use connection::{
    ClassicConnection, ConnectionCallbacks, ConnectionManagementCallbacks, LeConnection,
    LeConnectionCallbacks, LeConnectionManagementCallbacks, LinkId,
};

use crate::{
    Address, AddressWithType, Error,
    acl::{
        assembler::Assembler,
        packet::{AclHeader, AclPacket},
    },
    constants::{
        ACL_PACKET_BUFFER_SIZE, DEFAULT_PACKET_TYPES, FILTER_ACCEPT_LIST_SIZE,
        LE_CONNECTION_INTERVAL_MAX, LE_CONNECTION_INTERVAL_MIN, LE_CONNECTION_LATENCY,
        LE_SCAN_INTERVAL_FAST, LE_SCAN_INTERVAL_SLOW, LE_SCAN_WINDOW_FAST, LE_SCAN_WINDOW_SLOW,
        LE_SUPERVISION_TIMEOUT, MAX_CONNECTIONS, MAX_PENDING_COMMANDS, MAX_PENDING_CONNECTIONS,
        MAX_PENDING_LE_CONNECTIONS, NO_CLOCK_OFFSET, PAGE_SCAN_REPETITION_MODE_R1,
    },
    hci::{
        Command, ConnectionHandle, ErrorCode, Event, FlowSpec, HciTransport, LeMetaEvent, OpCode,
        QosSpec, Role,
        bytes::ByteReader,
        event::LeConnectionComplete,
    },
};

/// Link type reported for ACL links in classic connection events
const LINK_TYPE_ACL: u8 = 0x01;

/// Connection tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AclOptions {
    /// Packet types offered in `Create_Connection`
    pub packet_types: u16,
    /// Page scan repetition mode assumed for the peer
    pub page_scan_repetition_mode: u8,
    /// Whether the peer may switch roles during setup
    pub allow_role_switch: bool,
    /// Scan interval while no other LE link is pending or up
    pub le_scan_interval_fast: u16,
    /// Scan window while no other LE link is pending or up
    pub le_scan_window_fast: u16,
    /// Scan interval while other LE links compete for the radio
    pub le_scan_interval_slow: u16,
    /// Scan window while other LE links compete for the radio
    pub le_scan_window_slow: u16,
    /// Minimum connection interval requested by the initiator
    pub le_connection_interval_min: u16,
    /// Maximum connection interval requested by the initiator
    pub le_connection_interval_max: u16,
    /// Peripheral latency requested by the initiator
    pub le_connection_latency: u16,
    /// Supervision timeout requested by the initiator
    pub le_supervision_timeout: u16,
    /// Hold peripheral links until the advertising set that produced them is known
    pub defer_peripheral_connections: bool,
}

impl Default for AclOptions {
    fn default() -> Self {
        Self {
            packet_types: DEFAULT_PACKET_TYPES,
            page_scan_repetition_mode: PAGE_SCAN_REPETITION_MODE_R1,
            allow_role_switch: true,
            le_scan_interval_fast: LE_SCAN_INTERVAL_FAST,
            le_scan_window_fast: LE_SCAN_WINDOW_FAST,
            le_scan_interval_slow: LE_SCAN_INTERVAL_SLOW,
            le_scan_window_slow: LE_SCAN_WINDOW_SLOW,
            le_connection_interval_min: LE_CONNECTION_INTERVAL_MIN,
            le_connection_interval_max: LE_CONNECTION_INTERVAL_MAX,
            le_connection_latency: LE_CONNECTION_LATENCY,
            le_supervision_timeout: LE_SUPERVISION_TIMEOUT,
            defer_peripheral_connections: false,
        }
    }
}

/// Parameters of an LE connection update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LeConnectionParameters {
    /// Minimum interval in 1.25 ms units
    pub interval_min: u16,
    /// Maximum interval in 1.25 ms units
    pub interval_max: u16,
    /// Peripheral latency
    pub max_latency: u16,
    /// Supervision timeout in 10 ms units
    pub supervision_timeout: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingContext {
    CreateConnection(Address),
    CreateConnectionCancel(Address),
    AcceptConnection(Address),
    RejectConnection(Address),
    Link(LinkId),
    LinkWrite(LinkId, u16),
    LeCreateConnection,
    LeCreateConnectionCancel,
    LeAddToAcceptList(AddressWithType),
    LeRemoveFromAcceptList(AddressWithType),
    /// Disconnect of a link that never got a table entry
    Unallocated(ConnectionHandle),
}

#[derive(Debug, Clone, Copy)]
struct PendingCommand {
    opcode: OpCode,
    context: PendingContext,
}

enum LinkKind<'d> {
    Classic {
        peer: Address,
        role: Role,
        link_policy: u16,
        callbacks: Option<&'d dyn ConnectionManagementCallbacks>,
    },
    Le {
        peer: AddressWithType,
        role: Role,
        callbacks: Option<&'d dyn LeConnectionManagementCallbacks>,
    },
}

struct ConnectionEntry<'d> {
    link: LinkId,
    kind: LinkKind<'d>,
    assembler: Assembler,
}

impl<'d> ConnectionEntry<'d> {
    fn classic_callbacks(&self) -> Option<&'d dyn ConnectionManagementCallbacks> {
        match self.kind {
            LinkKind::Classic { callbacks, .. } => callbacks,
            LinkKind::Le { .. } => None,
        }
    }

    fn le_callbacks(&self) -> Option<&'d dyn LeConnectionManagementCallbacks> {
        match self.kind {
            LinkKind::Le { callbacks, .. } => callbacks,
            LinkKind::Classic { .. } => None,
        }
    }

    fn command_failed(&self, opcode: OpCode, status: ErrorCode) {
        match self.kind {
            LinkKind::Classic {
                callbacks: Some(callbacks),
                ..
            } => callbacks.on_command_failed(opcode, status),
            LinkKind::Le {
                callbacks: Some(callbacks),
                ..
            } => callbacks.on_command_failed(opcode, status),
            _ => debug!("[ACL] {:?} failed on {:?} with {:?}", opcode, self.link, status),
        }
    }

    fn disconnected(&self, reason: ErrorCode) {
        match self.kind {
            LinkKind::Classic {
                callbacks: Some(callbacks),
                ..
            } => callbacks.on_disconnection(reason),
            LinkKind::Le {
                callbacks: Some(callbacks),
                ..
            } => callbacks.on_disconnection(reason),
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct ClassicInitiator {
    outstanding: Option<Address>,
    queued: Deque<Address, MAX_PENDING_CONNECTIONS>,
    incoming: Vec<Address, MAX_PENDING_CONNECTIONS>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeRequest {
    peer: AddressWithType,
    use_accept_list: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum InitiatorState {
    #[default]
    Idle,
    UpdatingAcceptList,
    /// `direct` is the target of a direct initiation, `None` when the accept list is used
    Connecting {
        direct: Option<AddressWithType>,
    },
    Cancelling {
        direct: Option<AddressWithType>,
        connection_completed: bool,
        cancel_completed: bool,
    },
    /// The cancel was refused; the attempt ends with its own connection complete
    AwaitingCompletion {
        direct: Option<AddressWithType>,
    },
}

#[derive(Debug, Default)]
struct LeInitiator {
    requests: Vec<LeRequest, MAX_PENDING_LE_CONNECTIONS>,
    accept_list: Vec<AddressWithType, FILTER_ACCEPT_LIST_SIZE>,
    to_remove: Vec<AddressWithType, FILTER_ACCEPT_LIST_SIZE>,
    state: InitiatorState,
}

impl LeInitiator {
    fn take_request(&mut self, peer: Address) -> Option<LeRequest> {
        let index = self
            .requests
            .iter()
            .position(|request| request.peer.address == peer)?;
        Some(self.requests.remove(index))
    }
}

/// Classic and LE connection state machine
pub struct AclManager<'d, M: RawMutex> {
    transport: &'d dyn HciTransport,
    buffers: &'d AclBuffers<M>,
    options: AclOptions,
    local_address: AddressWithType,
    callbacks: Option<&'d dyn ConnectionCallbacks>,
    le_callbacks: Option<&'d dyn LeConnectionCallbacks>,
    connections: Vec<ConnectionEntry<'d>, MAX_CONNECTIONS>,
    next_generation: u16,
    pending: Vec<PendingCommand, MAX_PENDING_COMMANDS>,
    classic: ClassicInitiator,
    le: LeInitiator,
    deferred: Vec<LeConnectionComplete, MAX_CONNECTIONS>,
}

impl<'d, M: RawMutex> AclManager<'d, M> {
    /// Create a manager issuing commands on `transport` and sharing `buffers` with applications
    pub fn new(
        transport: &'d dyn HciTransport,
        buffers: &'d AclBuffers<M>,
        options: AclOptions,
        local_address: AddressWithType,
    ) -> Self {
        Self {
            transport,
            buffers,
            options,
            local_address,
            callbacks: None,
            le_callbacks: None,
            connections: Vec::new(),
            next_generation: 0,
            pending: Vec::new(),
            classic: ClassicInitiator::default(),
            le: LeInitiator::default(),
            deferred: Vec::new(),
        }
    }

    /// Current options
    #[must_use]
    pub fn options(&self) -> &AclOptions {
        &self.options
    }

    /// Address used as the local identity of central links
    pub fn set_local_address(&mut self, address: AddressWithType) {
        self.local_address = address;
    }

    /// Set the controller ACL buffer geometry
    pub fn configure_buffers(&self, total_packets: u16, packet_size: u16) {
        info!(
            "[ACL] {} controller buffers of {} bytes",
            total_packets, packet_size
        );
        self.buffers.configure(total_packets, packet_size);
    }

    /// Register classic lifecycle callbacks
    pub fn register_callbacks(&mut self, callbacks: &'d dyn ConnectionCallbacks) {
        self.callbacks = Some(callbacks);
    }

    /// Drop classic lifecycle callbacks
    ///
    /// # Panics
    /// Panics if no callbacks are registered
    pub fn unregister_callbacks(&mut self) {
        assert!(
            self.callbacks.take().is_some(),
            "connection callbacks are not registered"
        );
    }

    /// Register LE lifecycle callbacks
    pub fn register_le_callbacks(&mut self, callbacks: &'d dyn LeConnectionCallbacks) {
        self.le_callbacks = Some(callbacks);
    }

    /// Drop LE lifecycle callbacks
    ///
    /// # Panics
    /// Panics if no callbacks are registered
    pub fn unregister_le_callbacks(&mut self) {
        assert!(
            self.le_callbacks.take().is_some(),
            "LE connection callbacks are not registered"
        );
    }

    /// Attach per-link callbacks to a classic link
    ///
    /// # Panics
    /// Panics if `link` is stale or not a classic link
    pub fn register_connection_callbacks(
        &mut self,
        link: LinkId,
        callbacks: &'d dyn ConnectionManagementCallbacks,
    ) {
        match &mut self.entry_mut(link).kind {
            LinkKind::Classic { callbacks: slot, .. } => *slot = Some(callbacks),
            LinkKind::Le { .. } => panic!("{:?} is not a classic link", link),
        }
    }

    /// Attach per-link callbacks to an LE link
    ///
    /// # Panics
    /// Panics if `link` is stale or not an LE link
    pub fn register_le_connection_callbacks(
        &mut self,
        link: LinkId,
        callbacks: &'d dyn LeConnectionManagementCallbacks,
    ) {
        match &mut self.entry_mut(link).kind {
            LinkKind::Le { callbacks: slot, .. } => *slot = Some(callbacks),
            LinkKind::Classic { .. } => panic!("{:?} is not an LE link", link),
        }
    }

    /// Number of open links
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Live link using `handle`
    #[must_use]
    pub fn link(&self, handle: ConnectionHandle) -> Option<LinkId> {
        self.find_by_handle(handle).map(|entry| entry.link)
    }

    /// Whether a classic link to `peer` is open
    #[must_use]
    pub fn is_connected(&self, peer: Address) -> bool {
        self.find_classic_by_peer(peer).is_some()
    }

    /// Last link policy written on a classic link
    ///
    /// # Panics
    /// Panics if `link` is stale or not a classic link
    #[must_use]
    pub fn link_policy_settings(&self, link: LinkId) -> u16 {
        match self.entry(link).kind {
            LinkKind::Classic { link_policy, .. } => link_policy,
            LinkKind::Le { .. } => panic!("{:?} is not a classic link", link),
        }
    }

    /// Whether the manager is waiting for a completion of `opcode`
    #[must_use]
    pub fn expects(&self, opcode: OpCode) -> bool {
        self.pending.iter().any(|pending| pending.opcode == opcode)
    }

    // Classic initiation

    /// Page `peer`
    ///
    /// # Errors
    /// * [`Error::NotRegistered`] without classic callbacks
    /// * [`Error::BufferFull`] when the request queue is full
    pub fn create_connection(&mut self, peer: Address) -> Result<(), Error> {
        let callbacks = self.callbacks.ok_or(Error::NotRegistered)?;
        if self.is_connected(peer) {
            warn!("[ACL] Already connected to {:?}", peer);
            callbacks.on_connect_fail(peer, ErrorCode::CONNECTION_ALREADY_EXISTS, true);
            return Ok(());
        }
        if self.classic.outstanding == Some(peer) || self.classic.queued.iter().any(|p| *p == peer)
        {
            warn!("[ACL] Connection to {:?} already requested", peer);
            return Ok(());
        }
        if self.classic.outstanding.is_some() {
            debug!("[ACL] Queueing connection to {:?}", peer);
            return self
                .classic
                .queued
                .push_back(peer)
                .map_err(|_| Error::BufferFull);
        }
        self.page(peer);
        Ok(())
    }

    /// Stop a classic connection attempt
    pub fn cancel_connect(&mut self, peer: Address) {
        if self.classic.outstanding == Some(peer) {
            self.issue(
                Command::CreateConnectionCancel { peer },
                PendingContext::CreateConnectionCancel(peer),
            );
            return;
        }
        let before = self.classic.queued.len();
        let mut kept = Deque::new();
        for queued in self.classic.queued.iter().copied().filter(|p| *p != peer) {
            kept.push_back(queued).ok();
        }
        self.classic.queued = kept;
        if self.classic.queued.len() == before {
            debug!("[ACL] No connection attempt to {:?}", peer);
        }
    }

    fn page(&mut self, peer: Address) {
        info!("[ACL] Connecting to {:?}", peer);
        self.classic.outstanding = Some(peer);
        self.issue(
            Command::CreateConnection {
                peer,
                packet_type: self.options.packet_types,
                page_scan_repetition_mode: self.options.page_scan_repetition_mode,
                clock_offset: NO_CLOCK_OFFSET,
                allow_role_switch: self.options.allow_role_switch,
            },
            PendingContext::CreateConnection(peer),
        );
    }

    fn page_next(&mut self) {
        if self.classic.outstanding.is_some() {
            return;
        }
        if let Some(peer) = self.classic.queued.pop_front() {
            self.page(peer);
        }
    }

    fn classic_failed(&self, peer: Address, reason: ErrorCode, locally_initiated: bool) {
        warn!("[ACL] Connection to {:?} failed: {:?}", peer, reason);
        if let Some(callbacks) = self.callbacks {
            callbacks.on_connect_fail(peer, reason, locally_initiated);
        }
    }

    // LE initiation

    /// Connect to an LE peer, directly or through the filter accept list
    ///
    /// # Errors
    /// * [`Error::NotRegistered`] without LE callbacks
    /// * [`Error::BufferFull`] when the request table is full
    pub fn create_le_connection(
        &mut self,
        peer: AddressWithType,
        use_accept_list: bool,
    ) -> Result<(), Error> {
        let callbacks = self.le_callbacks.ok_or(Error::NotRegistered)?;
        if self.find_le_by_peer(peer.address).is_some() {
            warn!("[ACL] Already connected to {:?}", peer);
            callbacks.on_le_connect_fail(peer, ErrorCode::CONNECTION_ALREADY_EXISTS);
            return Ok(());
        }
        if self
            .le
            .requests
            .iter()
            .any(|request| request.peer.address == peer.address)
        {
            warn!("[ACL] LE connection to {:?} already requested", peer);
            return Ok(());
        }
        self.le
            .requests
            .push(LeRequest {
                peer,
                use_accept_list,
            })
            .map_err(|_| Error::BufferFull)?;
        self.le.to_remove.retain(|p| p.address != peer.address);

        match self.le.state {
            InitiatorState::Idle => self.advance_le(),
            InitiatorState::Connecting { direct } => self.cancel_initiation(direct),
            InitiatorState::UpdatingAcceptList
            | InitiatorState::Cancelling { .. }
            | InitiatorState::AwaitingCompletion { .. } => {}
        }
        Ok(())
    }

    /// Drop an LE connection request, stopping the initiator if it is working on it
    pub fn cancel_le_connect(&mut self, peer: AddressWithType) {
        let Some(request) = self.le.take_request(peer.address) else {
            debug!("[ACL] No LE connection attempt to {:?}", peer);
            return;
        };
        if request.use_accept_list {
            self.schedule_accept_list_removal(peer.address);
        }
        match self.le.state {
            InitiatorState::Connecting { direct }
                if direct.is_none_or(|target| target.address == peer.address) =>
            {
                self.cancel_initiation(direct);
            }
            InitiatorState::Idle => self.advance_le(),
            _ => {}
        }
    }

    fn cancel_initiation(&mut self, direct: Option<AddressWithType>) {
        debug!("[ACL] Cancelling LE initiation");
        self.le.state = InitiatorState::Cancelling {
            direct,
            connection_completed: false,
            cancel_completed: false,
        };
        self.issue(
            Command::LeCreateConnectionCancel,
            PendingContext::LeCreateConnectionCancel,
        );
    }

    fn schedule_accept_list_removal(&mut self, peer: Address) {
        let still_needed = self
            .le
            .requests
            .iter()
            .any(|request| request.use_accept_list && request.peer.address == peer);
        if still_needed || self.le.to_remove.iter().any(|p| p.address == peer) {
            return;
        }
        let Some(entry) = self.le.accept_list.iter().find(|p| p.address == peer).copied() else {
            return;
        };
        if self.le.to_remove.push(entry).is_err() {
            warn!("[ACL] Accept list removal queue full, keeping {:?}", entry);
        }
    }

    fn advance_le(&mut self) {
        if self.le.state != InitiatorState::Idle {
            return;
        }
        if !self.le.to_remove.is_empty() {
            let peer = self.le.to_remove.remove(0);
            self.le.state = InitiatorState::UpdatingAcceptList;
            self.issue(
                Command::LeRemoveDeviceFromFilterAcceptList { peer },
                PendingContext::LeRemoveFromAcceptList(peer),
            );
            return;
        }
        let missing = self.le.requests.iter().find(|request| {
            request.use_accept_list
                && !self
                    .le
                    .accept_list
                    .iter()
                    .any(|p| p.address == request.peer.address)
        });
        if let Some(request) = missing {
            let peer = request.peer;
            self.le.state = InitiatorState::UpdatingAcceptList;
            self.issue(
                Command::LeAddDeviceToFilterAcceptList { peer },
                PendingContext::LeAddToAcceptList(peer),
            );
            return;
        }
        let Some(newest) = self.le.requests.last().copied() else {
            return;
        };

        let use_accept_list = self.le.requests.iter().any(|request| request.use_accept_list);
        let direct = (!use_accept_list).then_some(newest.peer);
        let competing = self.le.requests.len() > 1
            || self
                .connections
                .iter()
                .any(|entry| matches!(entry.kind, LinkKind::Le { .. }));
        let (scan_interval, scan_window) = if competing {
            (
                self.options.le_scan_interval_slow,
                self.options.le_scan_window_slow,
            )
        } else {
            (
                self.options.le_scan_interval_fast,
                self.options.le_scan_window_fast,
            )
        };

        debug!(
            "[ACL] LE initiation, accept list {}, interval {}",
            use_accept_list, scan_interval
        );
        self.le.state = InitiatorState::Connecting { direct };
        self.issue(
            Command::LeCreateConnection {
                scan_interval,
                scan_window,
                use_filter_accept_list: use_accept_list,
                peer: direct.unwrap_or_default(),
                own_address_type: u8::from(self.local_address.address_type.is_random()),
                connection_interval_min: self.options.le_connection_interval_min,
                connection_interval_max: self.options.le_connection_interval_max,
                max_latency: self.options.le_connection_latency,
                supervision_timeout: self.options.le_supervision_timeout,
            },
            PendingContext::LeCreateConnection,
        );
    }

    /// Record that the attempt being cancelled produced its connection complete
    fn initiation_finished(&mut self) {
        match &mut self.le.state {
            InitiatorState::Connecting { .. } | InitiatorState::AwaitingCompletion { .. } => {
                self.le.state = InitiatorState::Idle;
            }
            InitiatorState::Cancelling {
                connection_completed,
                cancel_completed,
                ..
            } => {
                *connection_completed = true;
                if *cancel_completed {
                    self.le.state = InitiatorState::Idle;
                }
            }
            _ => {}
        }
    }

    fn on_le_cancel_complete(&mut self, status: ErrorCode) {
        if let InitiatorState::Cancelling {
            direct,
            connection_completed,
            ..
        } = self.le.state
        {
            if connection_completed {
                self.le.state = InitiatorState::Idle;
            } else if status.is_success() {
                self.le.state = InitiatorState::Cancelling {
                    direct,
                    connection_completed,
                    cancel_completed: true,
                };
            } else {
                // The attempt outlived the cancel and its connection complete is still due
                debug!("[ACL] LE cancel failed with {:?}, waiting for the attempt", status);
                self.le.state = InitiatorState::AwaitingCompletion { direct };
            }
        }
        self.advance_le();
    }

    fn le_failed(&mut self, request: LeRequest, reason: ErrorCode) {
        warn!("[ACL] LE connection to {:?} failed: {:?}", request.peer, reason);
        if request.use_accept_list {
            self.schedule_accept_list_removal(request.peer.address);
        }
        if let Some(callbacks) = self.le_callbacks {
            callbacks.on_le_connect_fail(request.peer, reason);
        }
    }

    fn on_le_connection_complete(&mut self, complete: LeConnectionComplete) {
        if complete.role == Role::Peripheral {
            self.on_peripheral_connection(complete);
            return;
        }

        let cancelling = matches!(self.le.state, InitiatorState::Cancelling { .. });
        let direct = match self.le.state {
            InitiatorState::Connecting { direct }
            | InitiatorState::Cancelling { direct, .. }
            | InitiatorState::AwaitingCompletion { direct } => direct,
            _ => None,
        };
        self.initiation_finished();

        if complete.status == ErrorCode::UNKNOWN_CONNECTION && cancelling {
            debug!("[ACL] LE initiation stopped");
        } else if complete.status.is_success() {
            let request = self.le.take_request(complete.peer.address);
            if request.is_some_and(|request| request.use_accept_list) {
                self.schedule_accept_list_removal(complete.peer.address);
            }
            let local_address = complete
                .local_resolvable_address
                .map_or(self.local_address, AddressWithType::random);
            self.le_connected(complete, local_address, false);
        } else {
            let request = self.le.take_request(complete.peer.address).or_else(|| {
                direct.and_then(|target| self.le.take_request(target.address))
            });
            match request {
                Some(request) => self.le_failed(request, complete.status),
                None => warn!(
                    "[ACL] LE connection failed with {:?} and no request",
                    complete.status
                ),
            }
        }
        self.advance_le();
    }

    fn on_peripheral_connection(&mut self, complete: LeConnectionComplete) {
        if !complete.status.is_success() {
            warn!("[ACL] Peripheral connection failed: {:?}", complete.status);
            return;
        }
        if self.options.defer_peripheral_connections {
            debug!("[ACL] Holding {:?} until its advertising set is known", complete.handle);
            if self.deferred.push(complete).is_ok() {
                return;
            }
            warn!("[ACL] Deferred connection table full");
        }
        let local_address = complete
            .local_resolvable_address
            .map_or(self.local_address, AddressWithType::random);
        self.le_connected(complete, local_address, false);
    }

    /// The advertising set that produced `handle` has stopped
    ///
    /// Releases a peripheral link held back until its local identity was known.
    pub fn on_advertising_set_terminated(
        &mut self,
        handle: ConnectionHandle,
        local_address: AddressWithType,
        discoverable: bool,
    ) {
        let Some(index) = self
            .deferred
            .iter()
            .position(|complete| complete.handle == handle)
        else {
            debug!("[ACL] No deferred connection for {:?}", handle);
            return;
        };
        let complete = self.deferred.swap_remove(index);
        self.le_connected(complete, local_address, discoverable);
    }

    fn le_connected(
        &mut self,
        complete: LeConnectionComplete,
        local_address: AddressWithType,
        discoverable: bool,
    ) {
        let Some(link) = self.allocate(
            complete.handle,
            LinkKind::Le {
                peer: complete.peer,
                role: complete.role,
                callbacks: None,
            },
        ) else {
            return;
        };
        info!("[ACL] LE link {:?} up with {:?}", link, complete.peer);
        let connection = LeConnection {
            link,
            peer: complete.peer,
            local_address,
            role: complete.role,
            interval: complete.interval,
            latency: complete.latency,
            supervision_timeout: complete.supervision_timeout,
            discoverable,
        };
        match self.le_callbacks {
            Some(callbacks) => callbacks.on_le_connect_success(complete.peer, connection),
            None => debug!("[ACL] No LE callbacks for {:?}", link),
        }
    }

    fn allocate(&mut self, handle: ConnectionHandle, kind: LinkKind<'d>) -> Option<LinkId> {
        if self.find_by_handle(handle).is_some() {
            error!("[ACL] Handle {:?} is already in use", handle);
            return None;
        }
        self.next_generation = self.next_generation.wrapping_add(1);
        let link = LinkId {
            handle,
            generation: self.next_generation,
        };
        let entry = ConnectionEntry {
            link,
            kind,
            assembler: Assembler::new(),
        };
        if self.connections.push(entry).is_err() || self.buffers.open(link).is_err() {
            error!("[ACL] No room for {:?}, disconnecting", handle);
            self.connections.retain(|entry| entry.link != link);
            self.issue(
                Command::Disconnect {
                    handle,
                    reason: ErrorCode::REMOTE_DEVICE_TERMINATED_CONNECTION_LOW_RESOURCES,
                },
                PendingContext::Unallocated(handle),
            );
            return None;
        }
        Some(link)
    }

    // Per-link operations

    /// Ask the peer to take `role`
    pub fn switch_role(&mut self, link: LinkId, role: Role) {
        let peer = self.classic_peer(link);
        self.issue(Command::SwitchRole { peer, role }, PendingContext::Link(link));
    }

    /// `HCI_Read_Link_Policy_Settings`
    pub fn read_link_policy_settings(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::ReadLinkPolicySettings { handle }, PendingContext::Link(link));
    }

    /// `HCI_Write_Link_Policy_Settings`
    pub fn write_link_policy_settings(&mut self, link: LinkId, settings: u16) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::WriteLinkPolicySettings { handle, settings },
            PendingContext::LinkWrite(link, settings),
        );
    }

    /// `HCI_Authentication_Requested`
    pub fn authentication_requested(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::AuthenticationRequested { handle }, PendingContext::Link(link));
    }

    /// `HCI_Hold_Mode`
    pub fn hold_mode(&mut self, link: LinkId, max_interval: u16, min_interval: u16) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::HoldMode {
                handle,
                max_interval,
                min_interval,
            },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Sniff_Mode`
    pub fn sniff_mode(
        &mut self,
        link: LinkId,
        max_interval: u16,
        min_interval: u16,
        attempt: u16,
        timeout: u16,
    ) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::SniffMode {
                handle,
                max_interval,
                min_interval,
                attempt,
                timeout,
            },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Exit_Sniff_Mode`
    pub fn exit_sniff_mode(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::ExitSniffMode { handle }, PendingContext::Link(link));
    }

    /// `HCI_Park_State`
    ///
    /// Park state is deprecated since Bluetooth 5.0. Controllers without it reject the command
    /// and the failure is reported through `on_command_failed`.
    pub fn park_state(&mut self, link: LinkId, beacon_max_interval: u16, beacon_min_interval: u16) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::ParkState {
                handle,
                beacon_max_interval,
                beacon_min_interval,
            },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Exit_Park_State`
    pub fn exit_park_state(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::ExitParkState { handle }, PendingContext::Link(link));
    }

    /// `HCI_QoS_Setup`
    pub fn qos_setup(&mut self, link: LinkId, qos: QosSpec) {
        let handle = self.classic_handle(link);
        self.issue(Command::QosSetup { handle, qos }, PendingContext::Link(link));
    }

    /// `HCI_Flow_Specification`
    pub fn flow_specification(&mut self, link: LinkId, flow: FlowSpec) {
        let handle = self.classic_handle(link);
        self.issue(Command::FlowSpecification { handle, flow }, PendingContext::Link(link));
    }

    /// `HCI_Flush`
    pub fn flush(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::Flush { handle }, PendingContext::Link(link));
    }

    /// `HCI_Role_Discovery`
    pub fn role_discovery(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::RoleDiscovery { handle }, PendingContext::Link(link));
    }

    /// `HCI_Read_RSSI`, on classic or LE links
    pub fn read_rssi(&mut self, link: LinkId) {
        let handle = self.entry(link).link.handle;
        self.issue(Command::ReadRssi { handle }, PendingContext::Link(link));
    }

    /// `HCI_Read_Clock` for the piconet clock (`true`) or the local clock
    pub fn read_clock(&mut self, link: LinkId, piconet_clock: bool) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::ReadClock {
                handle,
                piconet_clock,
            },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Read_Clock_Offset`
    pub fn read_clock_offset(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::ReadClockOffset { handle }, PendingContext::Link(link));
    }

    /// `HCI_Read_Link_Quality`
    pub fn read_link_quality(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::ReadLinkQuality { handle }, PendingContext::Link(link));
    }

    /// `HCI_Read_AFH_Channel_Map`
    pub fn read_afh_channel_map(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(Command::ReadAfhChannelMap { handle }, PendingContext::Link(link));
    }

    /// `HCI_Read_Automatic_Flush_Timeout`
    pub fn read_automatic_flush_timeout(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::ReadAutomaticFlushTimeout { handle },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Write_Automatic_Flush_Timeout`
    pub fn write_automatic_flush_timeout(&mut self, link: LinkId, timeout: u16) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::WriteAutomaticFlushTimeout { handle, timeout },
            PendingContext::LinkWrite(link, timeout),
        );
    }

    /// `HCI_Read_Transmit_Power_Level`, maximum (`true`) or current
    pub fn read_transmit_power_level(&mut self, link: LinkId, maximum: bool) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::ReadTransmitPowerLevel { handle, maximum },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Read_Link_Supervision_Timeout`
    pub fn read_link_supervision_timeout(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::ReadLinkSupervisionTimeout { handle },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Write_Link_Supervision_Timeout`
    pub fn write_link_supervision_timeout(&mut self, link: LinkId, timeout: u16) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::WriteLinkSupervisionTimeout { handle, timeout },
            PendingContext::LinkWrite(link, timeout),
        );
    }

    /// `HCI_Read_Failed_Contact_Counter`
    pub fn read_failed_contact_counter(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::ReadFailedContactCounter { handle },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Reset_Failed_Contact_Counter`
    pub fn reset_failed_contact_counter(&mut self, link: LinkId) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::ResetFailedContactCounter { handle },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Sniff_Subrating`
    pub fn sniff_subrating(
        &mut self,
        link: LinkId,
        maximum_latency: u16,
        minimum_remote_timeout: u16,
        minimum_local_timeout: u16,
    ) {
        let handle = self.classic_handle(link);
        self.issue(
            Command::SniffSubrating {
                handle,
                maximum_latency,
                minimum_remote_timeout,
                minimum_local_timeout,
            },
            PendingContext::Link(link),
        );
    }

    /// `HCI_Read_Remote_Version_Information`, on classic or LE links
    pub fn read_remote_version_information(&mut self, link: LinkId) {
        let handle = self.entry(link).link.handle;
        self.issue(
            Command::ReadRemoteVersionInformation { handle },
            PendingContext::Link(link),
        );
    }

    /// `HCI_LE_Connection_Update`
    ///
    /// # Panics
    /// Panics if `link` is stale or not an LE link
    pub fn connection_update(&mut self, link: LinkId, parameters: LeConnectionParameters) {
        let entry = self.entry(link);
        assert!(
            matches!(entry.kind, LinkKind::Le { .. }),
            "{:?} is not an LE link",
            link
        );
        let handle = entry.link.handle;
        self.issue(
            Command::LeConnectionUpdate {
                handle,
                interval_min: parameters.interval_min,
                interval_max: parameters.interval_max,
                max_latency: parameters.max_latency,
                supervision_timeout: parameters.supervision_timeout,
            },
            PendingContext::Link(link),
        );
    }

    /// Tear a link down
    ///
    /// Only the reasons `HCI_Disconnect` accepts go to the controller; any other code
    /// fails the request with `INVALID_HCI_COMMAND_PARAMETERS`.
    pub fn disconnect(&mut self, link: LinkId, reason: ErrorCode) {
        let entry = self.entry(link);
        let handle = entry.link.handle;
        if DisconnectReason::from_hci_bytes_complete(&[reason.raw()]).is_err() {
            warn!("[ACL] {:?} is not a disconnect reason", reason);
            entry.command_failed(OpCode::DISCONNECT, ErrorCode::INVALID_HCI_COMMAND_PARAMETERS);
            return;
        }
        info!("[ACL] Disconnecting {:?}: {:?}", handle, reason);
        self.issue(Command::Disconnect { handle, reason }, PendingContext::Link(link));
    }

    /// Close every link's queues and forget all state
    pub fn shutdown(&mut self) {
        for entry in &self.connections {
            self.buffers.close(entry.link.handle);
        }
        self.connections.clear();
        self.pending.clear();
        self.deferred.clear();
        self.classic = ClassicInitiator::default();
        self.le = LeInitiator::default();
    }

    // Data path

    /// Send as many outbound fragments as the controller has credits for
    ///
    /// Stops early when the transport refuses a packet; the refused fragment stays at the
    /// head of the schedule and keeps its credit. Returns the number of ACL packets handed
    /// to the transport.
    pub fn pump_outbound(&mut self) -> usize {
        let mut sent = 0;
        while let Some(fragment) = self.buffers.peek_fragment() {
            let header = AclHeader::new(
                fragment.handle,
                fragment.packet_boundary,
                fragment.data.len() as u16,
            );
            let mut packet: Vec<u8, ACL_PACKET_BUFFER_SIZE> = Vec::new();
            if packet.extend_from_slice(&header.to_bytes()).is_err()
                || packet.extend_from_slice(&fragment.data).is_err()
            {
                error!("[ACL] Fragment does not fit a packet buffer");
                break;
            }
            if let Err(e) = self.transport.send_acl(&packet) {
                trace!("[ACL] Transport refused fragment on {:?}: {:?}", fragment.handle, e);
                break;
            }
            trace!("[ACL] TX {} bytes on {:?}", fragment.data.len(), fragment.handle);
            self.buffers.commit_fragment(&fragment);
            sent += 1;
        }
        sent
    }

    /// Feed one inbound ACL data packet (header included)
    pub fn on_acl_data(&mut self, bytes: &[u8]) {
        let packet = match AclPacket::from_bytes(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("[ACL] Dropping malformed ACL packet: {:?}", e);
                return;
            }
        };
        let handle = packet.header.handle;
        let Some(entry) = self
            .connections
            .iter_mut()
            .find(|entry| entry.link.handle == handle)
        else {
            warn!("[ACL] Data for unknown {:?}", handle);
            return;
        };
        if let Some(frame) = entry.assembler.push(&packet) {
            trace!("[ACL] RX frame of {} bytes on {:?}", frame.len(), handle);
            self.buffers.deliver_inbound(handle, frame);
        }
    }

    // Completions and events

    /// Handle a Command Status for an opcode this manager issued
    pub fn on_command_status(&mut self, opcode: OpCode, status: ErrorCode) {
        let Some(context) = self.take_pending(opcode) else {
            warn!("[ACL] Unexpected status for {:?}", opcode);
            return;
        };
        if !status.is_success() {
            self.on_command_rejected(context, opcode, status);
        }
    }

    fn on_command_rejected(&mut self, context: PendingContext, opcode: OpCode, status: ErrorCode) {
        match context {
            PendingContext::CreateConnection(peer) => {
                if self.classic.outstanding == Some(peer) {
                    self.classic.outstanding = None;
                }
                self.classic_failed(peer, status, true);
                self.page_next();
            }
            PendingContext::AcceptConnection(peer) => {
                self.classic.incoming.retain(|p| *p != peer);
                self.classic_failed(peer, status, false);
            }
            PendingContext::Link(link) | PendingContext::LinkWrite(link, _) => {
                self.link_command_failed(link, opcode, status);
            }
            PendingContext::LeCreateConnection => self.on_le_create_failed(status),
            PendingContext::LeCreateConnectionCancel => self.on_le_cancel_complete(status),
            PendingContext::LeAddToAcceptList(_) | PendingContext::LeRemoveFromAcceptList(_) => {
                self.on_accept_list_complete(context, status);
            }
            PendingContext::CreateConnectionCancel(peer) | PendingContext::RejectConnection(peer) => {
                warn!("[ACL] {:?} for {:?} failed: {:?}", opcode, peer, status);
            }
            PendingContext::Unallocated(handle) => {
                warn!("[ACL] Disconnecting unallocated {:?} failed: {:?}", handle, status);
            }
        }
    }

    fn on_le_create_failed(&mut self, status: ErrorCode) {
        let direct = match self.le.state {
            InitiatorState::Connecting { direct }
            | InitiatorState::Cancelling { direct, .. }
            | InitiatorState::AwaitingCompletion { direct } => direct,
            _ => return,
        };
        // No connection complete follows a rejected create
        self.initiation_finished();
        let mut failed: Vec<LeRequest, MAX_PENDING_LE_CONNECTIONS> = Vec::new();
        self.le.requests.retain(|request| {
            let covered = match direct {
                Some(target) => request.peer.address == target.address,
                None => request.use_accept_list,
            };
            if covered {
                failed.push(*request).ok();
            }
            !covered
        });
        for request in failed {
            self.le_failed(request, status);
        }
        self.advance_le();
    }

    fn on_accept_list_complete(&mut self, context: PendingContext, status: ErrorCode) {
        if self.le.state == InitiatorState::UpdatingAcceptList {
            self.le.state = InitiatorState::Idle;
        }
        match context {
            PendingContext::LeAddToAcceptList(peer) if status.is_success() => {
                if self.le.accept_list.push(peer).is_err() {
                    warn!("[ACL] Accept list mirror full");
                }
                self.schedule_accept_list_removal(peer.address);
            }
            PendingContext::LeAddToAcceptList(peer) => {
                while let Some(request) = self.le.take_request(peer.address) {
                    self.le_failed(request, status);
                }
            }
            PendingContext::LeRemoveFromAcceptList(peer) => {
                if !status.is_success() {
                    warn!("[ACL] Removing {:?} from accept list failed: {:?}", peer, status);
                }
                self.le.accept_list.retain(|p| p.address != peer.address);
            }
            _ => {}
        }
        self.advance_le();
    }

    /// Handle a Command Complete for an opcode this manager issued
    pub fn on_command_complete(&mut self, opcode: OpCode, return_parameters: &[u8]) {
        let Some(context) = self.take_pending(opcode) else {
            warn!("[ACL] Unexpected completion for {:?}", opcode);
            return;
        };
        let mut r = ByteReader::new(return_parameters);
        let status = match r.u8() {
            Ok(status) => ErrorCode(status),
            Err(e) => {
                warn!("[ACL] Empty completion for {:?}: {:?}", opcode, e);
                return;
            }
        };
        match context {
            PendingContext::Link(link) => {
                if let Err(e) = self.on_link_complete(link, opcode, status, &mut r, None) {
                    warn!("[ACL] Malformed completion for {:?}: {:?}", opcode, e);
                }
            }
            PendingContext::LinkWrite(link, value) => {
                if let Err(e) = self.on_link_complete(link, opcode, status, &mut r, Some(value)) {
                    warn!("[ACL] Malformed completion for {:?}: {:?}", opcode, e);
                }
            }
            PendingContext::LeCreateConnectionCancel => self.on_le_cancel_complete(status),
            PendingContext::LeAddToAcceptList(_) | PendingContext::LeRemoveFromAcceptList(_) => {
                self.on_accept_list_complete(context, status);
            }
            PendingContext::CreateConnectionCancel(peer) => {
                if !status.is_success() {
                    debug!("[ACL] Cancel for {:?} completed with {:?}", peer, status);
                }
            }
            // Normally answered by Command Status; a completion only carries a status
            _ => {
                if !status.is_success() {
                    self.on_command_rejected(context, opcode, status);
                }
            }
        }
    }

    fn on_link_complete(
        &mut self,
        link: LinkId,
        opcode: OpCode,
        status: ErrorCode,
        r: &mut ByteReader<'_>,
        written: Option<u16>,
    ) -> Result<(), Error> {
        let Some(index) = self.connections.iter().position(|entry| entry.link == link) else {
            debug!("[ACL] Completion for closed {:?}", link);
            return Ok(());
        };
        if !status.is_success() {
            self.connections[index].command_failed(opcode, status);
            return Ok(());
        }
        let _handle = r.u16()?;

        if opcode == OpCode::WRITE_LINK_POLICY_SETTINGS {
            if let LinkKind::Classic { link_policy, .. } = &mut self.connections[index].kind {
                *link_policy = written.unwrap_or(*link_policy);
            }
        }

        let entry = &self.connections[index];
        if opcode == OpCode::READ_RSSI {
            let rssi = r.i8()?;
            match entry.kind {
                LinkKind::Classic {
                    callbacks: Some(callbacks),
                    ..
                } => callbacks.on_read_rssi_complete(rssi),
                LinkKind::Le {
                    callbacks: Some(callbacks),
                    ..
                } => callbacks.on_read_rssi_complete(rssi),
                _ => {}
            }
            return Ok(());
        }

        let Some(callbacks) = entry.classic_callbacks() else {
            debug!("[ACL] No link callbacks for {:?} on {:?}", opcode, link);
            return Ok(());
        };
        let written = written.unwrap_or_default();
        match opcode {
            OpCode::ROLE_DISCOVERY => callbacks.on_role_discovery_complete(Role::from_u8(r.u8()?)),
            OpCode::READ_LINK_POLICY_SETTINGS => {
                callbacks.on_read_link_policy_settings_complete(r.u16()?);
            }
            OpCode::WRITE_LINK_POLICY_SETTINGS => {
                callbacks.on_write_link_policy_settings_complete(written);
            }
            OpCode::READ_AUTOMATIC_FLUSH_TIMEOUT => {
                callbacks.on_read_automatic_flush_timeout_complete(r.u16()?);
            }
            OpCode::WRITE_AUTOMATIC_FLUSH_TIMEOUT => {
                callbacks.on_write_automatic_flush_timeout_complete(written);
            }
            OpCode::READ_TRANSMIT_POWER_LEVEL => {
                callbacks.on_read_transmit_power_level_complete(r.i8()?);
            }
            OpCode::READ_LINK_SUPERVISION_TIMEOUT => {
                callbacks.on_read_link_supervision_timeout_complete(r.u16()?);
            }
            OpCode::WRITE_LINK_SUPERVISION_TIMEOUT => {
                callbacks.on_write_link_supervision_timeout_complete(written);
            }
            OpCode::READ_FAILED_CONTACT_COUNTER => {
                callbacks.on_read_failed_contact_counter_complete(r.u16()?);
            }
            OpCode::RESET_FAILED_CONTACT_COUNTER => callbacks.on_failed_contact_counter_reset(),
            OpCode::READ_LINK_QUALITY => callbacks.on_read_link_quality_complete(r.u8()?),
            OpCode::READ_AFH_CHANNEL_MAP => {
                let mode = r.u8()?;
                callbacks.on_read_afh_channel_map_complete(mode, r.array()?);
            }
            OpCode::READ_CLOCK => {
                let clock = r.u32()?;
                callbacks.on_read_clock_complete(clock, r.u16()?);
            }
            // Results of these arrive as events
            OpCode::SNIFF_SUBRATING | OpCode::FLUSH => {}
            _ => debug!("[ACL] Ignoring completion of {:?}", opcode),
        }
        Ok(())
    }

    fn link_command_failed(&self, link: LinkId, opcode: OpCode, status: ErrorCode) {
        warn!("[ACL] {:?} on {:?} failed: {:?}", opcode, link, status);
        match self.connections.iter().find(|entry| entry.link == link) {
            Some(entry) => entry.command_failed(opcode, status),
            None => debug!("[ACL] Failure for closed {:?}", link),
        }
    }

    /// Handle a connection-related event
    ///
    /// Command Complete and Command Status are routed through
    /// [`AclManager::on_command_complete`] and [`AclManager::on_command_status`] instead.
    pub fn on_event(&mut self, event: &Event) {
        match *event {
            Event::ConnectionComplete {
                status,
                handle,
                peer,
                link_type,
                ..
            } => self.on_connection_complete(status, handle, peer, link_type),
            Event::ConnectionRequest {
                peer, link_type, ..
            } => self.on_connection_request(peer, link_type),
            Event::DisconnectionComplete {
                status,
                handle,
                reason,
            } => self.on_disconnection_complete(status, handle, reason),
            Event::AuthenticationComplete { status, handle } => {
                if let Some(callbacks) = self.classic_callbacks(handle) {
                    callbacks.on_authentication_complete(status);
                }
            }
            Event::ReadRemoteVersionInformationComplete {
                status,
                handle,
                version,
                manufacturer_name,
                sub_version,
            } => match self.find_by_handle(handle).map(|entry| &entry.kind) {
                Some(LinkKind::Classic {
                    callbacks: Some(callbacks),
                    ..
                }) => callbacks.on_read_remote_version_information_complete(
                    status,
                    version,
                    manufacturer_name,
                    sub_version,
                ),
                Some(LinkKind::Le {
                    callbacks: Some(callbacks),
                    ..
                }) => callbacks.on_read_remote_version_information_complete(
                    status,
                    version,
                    manufacturer_name,
                    sub_version,
                ),
                _ => {}
            },
            Event::QosSetupComplete {
                status,
                handle,
                qos,
            } => {
                if let Some(callbacks) = self.classic_callbacks(handle) {
                    if status.is_success() {
                        callbacks.on_qos_setup_complete(qos);
                    } else {
                        callbacks.on_command_failed(OpCode::QOS_SETUP, status);
                    }
                }
            }
            Event::FlushOccurred { handle } => {
                if let Some(callbacks) = self.classic_callbacks(handle) {
                    callbacks.on_flush_occurred();
                }
            }
            Event::RoleChange {
                status,
                peer,
                new_role,
            } => self.on_role_change(status, peer, new_role),
            Event::NumberOfCompletedPackets { ref entries } => {
                for completed in entries {
                    self.buffers
                        .complete_packets(completed.handle, completed.count);
                }
            }
            Event::ModeChange {
                status,
                handle,
                mode,
                interval,
            } => {
                if let Some(callbacks) = self.classic_callbacks(handle) {
                    callbacks.on_mode_change(status, mode, interval);
                }
            }
            Event::ReadClockOffsetComplete {
                status,
                handle,
                clock_offset,
            } => {
                if let Some(callbacks) = self.classic_callbacks(handle) {
                    if status.is_success() {
                        callbacks.on_read_clock_offset_complete(clock_offset);
                    } else {
                        callbacks.on_command_failed(OpCode::READ_CLOCK_OFFSET, status);
                    }
                }
            }
            Event::FlowSpecificationComplete {
                status,
                handle,
                flow,
            } => {
                if let Some(callbacks) = self.classic_callbacks(handle) {
                    if status.is_success() {
                        callbacks.on_flow_specification_complete(flow);
                    } else {
                        callbacks.on_command_failed(OpCode::FLOW_SPECIFICATION, status);
                    }
                }
            }
            Event::SniffSubrating {
                status,
                handle,
                maximum_transmit_latency,
                maximum_receive_latency,
                minimum_remote_timeout,
                minimum_local_timeout,
            } => {
                if let Some(callbacks) = self.classic_callbacks(handle) {
                    callbacks.on_sniff_subrating(
                        status,
                        maximum_transmit_latency,
                        maximum_receive_latency,
                        minimum_remote_timeout,
                        minimum_local_timeout,
                    );
                }
            }
            Event::LeMeta(LeMetaEvent::ConnectionComplete(complete)) => {
                self.on_le_connection_complete(complete);
            }
            Event::LeMeta(LeMetaEvent::ConnectionUpdateComplete {
                status,
                handle,
                interval,
                latency,
                supervision_timeout,
            }) => {
                if let Some(callbacks) = self
                    .find_by_handle(handle)
                    .and_then(ConnectionEntry::le_callbacks)
                {
                    callbacks.on_connection_update(status, interval, latency, supervision_timeout);
                }
            }
            _ => trace!("[ACL] Ignoring event"),
        }
    }

    fn on_connection_complete(
        &mut self,
        status: ErrorCode,
        handle: ConnectionHandle,
        peer: Address,
        link_type: u8,
    ) {
        if link_type != LINK_TYPE_ACL {
            debug!("[ACL] Ignoring synchronous link to {:?}", peer);
            return;
        }
        let locally_initiated = self.classic.outstanding == Some(peer);
        if locally_initiated {
            self.classic.outstanding = None;
        } else {
            self.classic.incoming.retain(|p| *p != peer);
        }

        if status.is_success() {
            if let Some(link) = self.allocate(
                handle,
                LinkKind::Classic {
                    peer,
                    role: if locally_initiated {
                        Role::Central
                    } else {
                        Role::Peripheral
                    },
                    link_policy: 0,
                    callbacks: None,
                },
            ) {
                info!("[ACL] Link {:?} up with {:?}", link, peer);
                let connection = ClassicConnection {
                    link,
                    peer,
                    role: if locally_initiated {
                        Role::Central
                    } else {
                        Role::Peripheral
                    },
                    locally_initiated,
                };
                match self.callbacks {
                    Some(callbacks) => callbacks.on_connect_success(connection),
                    None => debug!("[ACL] No callbacks for {:?}", link),
                }
            }
        } else {
            self.classic_failed(peer, status, locally_initiated);
        }

        if locally_initiated {
            self.page_next();
        }
    }

    fn on_connection_request(&mut self, peer: Address, link_type: u8) {
        if link_type == LINK_TYPE_ACL && self.callbacks.is_some() {
            debug!("[ACL] Accepting connection from {:?}", peer);
            if self.classic.incoming.push(peer).is_err() {
                warn!("[ACL] Too many incoming connections");
            }
            self.issue(
                Command::AcceptConnectionRequest {
                    peer,
                    role: Role::Peripheral,
                },
                PendingContext::AcceptConnection(peer),
            );
        } else {
            debug!("[ACL] Rejecting connection from {:?}", peer);
            self.issue(
                Command::RejectConnectionRequest {
                    peer,
                    reason: ErrorCode::CONNECTION_REJECTED_LIMITED_RESOURCES,
                },
                PendingContext::RejectConnection(peer),
            );
        }
    }

    fn on_disconnection_complete(
        &mut self,
        status: ErrorCode,
        handle: ConnectionHandle,
        reason: ErrorCode,
    ) {
        if !status.is_success() {
            match self.find_by_handle(handle) {
                Some(entry) => entry.command_failed(OpCode::DISCONNECT, status),
                None => warn!("[ACL] Disconnect of unknown {:?} failed", handle),
            }
            return;
        }
        self.deferred.retain(|complete| complete.handle != handle);
        let Some(index) = self
            .connections
            .iter()
            .position(|entry| entry.link.handle == handle)
        else {
            debug!("[ACL] Disconnection of unknown {:?}", handle);
            return;
        };
        let entry = self.connections.swap_remove(index);
        let reclaimed = self.buffers.close(handle);
        info!(
            "[ACL] {:?} down: {:?}, {} credits reclaimed",
            entry.link, reason, reclaimed
        );
        entry.disconnected(reason);
        self.advance_le();
    }

    fn on_role_change(&mut self, status: ErrorCode, peer: Address, new_role: Role) {
        let Some(entry) = self.connections.iter_mut().find(
            |entry| matches!(entry.kind, LinkKind::Classic { peer: p, .. } if p == peer),
        ) else {
            debug!("[ACL] Role change for unknown {:?}", peer);
            return;
        };
        if let LinkKind::Classic { role, callbacks, .. } = &mut entry.kind {
            if status.is_success() {
                *role = new_role;
            }
            if let Some(callbacks) = callbacks {
                callbacks.on_role_change(status, new_role);
            }
        }
    }

    // Helpers

    /// Send `command` and remember `context` for its completion
    ///
    /// A command that cannot be tracked or queued fails like a controller rejection, so
    /// whatever state the caller set up is unwound by the usual failure path.
    fn issue(&mut self, command: Command, context: PendingContext) {
        let opcode = command.opcode();
        if self
            .pending
            .push(PendingCommand { opcode, context })
            .is_err()
        {
            error!("[ACL] Too many pending commands, failing {:?}", opcode);
            self.on_command_rejected(context, opcode, ErrorCode::MEMORY_CAPACITY_EXCEEDED);
            return;
        }
        if let Err(e) = self.transport.send_command(&command) {
            error!("[ACL] Transport refused {:?}: {:?}", opcode, e);
            self.pending.pop();
            self.on_command_rejected(context, opcode, ErrorCode::MEMORY_CAPACITY_EXCEEDED);
        }
    }

    fn take_pending(&mut self, opcode: OpCode) -> Option<PendingContext> {
        let index = self
            .pending
            .iter()
            .position(|pending| pending.opcode == opcode)?;
        Some(self.pending.remove(index).context)
    }

    fn find_by_handle(&self, handle: ConnectionHandle) -> Option<&ConnectionEntry<'d>> {
        self.connections
            .iter()
            .find(|entry| entry.link.handle == handle)
    }

    fn find_classic_by_peer(&self, peer: Address) -> Option<&ConnectionEntry<'d>> {
        self.connections
            .iter()
            .find(|entry| matches!(entry.kind, LinkKind::Classic { peer: p, .. } if p == peer))
    }

    fn find_le_by_peer(&self, peer: Address) -> Option<&ConnectionEntry<'d>> {
        self.connections.iter().find(
            |entry| matches!(entry.kind, LinkKind::Le { peer: p, .. } if p.address == peer),
        )
    }

    fn classic_callbacks(
        &self,
        handle: ConnectionHandle,
    ) -> Option<&'d dyn ConnectionManagementCallbacks> {
        self.find_by_handle(handle)
            .and_then(ConnectionEntry::classic_callbacks)
    }

    fn entry(&self, link: LinkId) -> &ConnectionEntry<'d> {
        match self.connections.iter().find(|entry| entry.link == link) {
            Some(entry) => entry,
            None => panic!("operation on stale connection {:?}", link),
        }
    }

    fn entry_mut(&mut self, link: LinkId) -> &mut ConnectionEntry<'d> {
        match self.connections.iter_mut().find(|entry| entry.link == link) {
            Some(entry) => entry,
            None => panic!("operation on stale connection {:?}", link),
        }
    }

    fn classic_peer(&self, link: LinkId) -> Address {
        match self.entry(link).kind {
            LinkKind::Classic { peer, .. } => peer,
            LinkKind::Le { .. } => panic!("{:?} is not a classic link", link),
        }
    }

    fn classic_handle(&self, link: LinkId) -> ConnectionHandle {
        self.classic_peer(link);
        link.handle
    }
}
