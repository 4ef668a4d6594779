//! Fakes shared by the integration tests

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::vec::Vec;

use linkbird::{
    Address, AddressWithType, ControllerInfo, Error,
    acl::{ClassicConnection, ConnectionCallbacks, LeConnection, LeConnectionCallbacks},
    advertising::{
        AddressPolicy, AdvertisingCallbacks, AdvertisingCipher, AdvertisingCollaborators,
        AdvertisingStatus, KeyMaterial, KeyMaterialStore, LeAddressManager, RotationTimer,
        encryption::{KEY_LENGTH, NONCE_LENGTH},
    },
    constants::ENCRYPTED_DATA_MIC_LENGTH,
    hci::{Command, ErrorCode, Event, HciTransport, OpCode},
};

pub const PUBLIC_ADDRESS: Address = Address([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

pub fn legacy_controller() -> ControllerInfo {
    ControllerInfo {
        public_address: PUBLIC_ADDRESS,
        acl_buffer_count: 4,
        acl_buffer_size: 27,
        ..ControllerInfo::default()
    }
}

pub fn vendor_controller() -> ControllerInfo {
    ControllerInfo {
        vendor_max_advertising_instances: 4,
        ..legacy_controller()
    }
}

pub fn extended_controller() -> ControllerInfo {
    ControllerInfo {
        supports_extended_advertising: true,
        supported_advertising_sets: 4,
        maximum_advertising_data_length: 1650,
        supports_periodic_advertising: true,
        supports_periodic_advertising_adi: false,
        ..legacy_controller()
    }
}

/// Records everything handed to the transport
///
/// Unlimited by default; [`Recorder::limit_commands`] and [`Recorder::limit_acl`] make it
/// refuse items once that many are held, like a full controller queue.
#[derive(Default)]
pub struct Recorder {
    commands: RefCell<Vec<Command>>,
    acl: RefCell<Vec<Vec<u8>>>,
    command_room: Cell<Option<usize>>,
    acl_room: Cell<Option<usize>>,
}

impl Recorder {
    pub fn limit_commands(&self, room: usize) {
        self.command_room.set(Some(room));
    }

    pub fn limit_acl(&self, room: usize) {
        self.acl_room.set(Some(room));
    }

    pub fn acl_len(&self) -> usize {
        self.acl.borrow().len()
    }

    pub fn take(&self) -> Vec<Command> {
        self.commands.take()
    }

    pub fn opcodes(&self) -> Vec<OpCode> {
        self.take().iter().map(Command::opcode).collect()
    }

    pub fn take_acl(&self) -> Vec<Vec<u8>> {
        self.acl.take()
    }
}

impl HciTransport for Recorder {
    fn send_command(&self, command: &Command) -> Result<(), Error> {
        let mut commands = self.commands.borrow_mut();
        if self.command_room.get().is_some_and(|room| commands.len() >= room) {
            return Err(Error::BufferFull);
        }
        commands.push(command.clone());
        Ok(())
    }

    fn send_acl(&self, packet: &[u8]) -> Result<(), Error> {
        let mut acl = self.acl.borrow_mut();
        if self.acl_room.get().is_some_and(|room| acl.len() >= room) {
            return Err(Error::BufferFull);
        }
        acl.push(packet.to_vec());
        Ok(())
    }
}

pub fn command_complete(opcode: OpCode, return_parameters: &[u8]) -> Event {
    Event::CommandComplete {
        num_hci_command_packets: 1,
        opcode,
        return_parameters: heapless::Vec::from_slice(return_parameters).unwrap(),
    }
}

pub fn command_status(opcode: OpCode, status: ErrorCode) -> Event {
    Event::CommandStatus {
        status,
        num_hci_command_packets: 1,
        opcode,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advertising {
    SetStarted {
        reg_id: u8,
        id: u8,
        tx_power: i8,
        status: AdvertisingStatus,
    },
    Enabled {
        id: u8,
        enable: bool,
        status: ErrorCode,
    },
    DataSet(u8, AdvertisingStatus),
    ScanResponseSet(u8, AdvertisingStatus),
    ParametersUpdated {
        id: u8,
        tx_power: i8,
        status: AdvertisingStatus,
    },
    PeriodicParametersUpdated(u8, AdvertisingStatus),
    PeriodicDataSet(u8, AdvertisingStatus),
    PeriodicEnabled(u8, bool, AdvertisingStatus),
    OwnAddress(u8, AddressWithType),
    ScanRequest(u8, AddressWithType),
    KeyMaterial(KeyMaterial),
}

#[derive(Default)]
pub struct AdvertisingLog {
    events: RefCell<Vec<Advertising>>,
}

impl AdvertisingLog {
    pub fn take(&self) -> Vec<Advertising> {
        self.events.take()
    }

    fn push(&self, event: Advertising) {
        self.events.borrow_mut().push(event);
    }
}

impl AdvertisingCallbacks for AdvertisingLog {
    fn on_advertising_set_started(
        &self,
        reg_id: u8,
        advertiser_id: u8,
        tx_power: i8,
        status: AdvertisingStatus,
    ) {
        self.push(Advertising::SetStarted {
            reg_id,
            id: advertiser_id,
            tx_power,
            status,
        });
    }

    fn on_advertising_enabled(&self, advertiser_id: u8, enable: bool, status: ErrorCode) {
        self.push(Advertising::Enabled {
            id: advertiser_id,
            enable,
            status,
        });
    }

    fn on_advertising_data_set(&self, advertiser_id: u8, status: AdvertisingStatus) {
        self.push(Advertising::DataSet(advertiser_id, status));
    }

    fn on_scan_response_data_set(&self, advertiser_id: u8, status: AdvertisingStatus) {
        self.push(Advertising::ScanResponseSet(advertiser_id, status));
    }

    fn on_advertising_parameters_updated(
        &self,
        advertiser_id: u8,
        tx_power: i8,
        status: AdvertisingStatus,
    ) {
        self.push(Advertising::ParametersUpdated {
            id: advertiser_id,
            tx_power,
            status,
        });
    }

    fn on_periodic_advertising_parameters_updated(
        &self,
        advertiser_id: u8,
        status: AdvertisingStatus,
    ) {
        self.push(Advertising::PeriodicParametersUpdated(advertiser_id, status));
    }

    fn on_periodic_advertising_data_set(&self, advertiser_id: u8, status: AdvertisingStatus) {
        self.push(Advertising::PeriodicDataSet(advertiser_id, status));
    }

    fn on_periodic_advertising_enabled(
        &self,
        advertiser_id: u8,
        enable: bool,
        status: AdvertisingStatus,
    ) {
        self.push(Advertising::PeriodicEnabled(advertiser_id, enable, status));
    }

    fn on_own_address_read(&self, advertiser_id: u8, address: AddressWithType) {
        self.push(Advertising::OwnAddress(advertiser_id, address));
    }

    fn on_scan_request_received(&self, advertiser_id: u8, scanner: AddressWithType) {
        self.push(Advertising::ScanRequest(advertiser_id, scanner));
    }

    fn on_enc_key_material(&self, key_material: &KeyMaterial) {
        self.push(Advertising::KeyMaterial(*key_material));
    }
}

/// Address manager handing out numbered private addresses
pub struct FakeAddressManager {
    pub policy: Cell<AddressPolicy>,
    pub registered: Cell<bool>,
    pub registrations: Cell<u32>,
    pub pause_acks: Cell<u32>,
    pub resume_acks: Cell<u32>,
    pub initiator: Cell<AddressWithType>,
    next: Cell<u8>,
}

impl FakeAddressManager {
    pub fn new(policy: AddressPolicy) -> Self {
        Self {
            policy: Cell::new(policy),
            registered: Cell::new(false),
            registrations: Cell::new(0),
            pause_acks: Cell::new(0),
            resume_acks: Cell::new(0),
            initiator: Cell::new(AddressWithType::random(Address([0xC0; 6]))),
            next: Cell::new(0),
        }
    }

    fn fresh(&self, top: u8) -> AddressWithType {
        let n = self.next.get() + 1;
        self.next.set(n);
        AddressWithType::random(Address([n, 0, 0, 0, 0, top]))
    }
}

/// Resolvable addresses carry 0x40 in the top byte, non-resolvable ones 0x00
pub const RPA_TOP: u8 = 0x40;
pub const NRPA_TOP: u8 = 0x00;

impl LeAddressManager for FakeAddressManager {
    fn address_policy(&self) -> AddressPolicy {
        self.policy.get()
    }

    fn register(&self) {
        self.registered.set(true);
        self.registrations.set(self.registrations.get() + 1);
    }

    fn unregister(&self) {
        self.registered.set(false);
    }

    fn ack_pause(&self) {
        self.pause_acks.set(self.pause_acks.get() + 1);
    }

    fn ack_resume(&self) {
        self.resume_acks.set(self.resume_acks.get() + 1);
    }

    fn initiator_address(&self) -> AddressWithType {
        self.initiator.get()
    }

    fn new_resolvable_address(&self) -> AddressWithType {
        self.fresh(RPA_TOP)
    }

    fn new_non_resolvable_address(&self) -> AddressWithType {
        self.fresh(NRPA_TOP)
    }

    fn next_rotation_interval_ms(&self) -> u32 {
        900_000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Armed(u8, u32),
    Cancelled(u8),
}

#[derive(Default)]
pub struct FakeTimers {
    log: RefCell<Vec<Timer>>,
}

impl FakeTimers {
    pub fn take(&self) -> Vec<Timer> {
        self.log.take()
    }
}

impl RotationTimer for FakeTimers {
    fn arm(&self, advertiser_id: u8, delay_ms: u32) {
        self.log.borrow_mut().push(Timer::Armed(advertiser_id, delay_ms));
    }

    fn cancel(&self, advertiser_id: u8) {
        self.log.borrow_mut().push(Timer::Cancelled(advertiser_id));
    }
}

#[derive(Default)]
pub struct MemoryKeyStore {
    pub material: RefCell<Option<KeyMaterial>>,
    pub stores: Cell<u32>,
}

impl KeyMaterialStore for MemoryKeyStore {
    fn load(&self, name: &str) -> Option<KeyMaterial> {
        assert_eq!(name, "LeEncryptedAdvertisingKeyMaterial");
        *self.material.borrow()
    }

    fn store(&self, name: &str, material: &KeyMaterial) {
        assert_eq!(name, "LeEncryptedAdvertisingKeyMaterial");
        self.stores.set(self.stores.get() + 1);
        *self.material.borrow_mut() = Some(*material);
    }
}

/// XORs with 0x5A and returns a fixed MIC
#[derive(Default)]
pub struct XorCipher {
    pub nonces: RefCell<Vec<[u8; NONCE_LENGTH]>>,
}

pub const MIC: [u8; ENCRYPTED_DATA_MIC_LENGTH] = [0xDE, 0xAD, 0xBE, 0xEF];

impl AdvertisingCipher for XorCipher {
    fn seal(
        &self,
        _key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_LENGTH],
        aad: &[u8],
        data: &mut [u8],
    ) -> [u8; ENCRYPTED_DATA_MIC_LENGTH] {
        assert_eq!(aad, &[0xEA]);
        self.nonces.borrow_mut().push(*nonce);
        for byte in data.iter_mut() {
            *byte ^= 0x5A;
        }
        MIC
    }
}

/// Counts up from a seed
pub struct CounterRng(pub u64);

impl rand_core::RngCore for CounterRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest {
            *byte = self.next_u64() as u8;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Every advertising collaborator in one place
pub struct Platform {
    pub address_manager: FakeAddressManager,
    pub timers: FakeTimers,
    pub key_store: MemoryKeyStore,
    pub cipher: XorCipher,
    pub rng: CounterRng,
}

impl Platform {
    pub fn new(policy: AddressPolicy) -> Self {
        Self {
            address_manager: FakeAddressManager::new(policy),
            timers: FakeTimers::default(),
            key_store: MemoryKeyStore::default(),
            cipher: XorCipher::default(),
            rng: CounterRng(0),
        }
    }

    /// Split into collaborators; the RNG is borrowed mutably for the manager's lifetime
    pub fn collaborators(
        &mut self,
    ) -> (
        AdvertisingCollaborators<'_>,
        &FakeAddressManager,
        &FakeTimers,
        &MemoryKeyStore,
    ) {
        let Self {
            address_manager,
            timers,
            key_store,
            cipher,
            rng,
        } = self;
        (
            AdvertisingCollaborators {
                address_manager: &*address_manager,
                timers: &*timers,
                key_store: &*key_store,
                cipher: &*cipher,
                rng,
            },
            &*address_manager,
            &*timers,
            &*key_store,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Connected(ClassicConnection),
    Failed(Address, ErrorCode, bool),
    LeConnected(AddressWithType, LeConnection),
    LeFailed(AddressWithType, ErrorCode),
}

#[derive(Default)]
pub struct LifecycleLog {
    events: RefCell<Vec<Lifecycle>>,
}

impl LifecycleLog {
    pub fn take(&self) -> Vec<Lifecycle> {
        self.events.take()
    }
}

impl ConnectionCallbacks for LifecycleLog {
    fn on_connect_success(&self, connection: ClassicConnection) {
        self.events
            .borrow_mut()
            .push(Lifecycle::Connected(connection));
    }

    fn on_connect_fail(&self, peer: Address, reason: ErrorCode, locally_initiated: bool) {
        self.events
            .borrow_mut()
            .push(Lifecycle::Failed(peer, reason, locally_initiated));
    }
}

impl LeConnectionCallbacks for LifecycleLog {
    fn on_le_connect_success(&self, peer: AddressWithType, connection: LeConnection) {
        self.events
            .borrow_mut()
            .push(Lifecycle::LeConnected(peer, connection));
    }

    fn on_le_connect_fail(&self, peer: AddressWithType, reason: ErrorCode) {
        self.events
            .borrow_mut()
            .push(Lifecycle::LeFailed(peer, reason));
    }
}
