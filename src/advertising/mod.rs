//! LE advertising set management
//!
//! [`LeAdvertisingManager`] owns every advertising set of the host. Like the ACL
//! manager it is a synchronous state machine driven by the host runner: requests turn
//! into HCI commands, and completions are matched FIFO per opcode against the context
//! recorded when the command was issued.
//!
//! ## Controller generations
//!
//! The HCI generation is chosen once from [`ControllerInfo`] (extended, then the vendor
//! multi-advertising extension, then legacy). Command construction for each lives in
//! [`backend`]; the manager itself never branches on the generation when building
//! commands.
//!
//! ## Set lifecycle
//!
//! A set is allocated, its parameters and data are written, and it is enabled. The first
//! enable completion reports [`AdvertisingCallbacks::on_advertising_set_started`]; only
//! after that do parameter and data completions reach the registrant.
//!
//! ## Privacy
//!
//! Sets advertising with a private address are rotated on a timer owned by the platform
//! ([`RotationTimer`]). The address manager pauses advertising while it changes the
//! controller's addresses and resumes it afterwards.

pub mod backend;
pub mod callbacks;
pub mod config;
pub mod encryption;
pub mod gap;
pub mod privacy;

use heapless::Vec;
use rand_core::RngCore;

pub use backend::{AdvertisingApi, PayloadKind};
pub use callbacks::{AdvertisingCallbacks, AdvertisingStatus};
pub use config::{
    AdvertiserAddressType, AdvertisingConfig, AdvertisingOptions, LegacyAdvertisingType,
    PeriodicAdvertisingParameters,
};
pub use encryption::{AdvertisingCipher, KeyMaterial, KeyMaterialStore};
pub use gap::{AdvertisingFlags, GapData, GapDataType, GapPayload};
pub use privacy::{AddressPolicy, LeAddressManager, RotationTimer};

use crate::{
    AddressWithType, ControllerInfo, Error,
    advertising::{
        backend::{AdvertisingBackend, ParameterSet},
        privacy::resolve_address_type,
    },
    constants::{
        ADVERTISING_TX_POWER_MAX, ADVERTISING_TX_POWER_MIN, ENCRYPTED_DATA_MIC_LENGTH,
        FLAGS_ELEMENT_LENGTH, INVALID_ADVERTISER_ID, MAX_ADVERTISING_FRAGMENT_LENGTH,
        MAX_ADVERTISING_SETS, MAX_GAP_DATA_LENGTH, MAX_GAP_ELEMENTS, MAX_PENDING_COMMANDS,
        MAX_PERIODIC_FRAGMENT_LENGTH, RANDOMIZER_LENGTH,
    },
    hci::{
        Command, ConnectionHandle, EnabledSet, ErrorCode, Event, HciTransport, LeMetaEvent, OpCode,
        Operation, VendorEvent, bytes::ByteReader,
    },
};

/// Platform services the advertising manager relies on
pub struct AdvertisingCollaborators<'d> {
    /// Privacy policy and address allocation
    pub address_manager: &'d dyn LeAddressManager,
    /// Address rotation timers
    pub timers: &'d dyn RotationTimer,
    /// Storage of the encrypted advertising key material
    pub key_store: &'d dyn KeyMaterialStore,
    /// AES-CCM for encrypted advertising data
    pub cipher: &'d dyn AdvertisingCipher,
    /// Randomness for key material and randomizers
    pub rng: &'d mut dyn RngCore,
}

/// A set stopped and the ACL manager may be holding the link it produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetTermination {
    /// Link created by the set
    pub connection_handle: ConnectionHandle,
    /// Address the set advertised with
    pub local_address: AddressWithType,
    /// Whether the set was discoverable
    pub discoverable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notify {
    ParametersUpdated,
    DataSet,
    ScanResponseSet,
    PeriodicParametersUpdated,
    PeriodicDataSet,
}

impl From<PayloadKind> for Notify {
    fn from(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::Advertisement => Self::DataSet,
            PayloadKind::ScanResponse => Self::ScanResponseSet,
            PayloadKind::Periodic => Self::PeriodicDataSet,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingContext {
    /// Status-only completion, `notify` names the registrant callback if any
    Status { id: u8, notify: Option<Notify> },
    /// Extended parameters, the completion carries the selected tx power
    ExtendedParameters(u8),
    Enable {
        enable: bool,
        sets: Vec<EnabledSet, MAX_ADVERTISING_SETS>,
        trigger_callbacks: bool,
    },
    PeriodicEnable { id: u8, enable: bool },
    RandomAddress { id: u8, address: AddressWithType },
    TxPower,
}

#[derive(Debug, Clone)]
struct PendingCommand {
    opcode: OpCode,
    context: PendingContext,
}

#[derive(Debug, Clone)]
struct AdvertisingSet {
    id: u8,
    reg_id: u8,
    address_type: AdvertiserAddressType,
    current_address: AddressWithType,
    connectable: bool,
    scannable: bool,
    discoverable: bool,
    directed: bool,
    legacy_pdus: bool,
    tx_power: i8,
    duration: u16,
    max_extended_advertising_events: u8,
    started: bool,
    /// A random address write failed before the set reported its start
    address_failed: bool,
    rotation_armed: bool,
    is_periodic: bool,
    periodic_enabled: bool,
    advertisement: GapPayload,
    scan_response: GapPayload,
    periodic_data: GapPayload,
    advertisement_enc: GapPayload,
    scan_response_enc: GapPayload,
    periodic_data_enc: GapPayload,
    key_material: Option<KeyMaterial>,
}

impl AdvertisingSet {
    fn new(id: u8, reg_id: u8) -> Self {
        Self {
            id,
            reg_id,
            address_type: AdvertiserAddressType::Public,
            current_address: AddressWithType::default(),
            connectable: false,
            scannable: false,
            discoverable: false,
            directed: false,
            legacy_pdus: true,
            tx_power: 0,
            duration: 0,
            max_extended_advertising_events: 0,
            started: false,
            address_failed: false,
            rotation_armed: false,
            is_periodic: false,
            periodic_enabled: false,
            advertisement: GapPayload::new(),
            scan_response: GapPayload::new(),
            periodic_data: GapPayload::new(),
            advertisement_enc: GapPayload::new(),
            scan_response_enc: GapPayload::new(),
            periodic_data_enc: GapPayload::new(),
            key_material: None,
        }
    }

    fn payload(&self, kind: PayloadKind) -> (&GapPayload, &GapPayload) {
        match kind {
            PayloadKind::Advertisement => (&self.advertisement, &self.advertisement_enc),
            PayloadKind::ScanResponse => (&self.scan_response, &self.scan_response_enc),
            PayloadKind::Periodic => (&self.periodic_data, &self.periodic_data_enc),
        }
    }

    fn payload_mut(&mut self, kind: PayloadKind, encrypted: bool) -> &mut GapPayload {
        match (kind, encrypted) {
            (PayloadKind::Advertisement, false) => &mut self.advertisement,
            (PayloadKind::Advertisement, true) => &mut self.advertisement_enc,
            (PayloadKind::ScanResponse, false) => &mut self.scan_response,
            (PayloadKind::ScanResponse, true) => &mut self.scan_response_enc,
            (PayloadKind::Periodic, false) => &mut self.periodic_data,
            (PayloadKind::Periodic, true) => &mut self.periodic_data_enc,
        }
    }

    fn adds_flags(&self, kind: PayloadKind) -> bool {
        kind == PayloadKind::Advertisement
            && self.connectable
            && self.discoverable
            && !gap::has_flags(&self.advertisement)
    }

    fn encrypted_kinds(&self) -> Vec<PayloadKind, 3> {
        [
            PayloadKind::Advertisement,
            PayloadKind::ScanResponse,
            PayloadKind::Periodic,
        ]
        .into_iter()
        .filter(|kind| !self.payload(*kind).1.is_empty())
        .collect()
    }
}

/// Advertising set state machine
pub struct LeAdvertisingManager<'d> {
    transport: &'d dyn HciTransport,
    api: AdvertisingApi,
    backend: &'static dyn AdvertisingBackend,
    controller: ControllerInfo,
    options: AdvertisingOptions,
    address_manager: &'d dyn LeAddressManager,
    timers: &'d dyn RotationTimer,
    key_store: &'d dyn KeyMaterialStore,
    cipher: &'d dyn AdvertisingCipher,
    rng: &'d mut dyn RngCore,
    callbacks: Option<&'d dyn AdvertisingCallbacks>,
    sets: Vec<AdvertisingSet, MAX_ADVERTISING_SETS>,
    enabled: [EnabledSet; MAX_ADVERTISING_SETS],
    pending: Vec<PendingCommand, MAX_PENDING_COMMANDS>,
    key_material: Option<KeyMaterial>,
    physical_tx_power: i8,
    paused: bool,
    address_manager_registered: bool,
}

impl<'d> LeAdvertisingManager<'d> {
    /// Create a manager for a controller described by `controller`
    pub fn new(
        transport: &'d dyn HciTransport,
        controller: ControllerInfo,
        options: AdvertisingOptions,
        collaborators: AdvertisingCollaborators<'d>,
    ) -> Self {
        let api = AdvertisingApi::select(&controller);
        info!("[ADV] Using {:?} advertising", api);
        Self {
            transport,
            api,
            backend: api.backend(),
            controller,
            options,
            address_manager: collaborators.address_manager,
            timers: collaborators.timers,
            key_store: collaborators.key_store,
            cipher: collaborators.cipher,
            rng: collaborators.rng,
            callbacks: None,
            sets: Vec::new(),
            enabled: [EnabledSet::DISABLED; MAX_ADVERTISING_SETS],
            pending: Vec::new(),
            key_material: None,
            physical_tx_power: 0,
            paused: false,
            address_manager_registered: false,
        }
    }

    /// Query what the controller needs before the first set is created
    pub fn initialize(&mut self) {
        if !self.backend.selects_tx_power() {
            self.issue(
                Command::LeReadAdvertisingPhysicalChannelTxPower,
                PendingContext::TxPower,
            );
        }
    }

    /// HCI generation in use
    #[must_use]
    pub fn api(&self) -> AdvertisingApi {
        self.api
    }

    /// Register the registrant callbacks
    pub fn register_callbacks(&mut self, callbacks: &'d dyn AdvertisingCallbacks) {
        self.callbacks = Some(callbacks);
    }

    /// Drop the registrant callbacks
    ///
    /// # Panics
    /// Panics if no callbacks are registered
    pub fn unregister_callbacks(&mut self) {
        assert!(
            self.callbacks.take().is_some(),
            "advertising callbacks are not registered"
        );
    }

    /// Number of allocated sets
    #[must_use]
    pub fn advertiser_count(&self) -> usize {
        self.sets.len()
    }

    /// Whether `advertiser_id` is in the enabled table
    #[must_use]
    pub fn is_enabled(&self, advertiser_id: u8) -> bool {
        self.enabled
            .get(usize::from(advertiser_id))
            .is_some_and(EnabledSet::is_enabled)
    }

    /// Whether the set reported its start
    #[must_use]
    pub fn is_started(&self, advertiser_id: u8) -> bool {
        self.set(advertiser_id).is_some_and(|set| set.started)
    }

    /// Address a set currently advertises with
    #[must_use]
    pub fn current_address(&self, advertiser_id: u8) -> Option<AddressWithType> {
        self.set(advertiser_id).map(|set| set.current_address)
    }

    /// Whether the address manager paused advertising
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the manager is waiting for a completion of `opcode`
    #[must_use]
    pub fn expects(&self, opcode: OpCode) -> bool {
        self.pending.iter().any(|pending| pending.opcode == opcode)
    }

    // Lifecycle

    /// Reserve an advertiser id without starting anything
    ///
    /// # Errors
    /// Returns [`AdvertisingStatus::TooManyAdvertisers`] when every id is taken
    pub fn register_advertiser(&mut self) -> Result<u8, AdvertisingStatus> {
        let id = self
            .allocate_id()
            .ok_or(AdvertisingStatus::TooManyAdvertisers)?;
        self.insert_set(id, id);
        debug!("[ADV] Registered advertiser {}", id);
        Ok(id)
    }

    /// Start a registered set; the advertiser id doubles as registration tag
    pub fn start_advertising(&mut self, advertiser_id: u8, config: &AdvertisingConfig, duration: u16) {
        let Some(set) = self.set(advertiser_id) else {
            warn!("[ADV] Start of unknown advertiser {}", advertiser_id);
            return;
        };
        if set.started {
            let tx_power = self.reported_tx_power(set);
            self.notify(|callbacks| {
                callbacks.on_advertising_set_started(
                    advertiser_id,
                    advertiser_id,
                    tx_power,
                    AdvertisingStatus::AlreadyStarted,
                );
            });
            return;
        }
        if self.api == AdvertisingApi::Extended && !config.is_valid_extended() {
            self.notify(|callbacks| {
                callbacks.on_advertising_set_started(
                    advertiser_id,
                    advertiser_id,
                    0,
                    AdvertisingStatus::InternalError,
                );
            });
            return;
        }
        self.start(advertiser_id, advertiser_id, config, duration, 0);
    }

    /// Allocate and start a set on a legacy or vendor controller
    ///
    /// Extended controllers go through [`LeAdvertisingManager::create_extended_advertiser`]
    /// without limits.
    pub fn create_advertiser(&mut self, reg_id: u8, config: &AdvertisingConfig) {
        if self.api == AdvertisingApi::Extended {
            self.create_extended_advertiser(reg_id, config, 0, 0);
            return;
        }
        let Some(id) = self.allocate_id() else {
            self.report_too_many(reg_id);
            return;
        };
        self.insert_set(id, reg_id);
        if !self.start(id, reg_id, config, 0, 0) {
            self.release(id);
        }
    }

    /// Allocate and start an extended set
    ///
    /// `duration` is in 10 ms units; `duration` and `max_extended_advertising_events`
    /// are zero for no limit.
    pub fn create_extended_advertiser(
        &mut self,
        reg_id: u8,
        config: &AdvertisingConfig,
        duration: u16,
        max_extended_advertising_events: u8,
    ) {
        if self.api != AdvertisingApi::Extended {
            self.create_advertiser(reg_id, config);
            return;
        }
        if !config.is_valid_extended() {
            warn!("[ADV] Invalid extended configuration from {}", reg_id);
            self.notify(|callbacks| {
                callbacks.on_advertising_set_started(
                    reg_id,
                    INVALID_ADVERTISER_ID,
                    0,
                    AdvertisingStatus::InternalError,
                );
            });
            return;
        }
        let Some(id) = self.allocate_id() else {
            self.report_too_many(reg_id);
            return;
        };
        self.insert_set(id, reg_id);
        if !self.start(id, reg_id, config, duration, max_extended_advertising_events) {
            self.release(id);
        }
    }

    fn report_too_many(&self, reg_id: u8) {
        warn!("[ADV] No advertiser id left for {}", reg_id);
        self.notify(|callbacks| {
            callbacks.on_advertising_set_started(
                reg_id,
                INVALID_ADVERTISER_ID,
                0,
                AdvertisingStatus::TooManyAdvertisers,
            );
        });
    }

    /// Configure, fill and enable an allocated set; false when the payloads do not fit
    fn start(
        &mut self,
        id: u8,
        reg_id: u8,
        config: &AdvertisingConfig,
        duration: u16,
        max_extended_advertising_events: u8,
    ) -> bool {
        let policy = self.address_manager.address_policy();
        let (connectable, scannable, directed, legacy_pdus) = if self.api == AdvertisingApi::Extended
        {
            (
                config.connectable,
                config.scannable,
                config.directed,
                config.legacy_pdus,
            )
        } else {
            let kind = config.advertising_type;
            (
                kind.is_connectable(),
                kind.is_scannable(),
                kind.is_directed(),
                true,
            )
        };
        let address_type =
            resolve_address_type(config.requested_address_type, policy, connectable);
        let current_address = self.new_advertiser_address(address_type, policy);

        let Some(set) = self.set_mut(id) else {
            return false;
        };
        set.reg_id = reg_id;
        set.address_type = address_type;
        set.current_address = current_address;
        set.connectable = connectable;
        set.scannable = scannable;
        set.discoverable = config.discoverable;
        set.directed = directed;
        set.legacy_pdus = legacy_pdus;
        set.tx_power = config.tx_power;
        set.duration = duration;
        set.max_extended_advertising_events = max_extended_advertising_events;
        set.advertisement = config.advertisement.clone();
        set.scan_response = config.scan_response.clone();
        set.periodic_data = config.periodic_data.clone();
        set.advertisement_enc = config.advertisement_enc.clone();
        set.scan_response_enc = config.scan_response_enc.clone();
        set.periodic_data_enc = config.periodic_data_enc.clone();
        set.key_material = config.enc_key_material;

        let periodic = config.periodic_parameters.enable && self.periodic_supported();
        let mut kinds: Vec<PayloadKind, 3> = Vec::new();
        kinds.push(PayloadKind::Advertisement).ok();
        if scannable {
            kinds.push(PayloadKind::ScanResponse).ok();
        }
        if periodic {
            kinds.push(PayloadKind::Periodic).ok();
        }
        if let Some(set) = self.set(id) {
            if kinds.iter().any(|kind| !self.payload_fits(set, *kind)) {
                warn!("[ADV] Payload of set {} does not fit", id);
                let tx_power = self.reported_tx_power(set);
                self.notify(|callbacks| {
                    callbacks.on_advertising_set_started(
                        reg_id,
                        id,
                        tx_power,
                        AdvertisingStatus::DataTooLarge,
                    );
                });
                return false;
            }
        }

        info!(
            "[ADV] Starting set {} for {}, {:?} address {:?}",
            id, reg_id, address_type, current_address
        );
        self.issue_parameters(id, config);
        if current_address.address_type.is_random() {
            if let Some(command) = self.backend.random_address(id, current_address.address) {
                self.issue(
                    command,
                    PendingContext::RandomAddress {
                        id,
                        address: current_address,
                    },
                );
            }
        }
        for kind in kinds {
            if kind == PayloadKind::Periodic {
                self.issue_periodic_parameters(id, &config.periodic_parameters);
            }
            self.apply_data(id, kind, true);
        }
        if periodic {
            self.enable_periodic_advertising(id, true, config.periodic_parameters.include_adi);
        }

        let record = EnabledSet {
            advertising_handle: id,
            duration,
            max_extended_advertising_events,
        };
        self.enabled[usize::from(id)] = record;
        if self.paused {
            debug!("[ADV] Set {} waits for resume", id);
        } else {
            self.issue_enable(true, &[record], true);
        }
        if address_type != AdvertiserAddressType::Public && !self.backend.shares_initiator_address()
        {
            self.arm_rotation(id);
        }
        true
    }

    // Configuration

    /// Write new parameters for a set
    pub fn set_parameters(&mut self, advertiser_id: u8, config: &AdvertisingConfig) {
        let Some(set) = self.set_mut(advertiser_id) else {
            warn!("[ADV] Parameters for unknown advertiser {}", advertiser_id);
            return;
        };
        set.tx_power = config.tx_power;
        set.discoverable = config.discoverable;
        self.issue_parameters(advertiser_id, config);
    }

    fn issue_parameters(&mut self, id: u8, config: &AdvertisingConfig) {
        let Some(set) = self.set(id) else {
            return;
        };
        let backend = self.backend;
        let command = backend.parameters(&ParameterSet {
            id,
            config,
            own_address: set.current_address,
            tx_power: set.tx_power,
        });
        let context = if backend.selects_tx_power() {
            PendingContext::ExtendedParameters(id)
        } else {
            PendingContext::Status {
                id,
                notify: Some(Notify::ParametersUpdated),
            }
        };
        self.issue(command, context);
    }

    /// Replace the advertising data (`scan_response == false`) or scan response of a set
    pub fn set_data(&mut self, advertiser_id: u8, scan_response: bool, data: &[GapData]) {
        let kind = if scan_response {
            PayloadKind::ScanResponse
        } else {
            PayloadKind::Advertisement
        };
        self.store_payload(advertiser_id, kind, false, data);
    }

    /// Replace the elements sealed into the advertising data or scan response
    pub fn set_encrypted_data(&mut self, advertiser_id: u8, scan_response: bool, data: &[GapData]) {
        let kind = if scan_response {
            PayloadKind::ScanResponse
        } else {
            PayloadKind::Advertisement
        };
        self.store_payload(advertiser_id, kind, true, data);
    }

    fn store_payload(&mut self, id: u8, kind: PayloadKind, encrypted: bool, data: &[GapData]) {
        if self.set(id).is_none() {
            warn!("[ADV] Data for unknown advertiser {}", id);
            return;
        }
        let Ok(payload) = GapPayload::from_slice(data) else {
            warn!("[ADV] More than {} elements for set {}", MAX_GAP_ELEMENTS, id);
            self.notify_data(id, kind, AdvertisingStatus::DataTooLarge);
            return;
        };
        if let Some(set) = self.set_mut(id) {
            *set.payload_mut(kind, encrypted) = payload;
        }
        self.apply_data(id, kind, true);
    }

    /// Enable or disable a set
    ///
    /// `duration` is in 10 ms units; `duration` and `max_extended_advertising_events`
    /// are zero for no limit.
    pub fn enable_advertiser(
        &mut self,
        advertiser_id: u8,
        enable: bool,
        duration: u16,
        max_extended_advertising_events: u8,
    ) {
        let shares_initiator_address = self.backend.shares_initiator_address();
        let Some(set) = self.set_mut(advertiser_id) else {
            warn!("[ADV] Enable of unknown advertiser {}", advertiser_id);
            return;
        };
        let record = EnabledSet {
            advertising_handle: advertiser_id,
            duration,
            max_extended_advertising_events,
        };
        if enable {
            set.duration = duration;
            set.max_extended_advertising_events = max_extended_advertising_events;
        }
        let rotate = enable
            && !set.rotation_armed
            && set.address_type != AdvertiserAddressType::Public
            && !shares_initiator_address;
        self.enabled[usize::from(advertiser_id)] = if enable {
            record
        } else {
            EnabledSet::DISABLED
        };

        if !enable {
            self.cancel_rotation(advertiser_id);
        }
        if self.paused {
            debug!("[ADV] Paused, set {} applies on resume", advertiser_id);
            return;
        }
        self.issue_enable(enable, &[record], true);
        if rotate {
            self.arm_rotation(advertiser_id);
        }
    }

    // Periodic advertising

    fn periodic_supported(&self) -> bool {
        self.backend.supports_periodic() && self.controller.supports_periodic_advertising
    }

    /// Write the periodic train parameters of a set
    pub fn set_periodic_parameters(
        &mut self,
        advertiser_id: u8,
        parameters: &PeriodicAdvertisingParameters,
    ) {
        if self.set(advertiser_id).is_none() {
            warn!("[ADV] Periodic parameters for unknown advertiser {}", advertiser_id);
            return;
        }
        if !self.periodic_supported() {
            self.notify(|callbacks| {
                callbacks.on_periodic_advertising_parameters_updated(
                    advertiser_id,
                    AdvertisingStatus::FeatureUnsupported,
                );
            });
            return;
        }
        self.issue_periodic_parameters(advertiser_id, parameters);
    }

    fn issue_periodic_parameters(&mut self, id: u8, parameters: &PeriodicAdvertisingParameters) {
        if let Some(set) = self.set_mut(id) {
            set.is_periodic = true;
        }
        self.issue(
            Command::LeSetPeriodicAdvertisingParameters {
                handle: id,
                interval_min: parameters.min_interval,
                interval_max: parameters.max_interval,
                properties: parameters.properties(),
            },
            PendingContext::Status {
                id,
                notify: Some(Notify::PeriodicParametersUpdated),
            },
        );
    }

    /// Replace the periodic data of a set
    pub fn set_periodic_data(&mut self, advertiser_id: u8, data: &[GapData]) {
        if !self.periodic_supported() {
            if self.set(advertiser_id).is_some() {
                self.notify_data(
                    advertiser_id,
                    PayloadKind::Periodic,
                    AdvertisingStatus::FeatureUnsupported,
                );
            }
            return;
        }
        self.store_payload(advertiser_id, PayloadKind::Periodic, false, data);
    }

    /// Start or stop the periodic train of a set
    ///
    /// ADI inclusion is dropped when the controller cannot do it. Does nothing without
    /// periodic advertising support.
    pub fn enable_periodic_advertising(&mut self, advertiser_id: u8, enable: bool, include_adi: bool) {
        if !self.periodic_supported() {
            debug!("[ADV] Periodic advertising unsupported");
            return;
        }
        if self.set(advertiser_id).is_none() {
            warn!("[ADV] Periodic enable of unknown advertiser {}", advertiser_id);
            return;
        }
        let include_adi = include_adi && self.controller.supports_periodic_advertising_adi;
        self.issue(
            Command::LeSetPeriodicAdvertisingEnable {
                enable,
                include_adi,
                handle: advertiser_id,
            },
            PendingContext::PeriodicEnable {
                id: advertiser_id,
                enable,
            },
        );
    }

    // Queries and teardown

    /// Report the address a set advertises with through `on_own_address_read`
    pub fn get_own_address(&self, advertiser_id: u8) {
        match self.set(advertiser_id) {
            Some(set) => {
                let address = set.current_address;
                self.notify(|callbacks| callbacks.on_own_address_read(advertiser_id, address));
            }
            None => warn!("[ADV] Address of unknown advertiser {}", advertiser_id),
        }
    }

    /// Stop a set and free its id
    pub fn remove_advertiser(&mut self, advertiser_id: u8) {
        if self.set(advertiser_id).is_none() {
            warn!("[ADV] Removal of unknown advertiser {}", advertiser_id);
            return;
        }
        info!("[ADV] Removing set {}", advertiser_id);
        self.tear_down(advertiser_id);
        self.release(advertiser_id);
    }

    /// Stop a set and clear its state, keeping the id
    pub fn reset_advertiser(&mut self, advertiser_id: u8) {
        let Some(reg_id) = self.set(advertiser_id).map(|set| set.reg_id) else {
            warn!("[ADV] Reset of unknown advertiser {}", advertiser_id);
            return;
        };
        self.tear_down(advertiser_id);
        if let Some(set) = self.set_mut(advertiser_id) {
            *set = AdvertisingSet::new(advertiser_id, reg_id);
        }
    }

    fn tear_down(&mut self, id: u8) {
        self.cancel_rotation(id);
        let record = self.enabled[usize::from(id)];
        self.enabled[usize::from(id)] = EnabledSet::DISABLED;
        if !self.paused {
            let record = if record.is_enabled() {
                record
            } else {
                EnabledSet::new(id)
            };
            self.issue_enable(false, &[record], false);
        }
        let periodic_enabled = self
            .set(id)
            .is_some_and(|set| set.is_periodic && set.periodic_enabled);
        if periodic_enabled {
            self.issue(
                Command::LeSetPeriodicAdvertisingEnable {
                    enable: false,
                    include_adi: false,
                    handle: id,
                },
                PendingContext::Status { id, notify: None },
            );
        }
        if let Some(command) = self.backend.remove(id) {
            self.issue(command, PendingContext::Status { id, notify: None });
        }
    }

    /// Report the encrypted advertising key material, generating it on first use
    pub fn read_key_material(&mut self) {
        let material = self.load_key_material();
        self.notify(|callbacks| callbacks.on_enc_key_material(&material));
    }

    fn load_key_material(&mut self) -> KeyMaterial {
        if let Some(material) = self.key_material {
            return material;
        }
        let name = self.options.key_material_name;
        let material = match self.key_store.load(name) {
            Some(material) => material,
            None => {
                info!("[ADV] Generating encrypted advertising key material");
                let material = KeyMaterial::generate(&mut *self.rng);
                self.key_store.store(name, &material);
                material
            }
        };
        self.key_material = Some(material);
        material
    }

    // Privacy

    /// The address manager wants the controller quiet
    pub fn on_pause(&mut self) {
        debug!("[ADV] Pausing");
        self.paused = true;
        let records = self.enabled_records();
        self.issue_enable(false, &records, false);
        self.address_manager.ack_pause();
    }

    /// The address manager is done
    pub fn on_resume(&mut self) {
        debug!("[ADV] Resuming");
        self.paused = false;
        if self.backend.shares_initiator_address() {
            let initiator = self.address_manager.initiator_address();
            for set in &mut self.sets {
                if set.address_type != AdvertiserAddressType::Public {
                    set.current_address = initiator;
                }
            }
        }
        let records = self.enabled_records();
        self.issue_enable(true, &records, false);
        self.address_manager.ack_resume();
    }

    /// The local IRK changed, so every rotating set needs a new address now
    pub fn on_irk_change(&mut self) {
        let rotating: Vec<u8, MAX_ADVERTISING_SETS> = self
            .sets
            .iter()
            .filter(|set| set.rotation_armed)
            .map(|set| set.id)
            .collect();
        for id in rotating {
            self.on_rotation_timer(id);
        }
    }

    /// The rotation timer of `advertiser_id` expired
    pub fn on_rotation_timer(&mut self, advertiser_id: u8) {
        if !self.is_enabled(advertiser_id) {
            debug!("[ADV] Set {} is not enabled, dropping its rotation", advertiser_id);
            if let Some(set) = self.set_mut(advertiser_id) {
                set.rotation_armed = false;
            }
            return;
        }
        self.rotate_address(advertiser_id);
        self.arm_rotation(advertiser_id);
    }

    fn rotate_address(&mut self, id: u8) {
        let backend = self.backend;
        let Some(set) = self.set(id) else {
            return;
        };
        if set.address_type == AdvertiserAddressType::Public || backend.shares_initiator_address()
        {
            return;
        }
        let connectable = set.connectable;
        let address_type = set.address_type;
        let encrypted = set.encrypted_kinds();
        let record = self.enabled[usize::from(id)];

        if connectable {
            self.issue_enable(false, &[record], false);
        }
        let address = match address_type {
            AdvertiserAddressType::ResolvableRandom => self.address_manager.new_resolvable_address(),
            _ => self.address_manager.new_non_resolvable_address(),
        };
        debug!("[ADV] Rotating set {} to {:?}", id, address);
        if let Some(command) = backend.random_address(id, address.address) {
            self.issue(command, PendingContext::RandomAddress { id, address });
        }
        for kind in encrypted {
            self.apply_data(id, kind, !connectable);
        }
        if connectable && !self.paused {
            self.issue_enable(true, &[record], false);
        }
    }

    fn arm_rotation(&mut self, id: u8) {
        let delay = self.address_manager.next_rotation_interval_ms();
        trace!("[ADV] Rotating set {} in {} ms", id, delay);
        self.timers.arm(id, delay);
        if let Some(set) = self.set_mut(id) {
            set.rotation_armed = true;
        }
    }

    fn cancel_rotation(&mut self, id: u8) {
        let timers = self.timers;
        if let Some(set) = self.set_mut(id) {
            if set.rotation_armed {
                set.rotation_armed = false;
                timers.cancel(id);
            }
        }
    }

    // Data path

    /// Serialized size checks for one payload of a set
    fn payload_fits(&self, set: &AdvertisingSet, kind: PayloadKind) -> bool {
        let (clear, encrypted) = set.payload(kind);
        let mut total = gap::payload_length(clear);
        let mut largest = clear.iter().map(GapData::size).max().unwrap_or(0);
        let mut count = clear.len();
        if set.adds_flags(kind) {
            total += FLAGS_ELEMENT_LENGTH;
            count += 1;
        }
        if !encrypted.is_empty() {
            let sealed =
                2 + RANDOMIZER_LENGTH + gap::payload_length(encrypted) + ENCRYPTED_DATA_MIC_LENGTH;
            total += sealed;
            largest = largest.max(sealed);
            count += 1;
        }
        let legacy_pdus = set.legacy_pdus && kind != PayloadKind::Periodic;
        let limit = self.backend.max_data_length(&self.controller, legacy_pdus);
        largest <= MAX_GAP_DATA_LENGTH && total <= limit && count <= MAX_GAP_ELEMENTS
    }

    /// Build and send one payload of a set
    ///
    /// `wrap` allows a multi-fragment update of an enabled set to be bracketed by a
    /// disable and enable.
    fn apply_data(&mut self, id: u8, kind: PayloadKind, wrap: bool) {
        let Some(set) = self.set(id) else {
            return;
        };
        if !self.payload_fits(set, kind) {
            warn!("[ADV] {:?} of set {} is too large", kind, id);
            self.notify_data(id, kind, AdvertisingStatus::DataTooLarge);
            return;
        }
        let bytes = match self.build_payload(id, kind).and_then(|elements| gap::serialize(&elements))
        {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("[ADV] Cannot build {:?} of set {}: {:?}", kind, id, e);
                self.notify_data(id, kind, AdvertisingStatus::InternalError);
                return;
            }
        };
        self.send_payload(id, kind, &bytes, wrap);
    }

    fn build_payload(&mut self, id: u8, kind: PayloadKind) -> Result<GapPayload, Error> {
        let set = self.set(id).ok_or(Error::InvalidParameter)?;
        let tx_power = self.reported_tx_power(set);
        let (clear, encrypted) = set.payload(kind);
        let encrypted = encrypted.clone();
        let override_material = set.key_material;

        let mut elements = GapPayload::new();
        if set.adds_flags(kind) {
            let flags = if set.duration == 0 {
                AdvertisingFlags::LE_GENERAL_DISCOVERABLE
            } else {
                AdvertisingFlags::LE_LIMITED_DISCOVERABLE
            };
            elements
                .push(GapData::flags(flags))
                .map_err(|_| Error::BufferFull)?;
        }
        for element in clear {
            let mut element = element.clone();
            if element.data_type == GapDataType::TX_POWER_LEVEL {
                element.data.clear();
                element
                    .data
                    .push(tx_power.to_le_bytes()[0])
                    .map_err(|_| Error::BufferFull)?;
            }
            elements.push(element).map_err(|_| Error::BufferFull)?;
        }

        if !encrypted.is_empty() {
            let material = match override_material {
                Some(material) => material,
                None => self.load_key_material(),
            };
            let randomizer = encryption::randomizer(&mut *self.rng);
            let sealed = encryption::seal(self.cipher, &material, &randomizer, &encrypted)?;
            elements.push(sealed).map_err(|_| Error::BufferFull)?;
        }
        Ok(elements)
    }

    fn send_payload(&mut self, id: u8, kind: PayloadKind, bytes: &[u8], wrap: bool) {
        let backend = self.backend;
        let fragment_length = if !backend.fragments_data() {
            bytes.len().max(1)
        } else if kind == PayloadKind::Periodic {
            self.options
                .periodic_fragment_length
                .clamp(1, MAX_PERIODIC_FRAGMENT_LENGTH)
        } else {
            self.options
                .fragment_length
                .clamp(1, MAX_ADVERTISING_FRAGMENT_LENGTH)
        };
        let count = bytes.len().div_ceil(fragment_length).max(1);
        let record = self.enabled[usize::from(id)];
        let wrap = wrap
            && count > 1
            && kind != PayloadKind::Periodic
            && record.is_enabled()
            && !self.paused;

        trace!(
            "[ADV] {:?} of set {}: {} bytes in {} commands",
            kind,
            id,
            bytes.len(),
            count
        );
        if wrap {
            self.issue_enable(false, &[record], false);
        }
        for index in 0..count {
            let start = index * fragment_length;
            let chunk = &bytes[start..bytes.len().min(start + fragment_length)];
            let operation = match index {
                _ if count == 1 => Operation::Complete,
                0 => Operation::First,
                i if i == count - 1 => Operation::Last,
                _ => Operation::Intermediate,
            };
            match backend.data(id, kind, operation, chunk) {
                Ok(command) => {
                    let notify = operation.finishes_payload().then_some(Notify::from(kind));
                    self.issue(command, PendingContext::Status { id, notify });
                }
                Err(e) => error!("[ADV] Cannot encode {:?} fragment: {:?}", kind, e),
            }
        }
        if wrap {
            self.issue_enable(true, &[record], false);
        }
    }

    fn notify_data(&self, id: u8, kind: PayloadKind, status: AdvertisingStatus) {
        self.notify(|callbacks| match kind {
            PayloadKind::Advertisement => callbacks.on_advertising_data_set(id, status),
            PayloadKind::ScanResponse => callbacks.on_scan_response_data_set(id, status),
            PayloadKind::Periodic => callbacks.on_periodic_advertising_data_set(id, status),
        });
    }

    // Events

    /// Handle an advertising-related event
    ///
    /// Returns the termination the ACL manager needs when a set stopped.
    pub fn on_event(&mut self, event: &Event) -> Option<SetTermination> {
        match *event {
            Event::LeMeta(LeMetaEvent::AdvertisingSetTerminated {
                status,
                advertising_handle,
                connection_handle,
                ..
            }) => self.on_set_terminated(status, advertising_handle, connection_handle),
            Event::LeMeta(LeMetaEvent::ScanRequestReceived {
                advertising_handle,
                scanner,
            }) => {
                trace!("[ADV] Scan request on set {} from {:?}", advertising_handle, scanner);
                self.notify(|callbacks| {
                    callbacks.on_scan_request_received(advertising_handle, scanner);
                });
                None
            }
            Event::Vendor(VendorEvent::MultiAdvStateChange {
                advertising_instance,
                reason,
                connection_handle,
            }) => {
                if reason != VendorEvent::CONNECTION_RECEIVED {
                    debug!(
                        "[ADV] Instance {} changed state: {}",
                        advertising_instance, reason
                    );
                    return None;
                }
                self.on_set_terminated(ErrorCode::SUCCESS, advertising_instance, connection_handle)
            }
            _ => None,
        }
    }

    fn on_set_terminated(
        &mut self,
        status: ErrorCode,
        id: u8,
        connection_handle: ConnectionHandle,
    ) -> Option<SetTermination> {
        if status == ErrorCode::OPERATION_CANCELLED_BY_HOST {
            debug!("[ADV] Set {} stopped by the host", id);
            return None;
        }
        let Some(set) = self.set(id) else {
            warn!("[ADV] Termination of unknown set {}", id);
            return None;
        };
        let termination = SetTermination {
            connection_handle,
            local_address: set.current_address,
            discoverable: set.discoverable,
        };
        let restart = !set.directed && set.duration == 0 && set.max_extended_advertising_events == 0;
        let rotation_armed = set.rotation_armed;
        self.enabled[usize::from(id)] = EnabledSet::DISABLED;

        if status == ErrorCode::LIMIT_REACHED || status == ErrorCode::ADVERTISING_TIMEOUT {
            info!("[ADV] Set {} ran out: {:?}", id, status);
            self.cancel_rotation(id);
            self.notify(|callbacks| callbacks.on_advertising_enabled(id, false, status));
        } else if restart {
            debug!("[ADV] Set {} connected as {:?}, re-enabling", id, connection_handle);
            let record = EnabledSet::new(id);
            self.enabled[usize::from(id)] = record;
            if !self.paused {
                self.issue_enable(true, &[record], false);
            }
            if rotation_armed {
                self.timers.cancel(id);
                self.arm_rotation(id);
            }
        }
        Some(termination)
    }

    // Completions

    /// Handle a Command Complete for an opcode this manager issued
    pub fn on_command_complete(&mut self, opcode: OpCode, return_parameters: &[u8]) {
        let Some(context) = self.take_pending(opcode) else {
            warn!("[ADV] Unexpected completion for {:?}", opcode);
            return;
        };
        let mut r = ByteReader::new(return_parameters);
        let status = match r.u8() {
            Ok(status) => ErrorCode(status),
            Err(e) => {
                warn!("[ADV] Empty completion for {:?}: {:?}", opcode, e);
                return;
            }
        };
        if let Err(e) = self.complete(context, status, &mut r) {
            warn!("[ADV] Malformed completion for {:?}: {:?}", opcode, e);
        }
    }

    /// Handle a Command Status for an opcode this manager issued
    ///
    /// Advertising commands complete with Command Complete, so only a rejection is
    /// final here.
    pub fn on_command_status(&mut self, opcode: OpCode, status: ErrorCode) {
        if status.is_success() {
            trace!("[ADV] {:?} accepted", opcode);
            return;
        }
        let Some(context) = self.take_pending(opcode) else {
            warn!("[ADV] Unexpected status for {:?}", opcode);
            return;
        };
        let mut r = ByteReader::new(&[]);
        if let Err(e) = self.complete(context, status, &mut r) {
            warn!("[ADV] Rejection of {:?} not handled: {:?}", opcode, e);
        }
    }

    fn complete(
        &mut self,
        context: PendingContext,
        status: ErrorCode,
        r: &mut ByteReader<'_>,
    ) -> Result<(), Error> {
        match context {
            PendingContext::Status { id, notify } => self.on_status_complete(id, notify, status),
            PendingContext::ExtendedParameters(id) => {
                let selected = if status.is_success() {
                    Some(self.calibrate(r.i8()?))
                } else {
                    warn!("[ADV] Parameters of set {} failed: {:?}", id, status);
                    None
                };
                let Some(set) = self.set_mut(id) else {
                    return Ok(());
                };
                if let Some(tx_power) = selected {
                    set.tx_power = tx_power;
                }
                let (started, tx_power) = (set.started, set.tx_power);
                if started {
                    let status = AdvertisingStatus::from_error_code(status);
                    self.notify(|callbacks| {
                        callbacks.on_advertising_parameters_updated(id, tx_power, status);
                    });
                }
            }
            PendingContext::Enable {
                enable,
                sets,
                trigger_callbacks,
            } => self.on_enable_complete(enable, &sets, trigger_callbacks, status),
            PendingContext::PeriodicEnable { id, enable } => {
                let Some(set) = self.set_mut(id) else {
                    return Ok(());
                };
                if status.is_success() {
                    set.periodic_enabled = enable;
                }
                if set.started {
                    let status = AdvertisingStatus::from_error_code(status);
                    self.notify(|callbacks| {
                        callbacks.on_periodic_advertising_enabled(id, enable, status);
                    });
                }
            }
            PendingContext::RandomAddress { id, address } => {
                if status.is_success() {
                    if let Some(set) = self.set_mut(id) {
                        set.current_address = address;
                    }
                } else {
                    error!("[ADV] Random address of set {} failed: {:?}", id, status);
                    self.on_random_address_failed(id);
                }
            }
            PendingContext::TxPower => {
                if status.is_success() {
                    self.physical_tx_power = self.calibrate(r.i8()?);
                    debug!("[ADV] Physical channel tx power {}", self.physical_tx_power);
                } else {
                    warn!("[ADV] Reading tx power failed: {:?}", status);
                }
            }
        }
        Ok(())
    }

    /// A started set reports the failure as a parameter update; a starting set reports it
    /// once its enable completes
    fn on_random_address_failed(&mut self, id: u8) {
        let Some(set) = self.set(id) else {
            return;
        };
        if set.started {
            let tx_power = self.reported_tx_power(set);
            self.notify(|callbacks| {
                callbacks.on_advertising_parameters_updated(
                    id,
                    tx_power,
                    AdvertisingStatus::InternalError,
                );
            });
        } else if let Some(set) = self.set_mut(id) {
            set.address_failed = true;
        }
    }

    fn on_status_complete(&self, id: u8, notify: Option<Notify>, status: ErrorCode) {
        if !status.is_success() {
            warn!("[ADV] Command for set {} failed: {:?}", id, status);
        }
        let Some(notify) = notify else {
            return;
        };
        let Some(set) = self.set(id) else {
            return;
        };
        if !set.started {
            return;
        }
        let tx_power = self.reported_tx_power(set);
        let status = AdvertisingStatus::from_error_code(status);
        self.notify(|callbacks| match notify {
            Notify::ParametersUpdated => {
                callbacks.on_advertising_parameters_updated(id, tx_power, status);
            }
            Notify::DataSet => callbacks.on_advertising_data_set(id, status),
            Notify::ScanResponseSet => callbacks.on_scan_response_data_set(id, status),
            Notify::PeriodicParametersUpdated => {
                callbacks.on_periodic_advertising_parameters_updated(id, status);
            }
            Notify::PeriodicDataSet => callbacks.on_periodic_advertising_data_set(id, status),
        });
    }

    fn on_enable_complete(
        &mut self,
        enable: bool,
        sets: &[EnabledSet],
        trigger_callbacks: bool,
        status: ErrorCode,
    ) {
        if !status.is_success() {
            warn!("[ADV] Enable {} failed: {:?}", enable, status);
        }
        for record in sets {
            let id = record.advertising_handle;
            let Some(set) = self.set(id) else {
                continue;
            };
            if set.started {
                if trigger_callbacks {
                    self.notify(|callbacks| callbacks.on_advertising_enabled(id, enable, status));
                }
                continue;
            }
            if !enable {
                continue;
            }
            let reg_id = set.reg_id;
            let tx_power = self.reported_tx_power(set);
            let address_failed = set.address_failed;
            if let Some(set) = self.set_mut(id) {
                set.started = status.is_success() && !address_failed;
                set.address_failed = false;
            }
            if !status.is_success() || address_failed {
                self.enabled[usize::from(id)] = EnabledSet::DISABLED;
            }
            if status.is_success() && address_failed {
                warn!("[ADV] Set {} has no valid address, stopping it", id);
                self.issue_enable(false, &[*record], false);
            }
            info!("[ADV] Set {} started: {:?}", id, status);
            let status = if address_failed {
                AdvertisingStatus::InternalError
            } else {
                AdvertisingStatus::from_error_code(status)
            };
            self.notify(|callbacks| {
                callbacks.on_advertising_set_started(reg_id, id, tx_power, status);
            });
        }
    }

    // Helpers

    /// Send `command`, failing it through [`Self::complete`] when it cannot be queued
    fn issue(&mut self, command: Command, context: PendingContext) {
        let opcode = command.opcode();
        if self
            .pending
            .push(PendingCommand {
                opcode,
                context: context.clone(),
            })
            .is_err()
        {
            error!("[ADV] Too many pending commands, failing {:?}", opcode);
            self.fail(context, opcode);
            return;
        }
        if let Err(e) = self.transport.send_command(&command) {
            error!("[ADV] Transport refused {:?}: {:?}", opcode, e);
            self.pending.pop();
            self.fail(context, opcode);
        }
    }

    fn fail(&mut self, context: PendingContext, opcode: OpCode) {
        let mut r = ByteReader::new(&[]);
        if let Err(e) = self.complete(context, ErrorCode::MEMORY_CAPACITY_EXCEEDED, &mut r) {
            warn!("[ADV] Failing {:?} not handled: {:?}", opcode, e);
        }
    }

    fn take_pending(&mut self, opcode: OpCode) -> Option<PendingContext> {
        let index = self
            .pending
            .iter()
            .position(|pending| pending.opcode == opcode)?;
        Some(self.pending.remove(index).context)
    }

    fn issue_enable(&mut self, enable: bool, sets: &[EnabledSet], trigger_callbacks: bool) {
        if sets.is_empty() {
            return;
        }
        let backend = self.backend;
        if backend.batches_enable() {
            self.issue(
                backend.enable(enable, sets),
                PendingContext::Enable {
                    enable,
                    sets: sets.iter().copied().collect(),
                    trigger_callbacks,
                },
            );
            return;
        }
        for record in sets {
            let mut single = Vec::new();
            single.push(*record).ok();
            self.issue(
                backend.enable(enable, core::slice::from_ref(record)),
                PendingContext::Enable {
                    enable,
                    sets: single,
                    trigger_callbacks,
                },
            );
        }
    }

    fn enabled_records(&self) -> Vec<EnabledSet, MAX_ADVERTISING_SETS> {
        self.enabled
            .iter()
            .filter(|record| record.is_enabled())
            .copied()
            .collect()
    }

    fn reported_tx_power(&self, set: &AdvertisingSet) -> i8 {
        if self.backend.selects_tx_power() {
            set.tx_power
        } else {
            self.physical_tx_power
        }
    }

    /// Apply the path loss compensation when the result stays in range
    fn calibrate(&self, tx_power: i8) -> i8 {
        let compensated = i16::from(tx_power) + i16::from(self.options.tx_path_loss_compensation);
        if (ADVERTISING_TX_POWER_MIN..=ADVERTISING_TX_POWER_MAX).contains(&compensated) {
            i8::try_from(compensated).unwrap_or(tx_power)
        } else {
            warn!("[ADV] Compensated tx power {} out of range", compensated);
            tx_power
        }
    }

    fn new_advertiser_address(
        &self,
        address_type: AdvertiserAddressType,
        policy: AddressPolicy,
    ) -> AddressWithType {
        match address_type {
            AdvertiserAddressType::Public if policy == AddressPolicy::UseStaticAddress => {
                self.address_manager.initiator_address()
            }
            AdvertiserAddressType::Public => AddressWithType::public(self.controller.public_address),
            _ if self.backend.shares_initiator_address() => {
                self.address_manager.initiator_address()
            }
            AdvertiserAddressType::ResolvableRandom => self.address_manager.new_resolvable_address(),
            AdvertiserAddressType::NonResolvableRandom => {
                self.address_manager.new_non_resolvable_address()
            }
        }
    }

    fn allocate_id(&self) -> Option<u8> {
        let first = self.backend.first_id();
        let instances = self.backend.instances(&self.controller);
        (first..instances).find(|id| self.set(*id).is_none())
    }

    fn insert_set(&mut self, id: u8, reg_id: u8) {
        if !self.address_manager_registered {
            self.address_manager.register();
            self.address_manager_registered = true;
        }
        if self.sets.push(AdvertisingSet::new(id, reg_id)).is_err() {
            error!("[ADV] Set table full");
        }
    }

    fn release(&mut self, id: u8) {
        self.sets.retain(|set| set.id != id);
        self.enabled[usize::from(id)] = EnabledSet::DISABLED;
        if self.sets.is_empty() && self.address_manager_registered {
            self.address_manager.unregister();
            self.address_manager_registered = false;
            self.paused = false;
        }
    }

    fn set(&self, id: u8) -> Option<&AdvertisingSet> {
        self.sets.iter().find(|set| set.id == id)
    }

    fn set_mut(&mut self, id: u8) -> Option<&mut AdvertisingSet> {
        self.sets.iter_mut().find(|set| set.id == id)
    }

    fn notify(&self, f: impl FnOnce(&'d dyn AdvertisingCallbacks)) {
        match self.callbacks {
            Some(callbacks) => f(callbacks),
            None => debug!("[ADV] No advertising callbacks registered"),
        }
    }
}
