//! `Linkbird` API
//!
//! Async entry points for application code. Every call is marshalled onto the host
//! runner (see [`crate::processor::Host::run`]) through the request channel of a
//! [`HostResources`]; the runner is the only place the managers are touched.
//!
//! Calls that need a result, like callback (un)registration or starting a connection,
//! wait for the runner's response. The rest return as soon as the request is queued and
//! report their outcome through the registered callbacks.
//!
//! # Usage
//!
//! ```rust,ignore
//! use linkbird::{Address, api::HostClient};
//!
//! let client = HostClient::new(&RESOURCES);
//! client.register_connection_callbacks(&CALLBACKS).await;
//! client.create_connection(Address::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])).await?;
//! ```

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::{
    Address, AddressWithType, Error,
    acl::{
        ConnectionCallbacks, ConnectionManagementCallbacks, LeConnectionCallbacks,
        LeConnectionManagementCallbacks, LeConnectionParameters, LinkId,
    },
    advertising::{
        AdvertisingCallbacks, AdvertisingConfig, AdvertisingStatus, GapPayload,
        PeriodicAdvertisingParameters,
    },
    hci::{ErrorCode, FlowSpec, QosSpec, Role},
    processor::HostResources,
};

/// Per-link operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum LinkOperation {
    SwitchRole(Role),
    ReadLinkPolicySettings,
    WriteLinkPolicySettings(u16),
    AuthenticationRequested,
    HoldMode {
        max_interval: u16,
        min_interval: u16,
    },
    SniffMode {
        max_interval: u16,
        min_interval: u16,
        attempt: u16,
        timeout: u16,
    },
    ExitSniffMode,
    ParkState {
        beacon_max_interval: u16,
        beacon_min_interval: u16,
    },
    ExitParkState,
    QosSetup(QosSpec),
    FlowSpecification(FlowSpec),
    Flush,
    RoleDiscovery,
    ReadRssi,
    ReadClock {
        piconet_clock: bool,
    },
    ReadClockOffset,
    ReadLinkQuality,
    ReadAfhChannelMap,
    ReadAutomaticFlushTimeout,
    WriteAutomaticFlushTimeout(u16),
    ReadTransmitPowerLevel {
        maximum: bool,
    },
    ReadLinkSupervisionTimeout,
    WriteLinkSupervisionTimeout(u16),
    ReadFailedContactCounter,
    ResetFailedContactCounter,
    SniffSubrating {
        maximum_latency: u16,
        minimum_remote_timeout: u16,
        minimum_local_timeout: u16,
    },
    ReadRemoteVersionInformation,
    ConnectionUpdate(LeConnectionParameters),
    Disconnect(ErrorCode),
}

/// Requests the runner accepts
#[allow(missing_docs)]
pub enum Request<'d> {
    RegisterConnectionCallbacks(&'d dyn ConnectionCallbacks),
    UnregisterConnectionCallbacks,
    RegisterLeConnectionCallbacks(&'d dyn LeConnectionCallbacks),
    UnregisterLeConnectionCallbacks,
    RegisterConnectionManagementCallbacks(LinkId, &'d dyn ConnectionManagementCallbacks),
    RegisterLeConnectionManagementCallbacks(LinkId, &'d dyn LeConnectionManagementCallbacks),
    RegisterAdvertisingCallbacks(&'d dyn AdvertisingCallbacks),
    UnregisterAdvertisingCallbacks,
    CreateConnection(Address),
    CancelConnect(Address),
    CreateLeConnection {
        peer: AddressWithType,
        use_accept_list: bool,
    },
    CancelLeConnect(AddressWithType),
    Link(LinkId, LinkOperation),
    RegisterAdvertiser,
    StartAdvertising {
        advertiser_id: u8,
        config: AdvertisingConfig,
        duration: u16,
    },
    CreateAdvertiser {
        reg_id: u8,
        config: AdvertisingConfig,
    },
    CreateExtendedAdvertiser {
        reg_id: u8,
        config: AdvertisingConfig,
        duration: u16,
        max_extended_advertising_events: u8,
    },
    SetParameters {
        advertiser_id: u8,
        config: AdvertisingConfig,
    },
    SetData {
        advertiser_id: u8,
        scan_response: bool,
        data: GapPayload,
    },
    SetEncryptedData {
        advertiser_id: u8,
        scan_response: bool,
        data: GapPayload,
    },
    EnableAdvertiser {
        advertiser_id: u8,
        enable: bool,
        duration: u16,
        max_extended_advertising_events: u8,
    },
    SetPeriodicParameters {
        advertiser_id: u8,
        parameters: PeriodicAdvertisingParameters,
    },
    SetPeriodicData {
        advertiser_id: u8,
        data: GapPayload,
    },
    EnablePeriodicAdvertising {
        advertiser_id: u8,
        enable: bool,
        include_adi: bool,
    },
    GetOwnAddress(u8),
    RemoveAdvertiser(u8),
    ResetAdvertiser(u8),
    ReadKeyMaterial,
    PauseAdvertising,
    ResumeAdvertising,
    IrkChanged,
    RotationTimerFired(u8),
    Shutdown,
}

/// Responses to the requests that wait for one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response {
    /// The request was applied
    Ack,
    /// Outcome of a request that can fail
    Done(Result<(), Error>),
    /// Outcome of advertiser registration
    AdvertiserId(Result<u8, AdvertisingStatus>),
}

/// Application-side handle on a running host
pub struct HostClient<'a, 'd, M: RawMutex> {
    resources: &'a HostResources<'d, M>,
}

impl<M: RawMutex> Clone for HostClient<'_, '_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: RawMutex> Copy for HostClient<'_, '_, M> {}

impl<'a, 'd, M: RawMutex> HostClient<'a, 'd, M> {
    /// Create a client talking to the runner that owns `resources`
    #[must_use]
    pub fn new(resources: &'a HostResources<'d, M>) -> Self {
        Self { resources }
    }

    async fn send(&self, request: Request<'d>) {
        self.resources.requests.send(request).await;
    }

    async fn call(&self, request: Request<'d>) -> Response {
        self.send(request).await;
        self.resources.responses.receive().await
    }

    async fn acknowledged(&self, request: Request<'d>) {
        match self.call(request).await {
            Response::Ack => {}
            other => warn!("[HOST] Unexpected response {:?}", other),
        }
    }

    async fn done(&self, request: Request<'d>) -> Result<(), Error> {
        match self.call(request).await {
            Response::Done(result) => result,
            _ => Err(Error::InvalidState),
        }
    }

    // Connection lifecycle

    /// Register classic lifecycle callbacks, returning once the runner has them
    pub async fn register_connection_callbacks(&self, callbacks: &'d dyn ConnectionCallbacks) {
        self.acknowledged(Request::RegisterConnectionCallbacks(callbacks))
            .await;
    }

    /// Drop classic lifecycle callbacks, returning once the runner no longer uses them
    ///
    /// The runner panics if none are registered.
    pub async fn unregister_connection_callbacks(&self) {
        self.acknowledged(Request::UnregisterConnectionCallbacks)
            .await;
    }

    /// Register LE lifecycle callbacks, returning once the runner has them
    pub async fn register_le_connection_callbacks(&self, callbacks: &'d dyn LeConnectionCallbacks) {
        self.acknowledged(Request::RegisterLeConnectionCallbacks(callbacks))
            .await;
    }

    /// Drop LE lifecycle callbacks, returning once the runner no longer uses them
    pub async fn unregister_le_connection_callbacks(&self) {
        self.acknowledged(Request::UnregisterLeConnectionCallbacks)
            .await;
    }

    /// Attach per-link callbacks to a classic link
    pub async fn register_connection_management_callbacks(
        &self,
        link: LinkId,
        callbacks: &'d dyn ConnectionManagementCallbacks,
    ) {
        self.acknowledged(Request::RegisterConnectionManagementCallbacks(
            link, callbacks,
        ))
        .await;
    }

    /// Attach per-link callbacks to an LE link
    pub async fn register_le_connection_management_callbacks(
        &self,
        link: LinkId,
        callbacks: &'d dyn LeConnectionManagementCallbacks,
    ) {
        self.acknowledged(Request::RegisterLeConnectionManagementCallbacks(
            link, callbacks,
        ))
        .await;
    }

    /// Page a classic peer
    ///
    /// # Errors
    /// * [`Error::NotRegistered`] without classic callbacks
    /// * [`Error::BufferFull`] when too many connections are queued
    pub async fn create_connection(&self, peer: Address) -> Result<(), Error> {
        self.done(Request::CreateConnection(peer)).await
    }

    /// Stop a classic connection attempt
    pub async fn cancel_connect(&self, peer: Address) {
        self.send(Request::CancelConnect(peer)).await;
    }

    /// Connect to an LE peer
    ///
    /// # Errors
    /// * [`Error::NotRegistered`] without LE callbacks
    /// * [`Error::BufferFull`] when too many connections are requested
    pub async fn create_le_connection(
        &self,
        peer: AddressWithType,
        use_accept_list: bool,
    ) -> Result<(), Error> {
        self.done(Request::CreateLeConnection {
            peer,
            use_accept_list,
        })
        .await
    }

    /// Stop an LE connection attempt
    pub async fn cancel_le_connect(&self, peer: AddressWithType) {
        self.send(Request::CancelLeConnect(peer)).await;
    }

    /// Run an operation on an open link; the result arrives on its management callbacks
    pub async fn link(&self, link: LinkId, operation: LinkOperation) {
        self.send(Request::Link(link, operation)).await;
    }

    /// Tear a link down
    pub async fn disconnect(&self, link: LinkId, reason: ErrorCode) {
        self.link(link, LinkOperation::Disconnect(reason)).await;
    }

    /// Forget every link, used when the controller goes away
    pub async fn shutdown(&self) {
        self.acknowledged(Request::Shutdown).await;
    }

    // Advertising

    /// Register advertising callbacks, returning once the runner has them
    pub async fn register_advertising_callbacks(&self, callbacks: &'d dyn AdvertisingCallbacks) {
        self.acknowledged(Request::RegisterAdvertisingCallbacks(callbacks))
            .await;
    }

    /// Drop advertising callbacks, returning once the runner no longer uses them
    pub async fn unregister_advertising_callbacks(&self) {
        self.acknowledged(Request::UnregisterAdvertisingCallbacks)
            .await;
    }

    /// Reserve an advertiser id
    ///
    /// # Errors
    /// Returns [`AdvertisingStatus::TooManyAdvertisers`] when every id is taken
    pub async fn register_advertiser(&self) -> Result<u8, AdvertisingStatus> {
        match self.call(Request::RegisterAdvertiser).await {
            Response::AdvertiserId(result) => result,
            _ => Err(AdvertisingStatus::InternalError),
        }
    }

    /// Start a registered advertiser
    pub async fn start_advertising(&self, advertiser_id: u8, config: AdvertisingConfig, duration: u16) {
        self.send(Request::StartAdvertising {
            advertiser_id,
            config,
            duration,
        })
        .await;
    }

    /// Allocate and start a set; the outcome arrives on `on_advertising_set_started`
    pub async fn create_advertiser(&self, reg_id: u8, config: AdvertisingConfig) {
        self.send(Request::CreateAdvertiser { reg_id, config }).await;
    }

    /// Allocate and start an extended set with optional limits
    pub async fn create_extended_advertiser(
        &self,
        reg_id: u8,
        config: AdvertisingConfig,
        duration: u16,
        max_extended_advertising_events: u8,
    ) {
        self.send(Request::CreateExtendedAdvertiser {
            reg_id,
            config,
            duration,
            max_extended_advertising_events,
        })
        .await;
    }

    /// Write new parameters for a set
    pub async fn set_parameters(&self, advertiser_id: u8, config: AdvertisingConfig) {
        self.send(Request::SetParameters {
            advertiser_id,
            config,
        })
        .await;
    }

    /// Replace the advertising data or scan response of a set
    pub async fn set_data(&self, advertiser_id: u8, scan_response: bool, data: GapPayload) {
        self.send(Request::SetData {
            advertiser_id,
            scan_response,
            data,
        })
        .await;
    }

    /// Replace the elements sealed into the advertising data or scan response
    pub async fn set_encrypted_data(&self, advertiser_id: u8, scan_response: bool, data: GapPayload) {
        self.send(Request::SetEncryptedData {
            advertiser_id,
            scan_response,
            data,
        })
        .await;
    }

    /// Enable or disable a set
    pub async fn enable_advertiser(
        &self,
        advertiser_id: u8,
        enable: bool,
        duration: u16,
        max_extended_advertising_events: u8,
    ) {
        self.send(Request::EnableAdvertiser {
            advertiser_id,
            enable,
            duration,
            max_extended_advertising_events,
        })
        .await;
    }

    /// Write the periodic train parameters of a set
    pub async fn set_periodic_parameters(
        &self,
        advertiser_id: u8,
        parameters: PeriodicAdvertisingParameters,
    ) {
        self.send(Request::SetPeriodicParameters {
            advertiser_id,
            parameters,
        })
        .await;
    }

    /// Replace the periodic data of a set
    pub async fn set_periodic_data(&self, advertiser_id: u8, data: GapPayload) {
        self.send(Request::SetPeriodicData {
            advertiser_id,
            data,
        })
        .await;
    }

    /// Start or stop the periodic train of a set
    pub async fn enable_periodic_advertising(&self, advertiser_id: u8, enable: bool, include_adi: bool) {
        self.send(Request::EnablePeriodicAdvertising {
            advertiser_id,
            enable,
            include_adi,
        })
        .await;
    }

    /// Ask for the address a set advertises with
    pub async fn get_own_address(&self, advertiser_id: u8) {
        self.send(Request::GetOwnAddress(advertiser_id)).await;
    }

    /// Stop a set and free its id
    pub async fn remove_advertiser(&self, advertiser_id: u8) {
        self.send(Request::RemoveAdvertiser(advertiser_id)).await;
    }

    /// Stop a set and clear its state, keeping the id
    pub async fn reset_advertiser(&self, advertiser_id: u8) {
        self.send(Request::ResetAdvertiser(advertiser_id)).await;
    }

    /// Ask for the encrypted advertising key material
    pub async fn read_key_material(&self) {
        self.send(Request::ReadKeyMaterial).await;
    }

    // Privacy hooks for the address manager

    /// Disable every set while the controller's addresses change
    pub async fn pause_advertising(&self) {
        self.send(Request::PauseAdvertising).await;
    }

    /// Re-enable the sets disabled by [`HostClient::pause_advertising`]
    pub async fn resume_advertising(&self) {
        self.send(Request::ResumeAdvertising).await;
    }

    /// The local IRK changed
    pub async fn irk_changed(&self) {
        self.send(Request::IrkChanged).await;
    }

    /// The rotation timer of `advertiser_id` expired
    pub async fn rotation_timer_fired(&self, advertiser_id: u8) {
        self.send(Request::RotationTimerFired(advertiser_id)).await;
    }
}
