//! Registrant-facing advertising notifications

use crate::{AddressWithType, advertising::encryption::KeyMaterial, hci::ErrorCode};

/// Outcome reported to the advertising registrant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AdvertisingStatus {
    /// The operation succeeded
    Success = 0x00,
    /// The payload does not fit the controller's limits
    DataTooLarge = 0x01,
    /// No advertising instance is free
    TooManyAdvertisers = 0x02,
    /// The set is already advertising
    AlreadyStarted = 0x03,
    /// The controller rejected a command or the request was malformed
    InternalError = 0x04,
    /// The selected advertising API cannot do this
    FeatureUnsupported = 0x05,
}

impl AdvertisingStatus {
    /// Map a controller status onto a registrant status
    #[must_use]
    pub fn from_error_code(status: ErrorCode) -> Self {
        if status.is_success() {
            Self::Success
        } else {
            Self::InternalError
        }
    }
}

/// Notifications for advertising sets
///
/// `reg_id` is the caller's registration tag passed to the create call. Every other
/// method is keyed by the advertiser id the manager allocated.
#[allow(unused_variables)]
pub trait AdvertisingCallbacks {
    /// A create call finished; `advertiser_id` is 0xFF when no set was allocated
    fn on_advertising_set_started(
        &self,
        reg_id: u8,
        advertiser_id: u8,
        tx_power: i8,
        status: AdvertisingStatus,
    );

    /// A started set was enabled or disabled
    fn on_advertising_enabled(&self, advertiser_id: u8, enable: bool, status: ErrorCode);

    /// Advertising data was written
    fn on_advertising_data_set(&self, advertiser_id: u8, status: AdvertisingStatus);

    /// Scan response data was written
    fn on_scan_response_data_set(&self, advertiser_id: u8, status: AdvertisingStatus);

    /// Parameters were written; `tx_power` is the power the controller selected
    fn on_advertising_parameters_updated(
        &self,
        advertiser_id: u8,
        tx_power: i8,
        status: AdvertisingStatus,
    );

    /// Periodic parameters were written
    fn on_periodic_advertising_parameters_updated(
        &self,
        advertiser_id: u8,
        status: AdvertisingStatus,
    ) {
    }

    /// Periodic data was written
    fn on_periodic_advertising_data_set(&self, advertiser_id: u8, status: AdvertisingStatus) {}

    /// Periodic advertising was enabled or disabled
    fn on_periodic_advertising_enabled(
        &self,
        advertiser_id: u8,
        enable: bool,
        status: AdvertisingStatus,
    ) {
    }

    /// Answer to `get_own_address`
    fn on_own_address_read(&self, advertiser_id: u8, address: AddressWithType);

    /// A scanner sent a scan request to a set with notifications enabled
    fn on_scan_request_received(&self, advertiser_id: u8, scanner: AddressWithType) {}

    /// Encrypted advertising key material was loaded or generated
    fn on_enc_key_material(&self, key_material: &KeyMaterial) {}
}
