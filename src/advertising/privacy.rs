//! Address privacy collaborators and the own-address precedence rule

use crate::{AddressWithType, advertising::config::AdvertiserAddressType};

/// Host privacy policy set on the address manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressPolicy {
    /// Nothing configured yet, treated like a public policy
    #[default]
    PolicyNotSet,
    /// Advertise with the public address
    UsePublicAddress,
    /// Advertise with the static random address
    UseStaticAddress,
    /// Rotate non-resolvable private addresses
    UseNonResolvableAddress,
    /// Rotate resolvable private addresses
    UseResolvableAddress,
}

impl AddressPolicy {
    fn is_identity(self) -> bool {
        matches!(
            self,
            Self::PolicyNotSet | Self::UsePublicAddress | Self::UseStaticAddress
        )
    }
}

/// LE address manager owned by the privacy layer
///
/// Registration, pause and resume are acknowledged synchronously: the manager calls
/// [`LeAddressManager::ack_pause`] once every set is disabled and
/// [`LeAddressManager::ack_resume`] once they are enabled again.
pub trait LeAddressManager {
    /// Current policy
    fn address_policy(&self) -> AddressPolicy;

    /// The advertising manager wants pause, resume and IRK change notifications
    fn register(&self);

    /// Notifications are no longer needed
    fn unregister(&self);

    /// Every set is disabled
    fn ack_pause(&self);

    /// Every set is enabled again
    fn ack_resume(&self);

    /// Address the initiator and legacy advertising currently use
    fn initiator_address(&self) -> AddressWithType;

    /// A fresh resolvable private address
    fn new_resolvable_address(&self) -> AddressWithType;

    /// A fresh non-resolvable private address
    fn new_non_resolvable_address(&self) -> AddressWithType;

    /// Milliseconds until the next rotation
    fn next_rotation_interval_ms(&self) -> u32;
}

/// One-shot timers keyed by advertiser id
///
/// When a timer expires the platform calls back into the host with the id, see
/// `LeAdvertisingManager::on_rotation_timer`.
pub trait RotationTimer {
    /// Arm (or re-arm) the timer of `advertiser_id`
    fn arm(&self, advertiser_id: u8, delay_ms: u32);

    /// Disarm the timer of `advertiser_id`; a no-op when it is not armed
    fn cancel(&self, advertiser_id: u8);
}

/// Own address type a set ends up with
///
/// Connectable sets follow the policy strictly. Non-connectable sets under an identity
/// policy keep what was asked for, except that an RPA becomes an NRPA.
#[must_use]
pub fn resolve_address_type(
    requested: AdvertiserAddressType,
    policy: AddressPolicy,
    connectable: bool,
) -> AdvertiserAddressType {
    use AdvertiserAddressType::{NonResolvableRandom, Public, ResolvableRandom};

    if !connectable && policy.is_identity() {
        return match requested {
            ResolvableRandom => NonResolvableRandom,
            other => other,
        };
    }
    match (policy, requested) {
        (_, Public) => Public,
        (p, _) if p.is_identity() => Public,
        (AddressPolicy::UseNonResolvableAddress, _) => NonResolvableRandom,
        (_, requested) => requested,
    }
}
