//! HCI status and error codes
//!
//! Status bytes reported by the controller are passed through verbatim; only the
//! values the host reacts to get a name.

use core::fmt;

/// An HCI status byte (Core Vol 1, Part F)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCode(pub u8);

impl ErrorCode {
    /// Success
    pub const SUCCESS: Self = Self(0x00);
    /// Unknown HCI Command
    pub const UNKNOWN_HCI_COMMAND: Self = Self(0x01);
    /// Unknown Connection Identifier
    pub const UNKNOWN_CONNECTION: Self = Self(0x02);
    /// Hardware Failure
    pub const HARDWARE_FAILURE: Self = Self(0x03);
    /// Page Timeout
    pub const PAGE_TIMEOUT: Self = Self(0x04);
    /// Authentication Failure
    pub const AUTHENTICATION_FAILURE: Self = Self(0x05);
    /// PIN or Key Missing
    pub const PIN_OR_KEY_MISSING: Self = Self(0x06);
    /// Memory Capacity Exceeded
    pub const MEMORY_CAPACITY_EXCEEDED: Self = Self(0x07);
    /// Connection Timeout
    pub const CONNECTION_TIMEOUT: Self = Self(0x08);
    /// Connection Limit Exceeded
    pub const CONNECTION_LIMIT_EXCEEDED: Self = Self(0x09);
    /// ACL Connection Already Exists
    pub const CONNECTION_ALREADY_EXISTS: Self = Self(0x0B);
    /// Command Disallowed
    pub const COMMAND_DISALLOWED: Self = Self(0x0C);
    /// Connection Rejected due to Limited Resources
    pub const CONNECTION_REJECTED_LIMITED_RESOURCES: Self = Self(0x0D);
    /// Invalid HCI Command Parameters
    pub const INVALID_HCI_COMMAND_PARAMETERS: Self = Self(0x12);
    /// Remote User Terminated Connection
    pub const REMOTE_USER_TERMINATED_CONNECTION: Self = Self(0x13);
    /// Remote Device Terminated Connection due to Low Resources
    pub const REMOTE_DEVICE_TERMINATED_CONNECTION_LOW_RESOURCES: Self = Self(0x14);
    /// Connection Terminated by Local Host
    pub const CONNECTION_TERMINATED_BY_LOCAL_HOST: Self = Self(0x16);
    /// Unsupported Remote Feature
    pub const UNSUPPORTED_REMOTE_FEATURE: Self = Self(0x1A);
    /// Unspecified Error
    pub const UNSPECIFIED_ERROR: Self = Self(0x1F);
    /// Role Change Not Allowed
    pub const ROLE_CHANGE_NOT_ALLOWED: Self = Self(0x21);
    /// Link Layer Collision
    pub const LINK_LAYER_COLLISION: Self = Self(0x23);
    /// Advertising Timeout
    pub const ADVERTISING_TIMEOUT: Self = Self(0x3C);
    /// Connection Failed to be Established
    pub const CONNECTION_FAILED_ESTABLISHMENT: Self = Self(0x3E);
    /// Limit Reached
    pub const LIMIT_REACHED: Self = Self(0x43);
    /// Operation Cancelled by Host
    pub const OPERATION_CANCELLED_BY_HOST: Self = Self(0x44);

    /// Whether this is [`ErrorCode::SUCCESS`]
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Get the raw status byte
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Convert to a `Result`, keeping the code on failure
    ///
    /// # Errors
    /// Returns `Err(self)` for any non-success status
    pub const fn to_result(self) -> Result<(), ErrorCode> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }
}

impl From<u8> for ErrorCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<bt_hci::param::Status> for ErrorCode {
    fn from(status: bt_hci::param::Status) -> Self {
        Self(status.into_inner())
    }
}

impl From<ErrorCode> for bt_hci::param::Status {
    fn from(code: ErrorCode) -> Self {
        bt_hci::param::Status::new(code.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}
