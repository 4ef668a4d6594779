//! `Linkbird` Constants
//!
//! Capacities of the fixed-size tables used throughout the library, plus the
//! Bluetooth-specific default parameters the managers put on the wire.

/// Maximum number of simultaneous ACL connections (classic and LE combined)
pub const MAX_CONNECTIONS: usize = 8;

/// Maximum number of classic connection requests waiting behind the outstanding page
pub const MAX_PENDING_CONNECTIONS: usize = 8;

/// Maximum number of LE connection requests tracked by the initiator
pub const MAX_PENDING_LE_CONNECTIONS: usize = 8;

/// Number of filter accept list entries the host will manage
pub const FILTER_ACCEPT_LIST_SIZE: usize = 8;

/// Maximum number of commands awaiting a completion per manager
pub const MAX_PENDING_COMMANDS: usize = 32;

/// Maximum number of commands buffered while the controller has no command credit
pub const COMMAND_QUEUE_DEPTH: usize = 32;

/// Maximum number of outbound ACL packets buffered for the transport
pub const ACL_PACKET_QUEUE_DEPTH: usize = 8;

/// Frames buffered per connection and direction
pub const FRAME_QUEUE_DEPTH: usize = 4;

/// Largest L2CAP frame (basic header included) the host buffers
pub const MAX_FRAME_SIZE: usize = 1024;

/// Largest ACL data payload in a single HCI ACL packet
pub const MAX_ACL_PACKET_SIZE: usize = 1024;

/// Size of the ACL data packet header
pub const ACL_HEADER_SIZE: usize = 4;

/// Size of a buffer holding one encoded ACL packet (header + payload)
pub const ACL_PACKET_BUFFER_SIZE: usize = ACL_HEADER_SIZE + MAX_ACL_PACKET_SIZE;

/// Size of the L2CAP basic header (length + channel id)
pub const L2CAP_BASIC_HEADER_SIZE: usize = 4;

/// Number of completed-packet entries accepted in one event
pub const MAX_COMPLETED_PACKET_ENTRIES: usize = 8;

/// Size of the buffer holding an encoded HCI command (header + parameters)
pub const COMMAND_BUFFER_SIZE: usize = 258;

/// Size of the buffer holding a raw HCI event (header + parameters)
pub const EVENT_BUFFER_SIZE: usize = 257;

/// Maximum number of return parameter bytes kept from a Command Complete event
pub const MAX_RETURN_PARAMETERS: usize = 255;

/// Depth of the API request and response channels
pub const REQUEST_QUEUE_DEPTH: usize = 4;

/// Depth of the controller-to-host packet channel
pub const INBOUND_QUEUE_DEPTH: usize = 8;

/// Depth of the host-to-controller packet channel
pub const OUTBOUND_QUEUE_DEPTH: usize = 8;

/// Standard packet types for ACL connections (DM1, DM3, DM5, DH1, DH3, DH5)
pub const DEFAULT_PACKET_TYPES: u16 = 0xCC18;

/// Page scan repetition mode R1
pub const PAGE_SCAN_REPETITION_MODE_R1: u8 = 0x01;

/// No clock offset specified
pub const NO_CLOCK_OFFSET: u16 = 0x0000;

/// LE scan interval used while no other LE link is pending or active (60 ms)
pub const LE_SCAN_INTERVAL_FAST: u16 = 0x0060;

/// LE scan window used while no other LE link is pending or active (30 ms)
pub const LE_SCAN_WINDOW_FAST: u16 = 0x0030;

/// LE scan interval used while other LE links compete for the radio (1.28 s)
pub const LE_SCAN_INTERVAL_SLOW: u16 = 0x0800;

/// LE scan window used while other LE links compete for the radio (30 ms)
pub const LE_SCAN_WINDOW_SLOW: u16 = 0x0030;

/// Default minimum LE connection interval (30 ms)
pub const LE_CONNECTION_INTERVAL_MIN: u16 = 0x0018;

/// Default maximum LE connection interval (50 ms)
pub const LE_CONNECTION_INTERVAL_MAX: u16 = 0x0028;

/// Default LE peripheral latency
pub const LE_CONNECTION_LATENCY: u16 = 0x0000;

/// Default LE supervision timeout (5 s)
pub const LE_SUPERVISION_TIMEOUT: u16 = 0x01F4;

/// Maximum number of advertising sets tracked by the host
pub const MAX_ADVERTISING_SETS: usize = 8;

/// Maximum number of GAP data elements per payload
pub const MAX_GAP_ELEMENTS: usize = 8;

/// Capacity of a single GAP data element payload.
///
/// One more than the largest legal payload so oversized elements can be represented
/// and rejected.
pub const GAP_DATA_CAPACITY: usize = 254;

/// Largest serialized GAP data element (length + type + payload)
pub const MAX_GAP_DATA_LENGTH: usize = 255;

/// Largest advertising payload defined by the Core specification
pub const MAX_ADVERTISING_DATA_LENGTH: usize = 1650;

/// Largest payload allowed in a legacy advertising PDU
pub const MAX_LEGACY_ADVERTISING_DATA_LENGTH: usize = 31;

/// Largest fragment carried by one extended advertising data command
pub const MAX_ADVERTISING_FRAGMENT_LENGTH: usize = 251;

/// Largest fragment carried by one periodic advertising data command
pub const MAX_PERIODIC_FRAGMENT_LENGTH: usize = 252;

/// Size of the Flags element the manager prepends (length + type + value)
pub const FLAGS_ELEMENT_LENGTH: usize = 3;

/// Advertising set id / handle meaning "no set"
pub const INVALID_ADVERTISER_ID: u8 = 0xFF;

/// Lowest calibrated advertising tx power in dBm
pub const ADVERTISING_TX_POWER_MIN: i16 = -127;

/// Highest calibrated advertising tx power in dBm
pub const ADVERTISING_TX_POWER_MAX: i16 = 20;

/// Advertising SIDs are four bits wide
pub const ADVERTISING_SID_MODULUS: u8 = 16;

/// Associated data fed to the encrypted advertising AEAD
pub const ENCRYPTED_DATA_AAD: [u8; 1] = [0xEA];

/// Length of the encrypted advertising randomizer
pub const RANDOMIZER_LENGTH: usize = 5;

/// Length of the encrypted advertising MIC
pub const ENCRYPTED_DATA_MIC_LENGTH: usize = 4;

/// Key-value store entry holding the encrypted advertising key material
pub const KEY_MATERIAL_NAME: &str = "LeEncryptedAdvertisingKeyMaterial";
