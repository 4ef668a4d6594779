//! HCI command opcodes used by the ACL and advertising managers

use core::fmt;

/// A 16-bit HCI opcode (OGF in the upper six bits, OCF in the lower ten)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OpCode(pub u16);

impl OpCode {
    /// Build an opcode from its group and command fields
    #[must_use]
    pub const fn new(ogf: u8, ocf: u16) -> Self {
        Self(((ogf as u16) << 10) | (ocf & 0x03FF))
    }

    /// Opcode group field
    #[must_use]
    pub const fn ogf(self) -> u8 {
        (self.0 >> 10) as u8
    }

    /// Opcode command field
    #[must_use]
    pub const fn ocf(self) -> u16 {
        self.0 & 0x03FF
    }

    /// Raw opcode value
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    // Link control
    /// `HCI_Create_Connection`
    pub const CREATE_CONNECTION: Self = Self(0x0405);
    /// `HCI_Disconnect`
    pub const DISCONNECT: Self = Self(0x0406);
    /// `HCI_Create_Connection_Cancel`
    pub const CREATE_CONNECTION_CANCEL: Self = Self(0x0408);
    /// `HCI_Accept_Connection_Request`
    pub const ACCEPT_CONNECTION_REQUEST: Self = Self(0x0409);
    /// `HCI_Reject_Connection_Request`
    pub const REJECT_CONNECTION_REQUEST: Self = Self(0x040A);
    /// `HCI_Authentication_Requested`
    pub const AUTHENTICATION_REQUESTED: Self = Self(0x0411);
    /// `HCI_Read_Remote_Version_Information`
    pub const READ_REMOTE_VERSION_INFORMATION: Self = Self(0x041D);
    /// `HCI_Read_Clock_Offset`
    pub const READ_CLOCK_OFFSET: Self = Self(0x041F);

    // Link policy
    /// `HCI_Hold_Mode`
    pub const HOLD_MODE: Self = Self(0x0801);
    /// `HCI_Sniff_Mode`
    pub const SNIFF_MODE: Self = Self(0x0803);
    /// `HCI_Exit_Sniff_Mode`
    pub const EXIT_SNIFF_MODE: Self = Self(0x0804);
    /// `HCI_Park_State`
    pub const PARK_STATE: Self = Self(0x0805);
    /// `HCI_Exit_Park_State`
    pub const EXIT_PARK_STATE: Self = Self(0x0806);
    /// `HCI_QoS_Setup`
    pub const QOS_SETUP: Self = Self(0x0807);
    /// `HCI_Role_Discovery`
    pub const ROLE_DISCOVERY: Self = Self(0x0809);
    /// `HCI_Switch_Role`
    pub const SWITCH_ROLE: Self = Self(0x080B);
    /// `HCI_Read_Link_Policy_Settings`
    pub const READ_LINK_POLICY_SETTINGS: Self = Self(0x080C);
    /// `HCI_Write_Link_Policy_Settings`
    pub const WRITE_LINK_POLICY_SETTINGS: Self = Self(0x080D);
    /// `HCI_Flow_Specification`
    pub const FLOW_SPECIFICATION: Self = Self(0x0810);
    /// `HCI_Sniff_Subrating`
    pub const SNIFF_SUBRATING: Self = Self(0x0811);

    // Controller and baseband
    /// `HCI_Flush`
    pub const FLUSH: Self = Self(0x0C08);
    /// `HCI_Read_Automatic_Flush_Timeout`
    pub const READ_AUTOMATIC_FLUSH_TIMEOUT: Self = Self(0x0C27);
    /// `HCI_Write_Automatic_Flush_Timeout`
    pub const WRITE_AUTOMATIC_FLUSH_TIMEOUT: Self = Self(0x0C28);
    /// `HCI_Read_Transmit_Power_Level`
    pub const READ_TRANSMIT_POWER_LEVEL: Self = Self(0x0C2D);
    /// `HCI_Read_Link_Supervision_Timeout`
    pub const READ_LINK_SUPERVISION_TIMEOUT: Self = Self(0x0C36);
    /// `HCI_Write_Link_Supervision_Timeout`
    pub const WRITE_LINK_SUPERVISION_TIMEOUT: Self = Self(0x0C37);

    // Status parameters
    /// `HCI_Read_Failed_Contact_Counter`
    pub const READ_FAILED_CONTACT_COUNTER: Self = Self(0x1401);
    /// `HCI_Reset_Failed_Contact_Counter`
    pub const RESET_FAILED_CONTACT_COUNTER: Self = Self(0x1402);
    /// `HCI_Read_Link_Quality`
    pub const READ_LINK_QUALITY: Self = Self(0x1403);
    /// `HCI_Read_RSSI`
    pub const READ_RSSI: Self = Self(0x1405);
    /// `HCI_Read_AFH_Channel_Map`
    pub const READ_AFH_CHANNEL_MAP: Self = Self(0x1406);
    /// `HCI_Read_Clock`
    pub const READ_CLOCK: Self = Self(0x1407);

    // LE controller
    /// `HCI_LE_Set_Advertising_Parameters`
    pub const LE_SET_ADVERTISING_PARAMETERS: Self = Self(0x2006);
    /// `HCI_LE_Read_Advertising_Physical_Channel_Tx_Power`
    pub const LE_READ_ADVERTISING_PHYSICAL_CHANNEL_TX_POWER: Self = Self(0x2007);
    /// `HCI_LE_Set_Advertising_Data`
    pub const LE_SET_ADVERTISING_DATA: Self = Self(0x2008);
    /// `HCI_LE_Set_Scan_Response_Data`
    pub const LE_SET_SCAN_RESPONSE_DATA: Self = Self(0x2009);
    /// `HCI_LE_Set_Advertising_Enable`
    pub const LE_SET_ADVERTISING_ENABLE: Self = Self(0x200A);
    /// `HCI_LE_Create_Connection`
    pub const LE_CREATE_CONNECTION: Self = Self(0x200D);
    /// `HCI_LE_Create_Connection_Cancel`
    pub const LE_CREATE_CONNECTION_CANCEL: Self = Self(0x200E);
    /// `HCI_LE_Add_Device_To_Filter_Accept_List`
    pub const LE_ADD_DEVICE_TO_FILTER_ACCEPT_LIST: Self = Self(0x2011);
    /// `HCI_LE_Remove_Device_From_Filter_Accept_List`
    pub const LE_REMOVE_DEVICE_FROM_FILTER_ACCEPT_LIST: Self = Self(0x2012);
    /// `HCI_LE_Connection_Update`
    pub const LE_CONNECTION_UPDATE: Self = Self(0x2013);
    /// `HCI_LE_Set_Advertising_Set_Random_Address`
    pub const LE_SET_ADVERTISING_SET_RANDOM_ADDRESS: Self = Self(0x2035);
    /// `HCI_LE_Set_Extended_Advertising_Parameters`
    pub const LE_SET_EXTENDED_ADVERTISING_PARAMETERS: Self = Self(0x2036);
    /// `HCI_LE_Set_Extended_Advertising_Data`
    pub const LE_SET_EXTENDED_ADVERTISING_DATA: Self = Self(0x2037);
    /// `HCI_LE_Set_Extended_Scan_Response_Data`
    pub const LE_SET_EXTENDED_SCAN_RESPONSE_DATA: Self = Self(0x2038);
    /// `HCI_LE_Set_Extended_Advertising_Enable`
    pub const LE_SET_EXTENDED_ADVERTISING_ENABLE: Self = Self(0x2039);
    /// `HCI_LE_Remove_Advertising_Set`
    pub const LE_REMOVE_ADVERTISING_SET: Self = Self(0x203C);
    /// `HCI_LE_Set_Periodic_Advertising_Parameters`
    pub const LE_SET_PERIODIC_ADVERTISING_PARAMETERS: Self = Self(0x203E);
    /// `HCI_LE_Set_Periodic_Advertising_Data`
    pub const LE_SET_PERIODIC_ADVERTISING_DATA: Self = Self(0x203F);
    /// `HCI_LE_Set_Periodic_Advertising_Enable`
    pub const LE_SET_PERIODIC_ADVERTISING_ENABLE: Self = Self(0x2040);

    // Vendor specific
    /// Android vendor multi-advertising command (`LE_MULTI_ADVT`)
    pub const LE_MULTI_ADVT: Self = Self(0xFD54);
}

impl From<u16> for OpCode {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Sub-operation of the vendor `LE_MULTI_ADVT` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MultiAdvtSubOp {
    /// Set instance parameters
    SetParam = 0x01,
    /// Set instance advertising data
    SetData = 0x02,
    /// Set instance scan response data
    SetScanResp = 0x03,
    /// Set instance random address
    SetRandomAddr = 0x04,
    /// Enable or disable an instance
    SetEnable = 0x05,
}

impl MultiAdvtSubOp {
    /// Decode a sub-operation byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::SetParam),
            0x02 => Some(Self::SetData),
            0x03 => Some(Self::SetScanResp),
            0x04 => Some(Self::SetRandomAddr),
            0x05 => Some(Self::SetEnable),
            _ => None,
        }
    }
}
