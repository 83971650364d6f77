//! Dongle Protocol
//!
//! Commands the gateway sends to the radio dongle, the responses it gets
//! back and the unsolicited events it receives. Class and message ids follow
//! the BGAPI numbering so a serial command queue can encode them directly.

use crate::domain::models::DeviceAddress;
use std::fmt;

/// BGAPI message classes used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    System = 0,
    Connection = 3,
    AttributeClient = 4,
    GenericAccessProfile = 6,
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::System => "system",
            Self::Connection => "connection",
            Self::AttributeClient => "attclient",
            Self::GenericAccessProfile => "gap",
        };
        f.write_str(name)
    }
}

/// Generic discovery mode for `gap_discover`.
pub const DISCOVER_GENERIC: u8 = 1;

/// `gap_set_mode` values.
pub const GAP_NON_DISCOVERABLE: u8 = 0;
pub const GAP_NON_CONNECTABLE: u8 = 0;

/// Random static address type, which the sensor nodes advertise with.
pub const ADDRESS_TYPE_RANDOM: u8 = 1;

/// Full handle range used for attribute discovery.
pub const FIRST_HANDLE: u16 = 0x0001;
pub const LAST_HANDLE: u16 = 0xFFFF;

/// Human readable text for the common disconnect reason codes.
pub fn describe_reason(reason: u16) -> &'static str {
    match reason {
        0x0000 => "ok",
        0x0208 => "connection timeout",
        0x0213 => "remote user terminated connection",
        0x0216 => "connection terminated by local host",
        0x0222 => "link layer response timeout",
        0x023B => "unacceptable connection interval",
        0x023E => "connection failed to be established",
        _ => "unknown reason",
    }
}

/// Bits of the `connection_status` flags field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionFlags(pub u8);

impl ConnectionFlags {
    pub const CONNECTED: u8 = 0x01;
    pub const ENCRYPTED: u8 = 0x02;
    pub const COMPLETED: u8 = 0x04;
    pub const PARAMETERS_CHANGE: u8 = 0x08;

    pub fn is_connected(&self) -> bool {
        self.0 & Self::CONNECTED != 0
    }

    pub fn is_completed(&self) -> bool {
        self.0 & Self::COMPLETED != 0
    }

    /// Link is up and the connect procedure has finished.
    pub fn is_established(&self) -> bool {
        self.is_connected() && self.is_completed()
    }
}

/// Outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SystemHello,
    SystemReset {
        boot_to_dfu: bool,
    },
    GapSetMode {
        discoverable: u8,
        connectable: u8,
    },
    GapEndProcedure,
    GapSetScanParameters {
        interval: u16,
        window: u16,
        active: bool,
    },
    GapDiscover {
        mode: u8,
    },
    GapConnectDirect {
        address: DeviceAddress,
        address_type: u8,
        interval_min: u16,
        interval_max: u16,
        timeout: u16,
        latency: u16,
    },
    ConnectionDisconnect {
        connection: u8,
    },
    AttClientFindInformation {
        connection: u8,
        start: u16,
        end: u16,
    },
    AttClientAttributeWrite {
        connection: u8,
        handle: u16,
        data: Vec<u8>,
    },
    AttClientReadByHandle {
        connection: u8,
        handle: u16,
    },
}

impl Command {
    pub fn class(&self) -> MessageClass {
        match self {
            Self::SystemHello | Self::SystemReset { .. } => MessageClass::System,
            Self::GapSetMode { .. }
            | Self::GapEndProcedure
            | Self::GapSetScanParameters { .. }
            | Self::GapDiscover { .. }
            | Self::GapConnectDirect { .. } => MessageClass::GenericAccessProfile,
            Self::ConnectionDisconnect { .. } => MessageClass::Connection,
            Self::AttClientFindInformation { .. }
            | Self::AttClientAttributeWrite { .. }
            | Self::AttClientReadByHandle { .. } => MessageClass::AttributeClient,
        }
    }

    /// Message id within the class.
    pub fn id(&self) -> u8 {
        match self {
            Self::SystemReset { .. } => 0,
            Self::SystemHello => 1,
            Self::GapSetMode { .. } => 1,
            Self::GapDiscover { .. } => 2,
            Self::GapConnectDirect { .. } => 3,
            Self::GapEndProcedure => 4,
            Self::GapSetScanParameters { .. } => 7,
            Self::ConnectionDisconnect { .. } => 0,
            Self::AttClientFindInformation { .. } => 3,
            Self::AttClientReadByHandle { .. } => 4,
            Self::AttClientAttributeWrite { .. } => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SystemHello => "system_hello",
            Self::SystemReset { .. } => "system_reset",
            Self::GapSetMode { .. } => "gap_set_mode",
            Self::GapEndProcedure => "gap_end_procedure",
            Self::GapSetScanParameters { .. } => "gap_set_scan_parameters",
            Self::GapDiscover { .. } => "gap_discover",
            Self::GapConnectDirect { .. } => "gap_connect_direct",
            Self::ConnectionDisconnect { .. } => "connection_disconnect",
            Self::AttClientFindInformation { .. } => "attclient_find_information",
            Self::AttClientAttributeWrite { .. } => "attclient_attribute_write",
            Self::AttClientReadByHandle { .. } => "attclient_read_by_handle",
        }
    }

    /// Connection the command addresses, if any.
    pub fn connection(&self) -> Option<u8> {
        match self {
            Self::ConnectionDisconnect { connection }
            | Self::AttClientFindInformation { connection, .. }
            | Self::AttClientAttributeWrite { connection, .. }
            | Self::AttClientReadByHandle { connection, .. } => Some(*connection),
            _ => None,
        }
    }
}

/// Successful result of a submitted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ack,
    /// `gap_connect_direct` accepted; the link is not up yet.
    ConnectionOpened { connection: u8 },
    /// Read completed. The command queue pairs `attclient_read_by_handle`
    /// with the `attribute_value` event that carries its result.
    AttributeValue { handle: u16, value: Vec<u8> },
}

/// Unsolicited event delivered by the dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// `gap_scan_response`
    Advertisement {
        sender: DeviceAddress,
        address_type: u8,
        rssi: i8,
        data: Vec<u8>,
    },
    /// `connection_status`
    ConnectionStatus {
        connection: u8,
        flags: ConnectionFlags,
        address: DeviceAddress,
        conn_interval: u16,
        timeout: u16,
        latency: u16,
        bonding: u8,
    },
    /// `connection_disconnected`
    Disconnected { connection: u8, reason: u16 },
    /// `attclient_find_information_found`, uuid in wire order
    InformationFound {
        connection: u8,
        handle: u16,
        uuid: Vec<u8>,
    },
    /// `attclient_attribute_value`
    AttributeValue {
        connection: u8,
        handle: u16,
        value: Vec<u8>,
    },
    /// `attclient_procedure_completed`
    ProcedureCompleted {
        connection: u8,
        result: u16,
        handle: u16,
    },
}

impl TransportEvent {
    pub fn class(&self) -> MessageClass {
        match self {
            Self::Advertisement { .. } => MessageClass::GenericAccessProfile,
            Self::ConnectionStatus { .. } | Self::Disconnected { .. } => MessageClass::Connection,
            Self::InformationFound { .. }
            | Self::AttributeValue { .. }
            | Self::ProcedureCompleted { .. } => MessageClass::AttributeClient,
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Self::Advertisement { .. } => 0,
            Self::ConnectionStatus { .. } => 0,
            Self::Disconnected { .. } => 4,
            Self::ProcedureCompleted { .. } => 1,
            Self::InformationFound { .. } => 4,
            Self::AttributeValue { .. } => 5,
        }
    }

    pub fn connection(&self) -> Option<u8> {
        match self {
            Self::Advertisement { .. } => None,
            Self::ConnectionStatus { connection, .. }
            | Self::Disconnected { connection, .. }
            | Self::InformationFound { connection, .. }
            | Self::AttributeValue { connection, .. }
            | Self::ProcedureCompleted { connection, .. } => Some(*connection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_flags() {
        assert!(ConnectionFlags(0x05).is_established());
        assert!(!ConnectionFlags(0x01).is_established());
        assert!(!ConnectionFlags(0x04).is_established());
        assert!(ConnectionFlags(0x0F).is_established());
    }

    #[test]
    fn test_command_ids() {
        let write = Command::AttClientAttributeWrite {
            connection: 2,
            handle: 0x10,
            data: vec![1],
        };
        assert_eq!(write.class(), MessageClass::AttributeClient);
        assert_eq!(write.id(), 5);
        assert_eq!(write.connection(), Some(2));
        assert_eq!(Command::GapEndProcedure.class() as u8, 6);
        assert_eq!(Command::SystemHello.name(), "system_hello");
    }

    #[test]
    fn test_event_routing_fields() {
        let event = TransportEvent::Disconnected {
            connection: 3,
            reason: 0x0208,
        };
        assert_eq!(event.class(), MessageClass::Connection);
        assert_eq!(event.connection(), Some(3));

        let advert = TransportEvent::Advertisement {
            sender: DeviceAddress::new([0; 6]),
            address_type: ADDRESS_TYPE_RANDOM,
            rssi: -60,
            data: Vec::new(),
        };
        assert_eq!(advert.connection(), None);
        assert_eq!(advert.class(), MessageClass::GenericAccessProfile);
    }
}
