use crate::error::GatewayError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 6-byte hardware address of a peripheral, kept in the byte order the radio
/// reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for DeviceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if hex.len() != 12 || !hex.is_ascii() {
            return Err(format!("invalid device address `{}`", s));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| format!("invalid device address `{}`: {}", s, e))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Per-peripheral connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
        };
        f.write_str(name)
    }
}

/// Radio role of the shared transport. Only one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkLayerState {
    Standby,
    Scanning,
    Connecting,
    Connected,
    Advertising,
}

impl fmt::Display for LinkLayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standby => "STANDBY",
            Self::Scanning => "SCANNING",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Advertising => "ADVERTISING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Accelerometer,
    Gyroscope,
}

/// One decoded axis triple from a streaming frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub sequence_number: u8,
    pub axis_values: [f64; 3],
    pub kind: SampleKind,
    /// Valid-axis mask from the frame header, passed through untouched.
    pub valid_axes: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub rssi: i8,
    /// Whether the device passed the name filter and may be connected.
    pub eligible: bool,
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    LinkLayerStateChanged {
        error: Option<GatewayError>,
        new_state: LinkLayerState,
        old_state: LinkLayerState,
    },
    DeviceFound(ScannedDevice),
    ConnectionStateChanged {
        address: DeviceAddress,
        error: Option<GatewayError>,
        new_state: ConnectionState,
        old_state: ConnectionState,
    },
    GattDiscoveryCompleted {
        address: DeviceAddress,
        resolved: usize,
        total: usize,
    },
    AttributeValueReceived {
        address: DeviceAddress,
        name: String,
        value: Vec<u8>,
    },
    PollDue {
        address: DeviceAddress,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let address = DeviceAddress::new([0x01, 0xab, 0x02, 0xcd, 0x03, 0xef]);
        assert_eq!(address.to_string(), "01ab02cd03ef");
        assert_eq!("01:ab:02:cd:03:ef".parse::<DeviceAddress>(), Ok(address));
        assert!("01ab02".parse::<DeviceAddress>().is_err());
        // Twelve bytes of text, but not twelve hex digits.
        assert!("aéééééb".parse::<DeviceAddress>().is_err());
        assert!("0123456789zz".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_sample_serializes_camel_case() {
        let sample = Sample {
            sequence_number: 3,
            axis_values: [1.0, -2.0, 0.5],
            kind: SampleKind::Gyroscope,
            valid_axes: 7,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["sequenceNumber"], 3);
        assert_eq!(json["kind"], "gyroscope");
        assert_eq!(json["axisValues"][1], -2.0);
    }
}
