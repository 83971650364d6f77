//! Attribute Catalog
//!
//! Static table of the services and characteristics the gateway knows by
//! name. On the wire, 128-bit identifiers travel little-endian, i.e. the
//! canonical textual UUID with its byte order reversed.

use std::fmt;
use uuid::Uuid;

/// Identifier of an attribute as reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeUuid {
    /// 16-bit SIG-assigned identifier.
    Short(u16),
    /// Full 128-bit identifier.
    Long(Uuid),
}

impl AttributeUuid {
    /// Parse the little-endian wire form (2 or 16 bytes).
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Self::Short(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut be = [0u8; 16];
                for (dst, src) in be.iter_mut().zip(bytes.iter().rev()) {
                    *dst = *src;
                }
                Some(Self::Long(Uuid::from_bytes(be)))
            }
            _ => None,
        }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::Short(value) => value.to_le_bytes().to_vec(),
            Self::Long(uuid) => uuid.as_bytes().iter().rev().copied().collect(),
        }
    }
}

/// Renders the canonical big-endian hex form without separators, which is
/// also the name given to attributes the catalog does not declare.
impl fmt::Display for AttributeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short(value) => write!(f, "{:04x}", value),
            Self::Long(uuid) => write!(f, "{}", uuid.simple()),
        }
    }
}

/// Client characteristic configuration descriptor.
pub const CCC_UUID: AttributeUuid = AttributeUuid::Short(0x2902);

/// Value written to a CCC handle to enable notifications.
pub const NOTIFICATIONS_ENABLED: [u8; 2] = [0x01, 0x00];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub uuid: AttributeUuid,
}

/// Ordered list of named attributes. Names are unique within a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeCatalog {
    entries: Vec<CatalogEntry>,
}

impl AttributeCatalog {
    /// Build a catalog from `(name, textual uuid)` pairs.
    pub fn from_definitions(definitions: &[(&str, &str)]) -> Result<Self, uuid::Error> {
        let mut catalog = Self::default();
        for (name, text) in definitions {
            catalog.push(name, AttributeUuid::Long(Uuid::parse_str(text)?));
        }
        Ok(catalog)
    }

    /// Append an entry. A duplicate name replaces the earlier identifier.
    pub fn push(&mut self, name: &str, uuid: AttributeUuid) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.uuid = uuid,
            None => self.entries.push(CatalogEntry {
                name: name.to_string(),
                uuid,
            }),
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn uuid_of(&self, name: &str) -> Option<AttributeUuid> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Catalog of the TXW51 sensor node.
    pub fn txw51() -> Self {
        let mut catalog = Self::default();
        for (name, value) in TXW51_ATTRIBUTES {
            catalog.push(name, AttributeUuid::Long(Uuid::from_u128(*value)));
        }
        catalog
    }
}

/// Attribute names of the TXW51 catalog.
pub mod names {
    pub const DEVICE_INFO_SERVICE: &str = "DEVICE_INFO_SERVICE";
    pub const DEVICE_INFO_CHAR_MANUFACTURER: &str = "DEVICE_INFO_CHAR_MANUFACTURER";
    pub const DEVICE_INFO_CHAR_MODEL: &str = "DEVICE_INFO_CHAR_MODEL";
    pub const DEVICE_INFO_CHAR_SERIAL: &str = "DEVICE_INFO_CHAR_SERIAL";
    pub const DEVICE_INFO_CHAR_HW_REV: &str = "DEVICE_INFO_CHAR_HW_REV";
    pub const DEVICE_INFO_CHAR_FW_REV: &str = "DEVICE_INFO_CHAR_FW_REV";
    pub const DEVICE_INFO_CHAR_DEVICE_NAME: &str = "DEVICE_INFO_CHAR_DEVICE_NAME";
    pub const DEVICE_INFO_CHAR_SAVE_VALUES: &str = "DEVICE_INFO_CHAR_SAVE_VALUES";

    pub const LSM330_SERVICE: &str = "LSM330_SERVICE";
    pub const LSM330_CHAR_ACC_EN: &str = "LSM330_CHAR_ACC_EN";
    pub const LSM330_CHAR_GYRO_EN: &str = "LSM330_CHAR_GYRO_EN";
    pub const LSM330_CHAR_TEMP_SAMPLE: &str = "LSM330_CHAR_TEMP_SAMPLE";
    pub const LSM330_CHAR_ACC_FSCALE: &str = "LSM330_CHAR_ACC_FSCALE";
    pub const LSM330_CHAR_GYRO_FSCALE: &str = "LSM330_CHAR_GYRO_FSCALE";
    pub const LSM330_CHAR_ACC_ODR: &str = "LSM330_CHAR_ACC_ODR";
    pub const LSM330_CHAR_GYRO_ODR: &str = "LSM330_CHAR_GYRO_ODR";
    pub const LSM330_CHAR_TRIGGER_VAL: &str = "LSM330_CHAR_TRIGGER_VAL";
    pub const LSM330_CHAR_TRIGGER_AXIS: &str = "LSM330_CHAR_TRIGGER_AXIS";

    pub const MEASURE_SERVICE: &str = "MEASURE_SERVICE";
    pub const MEASURE_CHAR_START: &str = "MEASURE_CHAR_START";
    pub const MEASURE_CHAR_STOP: &str = "MEASURE_CHAR_STOP";
    pub const MEASURE_CHAR_DURATION: &str = "MEASURE_CHAR_DURATION";
    pub const MEASURE_CHAR_DATASTREAM: &str = "MEASURE_CHAR_DATASTREAM";

    pub const I2C_SERVICE: &str = "I2C_SERVICE";
    pub const I2C_CHAR_DEVICE_ADDRESS: &str = "I2C_CHAR_DEVICE_ADDRESS";
    pub const I2C_CHAR_DEVICE_REGISTER: &str = "I2C_CHAR_DEVICE_REGISTER";
    pub const I2C_CHAR_READ_LENGTH: &str = "I2C_CHAR_READ_LENGTH";
    pub const I2C_CHAR_VALUE: &str = "I2C_CHAR_VALUE";

    /// Device information characteristics read after discovery.
    pub const DEVICE_INFO_CHARACTERISTICS: &[&str] = &[
        DEVICE_INFO_CHAR_MANUFACTURER,
        DEVICE_INFO_CHAR_MODEL,
        DEVICE_INFO_CHAR_SERIAL,
        DEVICE_INFO_CHAR_HW_REV,
        DEVICE_INFO_CHAR_FW_REV,
        DEVICE_INFO_CHAR_DEVICE_NAME,
    ];
}

// All TXW51 identifiers share the 8EDFxxxx-67E5-DB83-F85B-A1E2AB1C9E7A base.
const TXW51_ATTRIBUTES: &[(&str, u128)] = &[
    (names::DEVICE_INFO_SERVICE, 0x8EDF0100_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::DEVICE_INFO_CHAR_MANUFACTURER, 0x8EDF0101_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::DEVICE_INFO_CHAR_MODEL, 0x8EDF0102_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::DEVICE_INFO_CHAR_SERIAL, 0x8EDF0103_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::DEVICE_INFO_CHAR_HW_REV, 0x8EDF0104_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::DEVICE_INFO_CHAR_FW_REV, 0x8EDF0105_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::DEVICE_INFO_CHAR_DEVICE_NAME, 0x8EDF0106_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::DEVICE_INFO_CHAR_SAVE_VALUES, 0x8EDF0107_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_SERVICE, 0x8EDF0200_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_ACC_EN, 0x8EDF0201_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_GYRO_EN, 0x8EDF0202_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_TEMP_SAMPLE, 0x8EDF0203_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_ACC_FSCALE, 0x8EDF0204_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_GYRO_FSCALE, 0x8EDF0205_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_ACC_ODR, 0x8EDF0206_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_GYRO_ODR, 0x8EDF0207_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_TRIGGER_VAL, 0x8EDF0208_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::LSM330_CHAR_TRIGGER_AXIS, 0x8EDF0209_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::MEASURE_SERVICE, 0x8EDF0300_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::MEASURE_CHAR_START, 0x8EDF0301_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::MEASURE_CHAR_STOP, 0x8EDF0302_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::MEASURE_CHAR_DURATION, 0x8EDF0303_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::MEASURE_CHAR_DATASTREAM, 0x8EDF0304_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::I2C_SERVICE, 0x8EDF0500_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::I2C_CHAR_DEVICE_ADDRESS, 0x8EDF0501_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::I2C_CHAR_DEVICE_REGISTER, 0x8EDF0502_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::I2C_CHAR_READ_LENGTH, 0x8EDF0503_67E5_DB83_F85B_A1E2AB1C9E7A),
    (names::I2C_CHAR_VALUE, 0x8EDF0504_67E5_DB83_F85B_A1E2AB1C9E7A),
];
