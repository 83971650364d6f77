//! GATT Index
//!
//! Per-connection cache resolving attribute identifiers to local handles and
//! handles to the last value seen. Handles are only meaningful for one
//! connection; a new index is built every time discovery runs.

use crate::domain::catalog::{AttributeCatalog, AttributeUuid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub uuid: AttributeUuid,
    /// Local handle, 0 while unresolved.
    pub handle: u16,
    pub last_value: Option<Vec<u8>>,
}

impl Attribute {
    pub fn is_resolved(&self) -> bool {
        self.handle != 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct GattIndex {
    attributes: Vec<Attribute>,
    /// Number of leading entries that come from the catalog.
    declared: usize,
}

impl GattIndex {
    pub fn new(catalog: &AttributeCatalog) -> Self {
        let attributes: Vec<Attribute> = catalog
            .entries()
            .iter()
            .map(|entry| Attribute {
                name: entry.name.clone(),
                uuid: entry.uuid,
                handle: 0,
                last_value: None,
            })
            .collect();

        Self {
            declared: attributes.len(),
            attributes,
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn by_identifier(&self, uuid: &AttributeUuid) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.uuid == *uuid)
    }

    pub fn by_handle(&self, handle: u16) -> Option<&Attribute> {
        if handle == 0 {
            return None;
        }
        self.attributes.iter().find(|a| a.handle == handle)
    }

    /// Bind a discovered handle to its identifier. Identifiers the catalog
    /// does not declare are appended under their hex rendering so they stay
    /// reachable by handle.
    pub fn assign_handle(&mut self, uuid: AttributeUuid, handle: u16) -> &Attribute {
        let index = match self.attributes.iter().position(|a| a.uuid == uuid) {
            Some(index) => index,
            None => {
                self.attributes.push(Attribute {
                    name: uuid.to_string(),
                    uuid,
                    handle: 0,
                    last_value: None,
                });
                self.attributes.len() - 1
            }
        };

        let attribute = &mut self.attributes[index];
        attribute.handle = handle;
        attribute
    }

    /// Store `bytes` as the last value of the attribute owning `handle`.
    /// Returns `None` when no attribute has that handle yet, which happens
    /// when a notification races ahead of discovery.
    pub fn record_value(&mut self, handle: u16, bytes: &[u8]) -> Option<&Attribute> {
        if handle == 0 {
            return None;
        }
        match self.attributes.iter_mut().find(|a| a.handle == handle) {
            Some(attribute) => {
                attribute.last_value = Some(bytes.to_vec());
                Some(attribute)
            }
            None => {
                tracing::warn!("Value for unknown handle {:#06x} dropped", handle);
                None
            }
        }
    }

    /// Catalog entries that have a handle.
    pub fn resolved_count(&self) -> usize {
        self.attributes[..self.declared]
            .iter()
            .filter(|a| a.is_resolved())
            .count()
    }

    pub fn declared_count(&self) -> usize {
        self.declared
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{names, CCC_UUID};

    fn index() -> (AttributeCatalog, GattIndex) {
        let catalog = AttributeCatalog::txw51();
        let index = GattIndex::new(&catalog);
        (catalog, index)
    }

    #[test]
    fn test_new_index_is_unresolved() {
        let (catalog, index) = index();
        assert_eq!(index.len(), catalog.len());
        assert_eq!(index.resolved_count(), 0);
        assert!(index.iter().all(|a| a.handle == 0 && a.last_value.is_none()));
    }

    #[test]
    fn test_assign_known_identifier() {
        let (catalog, mut index) = index();
        let uuid = catalog.uuid_of(names::MEASURE_CHAR_START).unwrap();
        index.assign_handle(uuid, 0x0021);

        assert_eq!(index.by_name(names::MEASURE_CHAR_START).unwrap().handle, 0x0021);
        assert_eq!(index.by_handle(0x0021).unwrap().name, names::MEASURE_CHAR_START);
        assert_eq!(index.by_identifier(&uuid).unwrap().handle, 0x0021);
        assert_eq!(index.resolved_count(), 1);
        assert_eq!(index.len(), catalog.len());
    }

    #[test]
    fn test_assign_unknown_identifier_appends_hex_entry() {
        let (catalog, mut index) = index();
        index.assign_handle(CCC_UUID, 0x0030);

        assert_eq!(index.len(), catalog.len() + 1);
        assert_eq!(index.by_handle(0x0030).unwrap().name, "2902");
        assert_eq!(index.resolved_count(), 0);
    }

    #[test]
    fn test_record_value() {
        let (catalog, mut index) = index();
        let uuid = catalog.uuid_of(names::LSM330_CHAR_TEMP_SAMPLE).unwrap();
        index.assign_handle(uuid, 0x0014);

        let attribute = index.record_value(0x0014, &[0x19]).unwrap();
        assert_eq!(attribute.last_value.as_deref(), Some(&[0x19][..]));
        assert!(index.record_value(0x0099, &[1, 2]).is_none());
        assert!(index.by_handle(0).is_none());
    }
}
