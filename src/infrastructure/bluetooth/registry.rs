//! Device Registry
//!
//! Sessions in sighting order, indexed by address and by active connection
//! id. A connection id maps to at most one device at any time.

use crate::domain::models::DeviceAddress;
use crate::infrastructure::bluetooth::connection::RemoteDeviceSession;
use std::collections::HashMap;
use tracing::warn;

#[derive(Default)]
pub struct DeviceRegistry {
    sessions: Vec<RemoteDeviceSession>,
    by_address: HashMap<DeviceAddress, usize>,
    by_connection: HashMap<u8, DeviceAddress>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns `false` and drops the new session if the
    /// address is already registered.
    pub fn insert(&mut self, session: RemoteDeviceSession) -> bool {
        let address = session.address();
        if self.by_address.contains_key(&address) {
            return false;
        }
        self.by_address.insert(address, self.sessions.len());
        self.sessions.push(session);
        self.sync_connection(&address);
        true
    }

    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.by_address.contains_key(address)
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&RemoteDeviceSession> {
        self.by_address.get(address).map(|&i| &self.sessions[i])
    }

    pub fn get_mut(&mut self, address: &DeviceAddress) -> Option<&mut RemoteDeviceSession> {
        match self.by_address.get(address) {
            Some(&i) => Some(&mut self.sessions[i]),
            None => None,
        }
    }

    /// Address of the device owning `connection`.
    pub fn address_for_connection(&self, connection: u8) -> Option<DeviceAddress> {
        self.by_connection.get(&connection).copied()
    }

    /// Bring the connection index in line with the session's current
    /// connection id.
    pub fn sync_connection(&mut self, address: &DeviceAddress) {
        let current = match self.get(address) {
            Some(session) => session.connection_id(),
            None => return,
        };

        self.by_connection
            .retain(|connection, owner| owner != address || Some(*connection) == current);

        if let Some(connection) = current {
            if let Some(previous) = self.by_connection.insert(connection, *address) {
                if previous != *address {
                    warn!(
                        "Connection {} moved from {} to {}, evicting stale owner",
                        connection, previous, address
                    );
                }
            }
        }
    }

    /// Remove a session and return it.
    pub fn remove(&mut self, address: &DeviceAddress) -> Option<RemoteDeviceSession> {
        let index = self.by_address.remove(address)?;
        let session = self.sessions.remove(index);
        self.by_connection.retain(|_, owner| owner != address);

        for slot in self.by_address.values_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
        Some(session)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.by_address.clear();
        self.by_connection.clear();
    }

    /// Sessions in the order they were first seen.
    pub fn iter(&self) -> impl Iterator<Item = &RemoteDeviceSession> {
        self.sessions.iter()
    }

    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.sessions.iter().map(|s| s.address()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Both indexes agree with every session.
    pub fn is_consistent(&self) -> bool {
        let addresses_ok = self
            .sessions
            .iter()
            .enumerate()
            .all(|(i, s)| self.by_address.get(&s.address()) == Some(&i));

        let connections_ok = self.by_connection.iter().all(|(connection, address)| {
            self.get(address)
                .map_or(false, |s| s.connection_id() == Some(*connection))
        });

        addresses_ok && connections_ok && self.by_address.len() == self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::AttributeCatalog;
    use crate::domain::models::ConnectionState;
    use crate::infrastructure::bluetooth::connection::SessionConfig;
    use crate::infrastructure::bluetooth::simulator::{SimulatedPeripheral, SimulatedRadio};
    use crate::infrastructure::bluetooth::transport::CommandTransport;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn address(last: u8) -> DeviceAddress {
        DeviceAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, last])
    }

    fn session(radio: &Arc<SimulatedRadio>, address: DeviceAddress) -> RemoteDeviceSession {
        let (events, _) = mpsc::unbounded_channel();
        let (timers, _) = mpsc::unbounded_channel();
        let transport: Arc<dyn CommandTransport> = radio.clone();
        RemoteDeviceSession::new(
            address,
            transport,
            events,
            timers,
            Arc::new(AttributeCatalog::txw51()),
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_per_address() {
        let (radio, _events) = SimulatedRadio::new(Vec::new());
        let mut registry = DeviceRegistry::new();

        assert!(registry.insert(session(&radio, address(1))));
        assert!(registry.insert(session(&radio, address(2))));
        assert!(!registry.insert(session(&radio, address(1))));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.addresses(), vec![address(1), address(2)]);
        assert!(registry.is_consistent());
    }

    #[tokio::test]
    async fn test_remove_keeps_indexes_consistent() {
        let (radio, _events) = SimulatedRadio::new(Vec::new());
        let mut registry = DeviceRegistry::new();
        for last in 1..=3 {
            registry.insert(session(&radio, address(last)));
        }

        let removed = registry.remove(&address(1)).unwrap();
        assert_eq!(removed.address(), address(1));
        assert!(registry.remove(&address(1)).is_none());

        assert_eq!(registry.get(&address(3)).map(|s| s.address()), Some(address(3)));
        assert!(!registry.contains(&address(1)));
        assert!(registry.is_consistent());
    }

    #[tokio::test]
    async fn test_connection_index_follows_sessions() {
        let peripherals = vec![
            SimulatedPeripheral::txw51(address(1), -60),
            SimulatedPeripheral::txw51(address(2), -70),
        ];
        let (radio, _events) = SimulatedRadio::new(peripherals);
        let mut registry = DeviceRegistry::new();
        registry.insert(session(&radio, address(1)));
        registry.insert(session(&radio, address(2)));

        for last in [1, 2] {
            registry.get_mut(&address(last)).unwrap().connect().await.unwrap();
            registry.sync_connection(&address(last));
        }
        assert_eq!(registry.address_for_connection(0), Some(address(1)));
        assert_eq!(registry.address_for_connection(1), Some(address(2)));
        assert!(registry.is_consistent());

        let first = registry.get_mut(&address(1)).unwrap();
        first.disconnect().await.unwrap();
        assert_eq!(first.state(), ConnectionState::Disconnecting);

        registry.remove(&address(1));
        assert_eq!(registry.address_for_connection(0), None);
        assert_eq!(registry.address_for_connection(1), Some(address(2)));
        assert!(registry.is_consistent());

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.address_for_connection(1), None);
    }
}
