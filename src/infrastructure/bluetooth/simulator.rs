//! Simulated Radio
//!
//! In-memory stand-in for the dongle and its serial command queue. It
//! answers commands the way the dongle does and pushes the matching events,
//! which makes the whole gateway runnable and testable without hardware.

use crate::domain::catalog::{names, AttributeCatalog, AttributeUuid, CCC_UUID, NOTIFICATIONS_ENABLED};
use crate::domain::models::DeviceAddress;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{
    Command, ConnectionFlags, Response, TransportEvent, ADDRESS_TYPE_RANDOM,
};
use crate::infrastructure::bluetooth::scanner::AD_COMPLETE_NAME;
use crate::infrastructure::bluetooth::transport::{CommandTransport, EventReceiver, EventSender};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// BGAPI result code for a command on a closed connection.
pub const ERROR_NOT_CONNECTED: u16 = 0x0186;
/// ATT error code for an invalid handle.
pub const ERROR_INVALID_HANDLE: u16 = 0x0401;
/// Reason reported when the host closes a connection.
pub const REASON_LOCAL_HOST: u16 = 0x0216;
/// Reason reported when the link supervision timer expires.
pub const REASON_TIMEOUT: u16 = 0x0208;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedAttribute {
    pub handle: u16,
    pub uuid: AttributeUuid,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub address: DeviceAddress,
    pub name: String,
    pub rssi: i8,
    pub attributes: Vec<SimulatedAttribute>,
}

impl SimulatedPeripheral {
    /// A peripheral with no attributes.
    pub fn new(address: DeviceAddress, name: &str, rssi: i8) -> Self {
        Self {
            address,
            name: name.to_string(),
            rssi,
            attributes: Vec::new(),
        }
    }

    /// A TXW51 node exposing the full catalog, a CCC right after the data
    /// stream characteristic and a generic device name attribute.
    pub fn txw51(address: DeviceAddress, rssi: i8) -> Self {
        let mut peripheral = Self::new(address, "TXW51", rssi);
        peripheral.push(AttributeUuid::Short(0x2A00), b"TXW51".to_vec());

        let catalog = AttributeCatalog::txw51();
        for entry in catalog.entries() {
            let value = match entry.name.as_str() {
                names::DEVICE_INFO_CHAR_MANUFACTURER => b"HSR".to_vec(),
                names::DEVICE_INFO_CHAR_MODEL => b"TXW51".to_vec(),
                names::DEVICE_INFO_CHAR_SERIAL => format!("{}", address).into_bytes(),
                names::DEVICE_INFO_CHAR_HW_REV => b"1.0".to_vec(),
                names::DEVICE_INFO_CHAR_FW_REV => b"0.3".to_vec(),
                names::DEVICE_INFO_CHAR_DEVICE_NAME => b"TXW51".to_vec(),
                names::LSM330_CHAR_TEMP_SAMPLE => vec![25],
                _ => vec![0],
            };
            peripheral.push(entry.uuid, value);
            if entry.name == names::MEASURE_CHAR_DATASTREAM {
                peripheral.push(CCC_UUID, vec![0, 0]);
            }
        }
        peripheral
    }

    /// Append an attribute at the next free handle.
    pub fn push(&mut self, uuid: AttributeUuid, value: Vec<u8>) -> u16 {
        let handle = self.attributes.last().map_or(0x0003, |a| a.handle + 1);
        self.attributes.push(SimulatedAttribute { handle, uuid, value });
        handle
    }

    pub fn handle_of(&self, uuid: &AttributeUuid) -> Option<u16> {
        self.attributes
            .iter()
            .filter(|a| a.uuid == *uuid)
            .map(|a| a.handle)
            .last()
    }

    fn advertisement_data(&self) -> Vec<u8> {
        let mut data = vec![0x02, 0x01, 0x06];
        data.push(self.name.len() as u8 + 1);
        data.push(AD_COMPLETE_NAME);
        data.extend_from_slice(self.name.as_bytes());
        data
    }
}

#[derive(Default)]
struct RadioState {
    peripherals: Vec<SimulatedPeripheral>,
    connections: HashMap<u8, DeviceAddress>,
    next_connection: u8,
    reuse_ids: bool,
    log: Vec<Command>,
    failures: HashMap<&'static str, TransportError>,
    stalled: HashSet<DeviceAddress>,
    scanning: bool,
    stream_period: Option<Duration>,
}

impl RadioState {
    fn peripheral(&self, address: &DeviceAddress) -> Option<&SimulatedPeripheral> {
        self.peripherals.iter().find(|p| p.address == *address)
    }

    fn peripheral_mut(&mut self, address: &DeviceAddress) -> Option<&mut SimulatedPeripheral> {
        self.peripherals.iter_mut().find(|p| p.address == *address)
    }

    fn connected_peripheral(
        &mut self,
        connection: u8,
        command: &'static str,
    ) -> Result<&mut SimulatedPeripheral, TransportError> {
        let address = self.connections.get(&connection).copied().ok_or(TransportError::Failed {
            command,
            code: ERROR_NOT_CONNECTED,
        })?;
        self.peripheral_mut(&address).ok_or(TransportError::Failed {
            command,
            code: ERROR_NOT_CONNECTED,
        })
    }
}

/// Simulated dongle. Share it as `Arc<dyn CommandTransport>`.
pub struct SimulatedRadio {
    state: Arc<Mutex<RadioState>>,
    events: EventSender,
}

impl SimulatedRadio {
    pub fn new(peripherals: Vec<SimulatedPeripheral>) -> (Arc<Self>, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let state = RadioState {
            peripherals,
            ..Default::default()
        };
        let radio = Self {
            state: Arc::new(Mutex::new(state)),
            events,
        };
        (Arc::new(radio), receiver)
    }

    /// Two TXW51 nodes and an unrelated advertiser.
    pub fn demo_fleet() -> Vec<SimulatedPeripheral> {
        vec![
            SimulatedPeripheral::txw51(DeviceAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x01]), -58),
            SimulatedPeripheral::new(DeviceAddress::new([0xa0, 0xb0, 0xc0, 0xd0, 0xe0, 0xf0]), "Beacon", -80),
            SimulatedPeripheral::txw51(DeviceAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x02]), -67),
        ]
    }

    fn lock(&self) -> MutexGuard<'_, RadioState> {
        // A poisoned lock only means a test panicked mid-command.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, event: TransportEvent) {
        trace!("Simulated event: {:?}", event);
        let _ = self.events.send(event);
    }

    /// Every command submitted so far.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    pub fn command_count(&self, name: &str) -> usize {
        self.lock().log.iter().filter(|c| c.name() == name).count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Make every following command with this name fail.
    pub fn fail_command(&self, name: &'static str, error: TransportError) {
        self.lock().failures.insert(name, error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Hand out the lowest free connection id instead of counting up.
    pub fn reuse_connection_ids(&self) {
        self.lock().reuse_ids = true;
    }

    /// Connect requests to this address are accepted but never complete.
    pub fn stall_connections(&self, address: DeviceAddress) {
        self.lock().stalled.insert(address);
    }

    pub fn resume_connections(&self, address: &DeviceAddress) {
        self.lock().stalled.remove(address);
    }

    /// Stream synthetic data frames after measuring starts.
    pub fn enable_streaming(&self, period: Duration) {
        self.lock().stream_period = Some(period);
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn is_connected(&self, address: &DeviceAddress) -> bool {
        self.lock().connections.values().any(|a| a == address)
    }

    pub fn connection_of(&self, address: &DeviceAddress) -> Option<u8> {
        self.lock()
            .connections
            .iter()
            .find(|(_, a)| *a == address)
            .map(|(c, _)| *c)
    }

    /// Current value of an attribute on a peripheral.
    pub fn value_of(&self, address: &DeviceAddress, uuid: &AttributeUuid) -> Option<Vec<u8>> {
        let state = self.lock();
        let value = state
            .peripheral(address)?
            .attributes
            .iter()
            .find(|a| a.uuid == *uuid)
            .map(|a| a.value.clone());
        value
    }

    pub fn set_value(&self, address: &DeviceAddress, uuid: &AttributeUuid, value: Vec<u8>) {
        let mut state = self.lock();
        if let Some(attribute) = state
            .peripheral_mut(address)
            .and_then(|p| p.attributes.iter_mut().find(|a| a.uuid == *uuid))
        {
            attribute.value = value;
        }
    }

    /// Emit advertisements for every peripheral, as a scan would.
    pub fn advertise_all(&self) {
        let adverts: Vec<TransportEvent> = self
            .lock()
            .peripherals
            .iter()
            .map(|p| TransportEvent::Advertisement {
                sender: p.address,
                address_type: ADDRESS_TYPE_RANDOM,
                rssi: p.rssi,
                data: p.advertisement_data(),
            })
            .collect();
        for advert in adverts {
            self.send(advert);
        }
    }

    /// Complete a stalled connection attempt.
    pub fn complete_connection(&self, address: &DeviceAddress) -> bool {
        match self.connection_of(address) {
            Some(connection) => {
                self.send(established(connection, *address));
                true
            }
            None => false,
        }
    }

    /// The peripheral goes away without the host asking for it.
    pub fn drop_link(&self, address: &DeviceAddress, reason: u16) -> bool {
        let connection = {
            let mut state = self.lock();
            let connection = state
                .connections
                .iter()
                .find(|(_, a)| *a == address)
                .map(|(c, _)| *c);
            if let Some(connection) = connection {
                state.connections.remove(&connection);
            }
            connection
        };

        match connection {
            Some(connection) => {
                self.send(TransportEvent::Disconnected { connection, reason });
                true
            }
            None => false,
        }
    }

    /// Push a notification for the attribute with `uuid`.
    pub fn notify(&self, address: &DeviceAddress, uuid: &AttributeUuid, value: Vec<u8>) -> bool {
        let target = {
            let state = self.lock();
            let connection = state
                .connections
                .iter()
                .find(|(_, a)| *a == address)
                .map(|(c, _)| *c);
            let handle = state.peripheral(address).and_then(|p| p.handle_of(uuid));
            connection.zip(handle)
        };

        match target {
            Some((connection, handle)) => {
                self.send(TransportEvent::AttributeValue {
                    connection,
                    handle,
                    value,
                });
                true
            }
            None => false,
        }
    }

    fn start_stream(&self, connection: u8, address: DeviceAddress, period: Duration) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let datastream = AttributeCatalog::txw51().uuid_of(names::MEASURE_CHAR_DATASTREAM);

        tokio::spawn(async move {
            let mut sequence: u8 = 0;
            loop {
                tokio::time::sleep(period).await;
                let target = {
                    let state = state.lock().unwrap_or_else(|e| e.into_inner());
                    stream_target(&state, connection, &address, datastream)
                };
                let handle = match target {
                    StreamTarget::Closed => break,
                    StreamTarget::Muted => continue,
                    StreamTarget::Handle(handle) => handle,
                };

                let value = synthetic_frame(sequence);
                sequence = sequence.wrapping_add(1);
                if events
                    .send(TransportEvent::AttributeValue {
                        connection,
                        handle,
                        value,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
    }
}

enum StreamTarget {
    Closed,
    Muted,
    Handle(u16),
}

fn stream_target(
    state: &RadioState,
    connection: u8,
    address: &DeviceAddress,
    datastream: Option<AttributeUuid>,
) -> StreamTarget {
    if state.connections.get(&connection) != Some(address) {
        return StreamTarget::Closed;
    }
    let peripheral = match state.peripheral(address) {
        Some(p) => p,
        None => return StreamTarget::Closed,
    };
    let enabled = peripheral
        .attributes
        .iter()
        .any(|a| a.uuid == CCC_UUID && a.value == NOTIFICATIONS_ENABLED);
    match datastream.and_then(|uuid| peripheral.handle_of(&uuid)) {
        Some(handle) if enabled => StreamTarget::Handle(handle),
        _ => StreamTarget::Muted,
    }
}

fn established(connection: u8, address: DeviceAddress) -> TransportEvent {
    TransportEvent::ConnectionStatus {
        connection,
        flags: ConnectionFlags(ConnectionFlags::CONNECTED | ConnectionFlags::COMPLETED),
        address,
        conn_interval: 60,
        timeout: 700,
        latency: 9,
        bonding: 0xFF,
    }
}

/// Two accelerometer samples with all axes valid.
fn synthetic_frame(sequence: u8) -> Vec<u8> {
    let mut frame = vec![0x72, sequence];
    let base = sequence as i16;
    for triple in [[base * 4, -base * 2, 1366], [base * 4 + 1, -base * 2 - 1, 1365]] {
        for value in triple {
            frame.extend_from_slice(&value.to_le_bytes());
        }
    }
    frame
}

#[async_trait]
impl CommandTransport for SimulatedRadio {
    async fn submit(&self, command: Command, timeout: Duration) -> Result<Response, TransportError> {
        let name = command.name();
        debug!("Simulated radio <- {} (timeout {:?})", name, timeout);

        let mut pending = Vec::new();
        let mut stream = None;
        let response = {
            let mut state = self.lock();
            state.log.push(command.clone());
            if let Some(error) = state.failures.get(name) {
                return Err(error.clone());
            }

            match command {
                Command::SystemHello
                | Command::GapSetMode { .. }
                | Command::GapSetScanParameters { .. } => Response::Ack,
                Command::SystemReset { .. } => {
                    let closed: Vec<u8> = state.connections.keys().copied().collect();
                    state.connections.clear();
                    state.scanning = false;
                    pending.extend(closed.into_iter().map(|connection| {
                        TransportEvent::Disconnected {
                            connection,
                            reason: REASON_LOCAL_HOST,
                        }
                    }));
                    Response::Ack
                }
                Command::GapDiscover { .. } => {
                    state.scanning = true;
                    pending.extend(state.peripherals.iter().map(|p| TransportEvent::Advertisement {
                        sender: p.address,
                        address_type: ADDRESS_TYPE_RANDOM,
                        rssi: p.rssi,
                        data: p.advertisement_data(),
                    }));
                    Response::Ack
                }
                Command::GapEndProcedure => {
                    state.scanning = false;
                    Response::Ack
                }
                Command::GapConnectDirect { address, .. } => {
                    let connection = if state.reuse_ids {
                        (0..=u8::MAX)
                            .find(|c| !state.connections.contains_key(c))
                            .unwrap_or(state.next_connection)
                    } else {
                        state.next_connection
                    };
                    state.next_connection = connection.wrapping_add(1);
                    state.connections.insert(connection, address);
                    if state.peripheral(&address).is_some() && !state.stalled.contains(&address) {
                        pending.push(established(connection, address));
                    }
                    Response::ConnectionOpened { connection }
                }
                Command::ConnectionDisconnect { connection } => {
                    if state.connections.remove(&connection).is_none() {
                        return Err(TransportError::Failed {
                            command: name,
                            code: ERROR_NOT_CONNECTED,
                        });
                    }
                    pending.push(TransportEvent::Disconnected {
                        connection,
                        reason: REASON_LOCAL_HOST,
                    });
                    Response::Ack
                }
                Command::AttClientFindInformation {
                    connection,
                    start,
                    end,
                } => {
                    let peripheral = state.connected_peripheral(connection, name)?;
                    pending.extend(
                        peripheral
                            .attributes
                            .iter()
                            .filter(|a| a.handle >= start && a.handle <= end)
                            .map(|a| TransportEvent::InformationFound {
                                connection,
                                handle: a.handle,
                                uuid: a.uuid.to_wire(),
                            }),
                    );
                    pending.push(TransportEvent::ProcedureCompleted {
                        connection,
                        result: 0,
                        handle: 0,
                    });
                    Response::Ack
                }
                Command::AttClientAttributeWrite {
                    connection,
                    handle,
                    data,
                } => {
                    let peripheral = state.connected_peripheral(connection, name)?;
                    let address = peripheral.address;
                    let attribute = peripheral
                        .attributes
                        .iter_mut()
                        .find(|a| a.handle == handle)
                        .ok_or(TransportError::Failed {
                            command: name,
                            code: ERROR_INVALID_HANDLE,
                        })?;
                    attribute.value = data.clone();

                    let start_uuid = AttributeCatalog::txw51().uuid_of(names::MEASURE_CHAR_START);
                    if Some(attribute.uuid) == start_uuid && data == [1] {
                        stream = state.stream_period.map(|period| (connection, address, period));
                    }

                    pending.push(TransportEvent::ProcedureCompleted {
                        connection,
                        result: 0,
                        handle,
                    });
                    Response::Ack
                }
                Command::AttClientReadByHandle { connection, handle } => {
                    let peripheral = state.connected_peripheral(connection, name)?;
                    let value = peripheral
                        .attributes
                        .iter()
                        .find(|a| a.handle == handle)
                        .map(|a| a.value.clone())
                        .ok_or(TransportError::Failed {
                            command: name,
                            code: ERROR_INVALID_HANDLE,
                        })?;
                    Response::AttributeValue { handle, value }
                }
            }
        };

        for event in pending {
            self.send(event);
        }
        if let Some((connection, address, period)) = stream {
            self.start_stream(connection, address, period);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeviceAddress {
        DeviceAddress::new([1, 2, 3, 4, 5, 6])
    }

    #[test]
    fn test_txw51_table_has_ccc_after_datastream() {
        let peripheral = SimulatedPeripheral::txw51(address(), -60);
        let catalog = AttributeCatalog::txw51();
        let stream = catalog.uuid_of(names::MEASURE_CHAR_DATASTREAM).unwrap();
        let stream_handle = peripheral.handle_of(&stream).unwrap();
        assert_eq!(peripheral.handle_of(&CCC_UUID), Some(stream_handle + 1));
        assert_eq!(peripheral.attributes.len(), catalog.len() + 2);
    }

    #[tokio::test]
    async fn test_connect_emits_status_event() {
        let (radio, mut events) = SimulatedRadio::new(vec![SimulatedPeripheral::txw51(address(), -60)]);
        let response = radio
            .submit(
                Command::GapConnectDirect {
                    address: address(),
                    address_type: ADDRESS_TYPE_RANDOM,
                    interval_min: 60,
                    interval_max: 75,
                    timeout: 700,
                    latency: 9,
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(response, Response::ConnectionOpened { connection: 0 });

        match events.try_recv().unwrap() {
            TransportEvent::ConnectionStatus { connection, flags, .. } => {
                assert_eq!(connection, 0);
                assert!(flags.is_established());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(radio.is_connected(&address()));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let (radio, _events) = SimulatedRadio::new(Vec::new());
        radio.fail_command(
            "system_hello",
            TransportError::Timeout {
                command: "system_hello",
                timeout_ms: 1000,
            },
        );
        let result = radio.submit(Command::SystemHello, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Timeout { .. })));
        assert_eq!(radio.command_count("system_hello"), 1);
    }

    #[test]
    fn test_synthetic_frame_layout() {
        let frame = synthetic_frame(3);
        assert_eq!(frame.len(), 2 + 2 * 6);
        assert_eq!(frame[0] & 0x0F, 2);
        assert_eq!(frame[1], 3);
    }
}
