//! Remote Device Session
//!
//! Per-peripheral connection state machine. Owns the connection id, the
//! GATT index of the current connection and the session timers. Every state
//! transition is reported as [`GatewayEvent::ConnectionStateChanged`].

use crate::domain::catalog::{AttributeCatalog, AttributeUuid, CCC_UUID, NOTIFICATIONS_ENABLED};
use crate::domain::gatt::GattIndex;
use crate::domain::models::{ConnectionState, DeviceAddress, GatewayEvent};
use crate::domain::settings::{ConnectionParameters, Settings};
use crate::error::{GatewayError, Result, TransportError};
use crate::infrastructure::bluetooth::protocol::{
    self, Command, ConnectionFlags, Response, TransportEvent, ADDRESS_TYPE_RANDOM, FIRST_HANDLE,
    LAST_HANDLE,
};
use crate::infrastructure::bluetooth::timer::{SessionTimers, TimerEvent, TimerKind, TimerSender};
use crate::infrastructure::bluetooth::transport::{submit_ack, CommandTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Timings and radio parameters a session needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub command_timeout: Duration,
    pub write_timeout: Duration,
    pub connection: ConnectionParameters,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            reconnect_backoff: Duration::from_millis(settings.reconnect_backoff_ms),
            command_timeout: Duration::from_millis(settings.command_timeout_ms),
            write_timeout: Duration::from_millis(settings.write_timeout_ms),
            connection: settings.connection,
        }
    }
}

/// Progress of attribute discovery on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    InProgress,
    Complete,
}

/// One known peripheral and its connection.
pub struct RemoteDeviceSession {
    address: DeviceAddress,
    address_type: u8,
    name: Option<String>,
    eligible: bool,
    last_seen: Instant,
    last_rssi: i8,

    state: ConnectionState,
    connection_id: Option<u8>,
    disconnect_requested: bool,
    /// A timed-out connect is being torn down. The connection id stays
    /// reserved until the dongle reports it closed.
    abandoning: bool,

    catalog: Arc<AttributeCatalog>,
    gatt: Option<GattIndex>,
    notify_handle: Option<u16>,
    discovery: DiscoveryState,

    timers: SessionTimers,
    transport: Arc<dyn CommandTransport>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    config: SessionConfig,
}

impl RemoteDeviceSession {
    pub fn new(
        address: DeviceAddress,
        transport: Arc<dyn CommandTransport>,
        events: mpsc::UnboundedSender<GatewayEvent>,
        timer_sender: TimerSender,
        catalog: Arc<AttributeCatalog>,
        config: SessionConfig,
    ) -> Self {
        Self {
            address,
            address_type: ADDRESS_TYPE_RANDOM,
            name: None,
            eligible: false,
            last_seen: Instant::now(),
            last_rssi: 0,
            state: ConnectionState::Disconnected,
            connection_id: None,
            disconnect_requested: false,
            abandoning: false,
            catalog,
            gatt: None,
            notify_handle: None,
            discovery: DiscoveryState::Idle,
            timers: SessionTimers::new(address, timer_sender),
            transport,
            events,
            config,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    pub fn set_eligible(&mut self, eligible: bool) {
        self.eligible = eligible;
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn last_rssi(&self) -> i8 {
        self.last_rssi
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection_id(&self) -> Option<u8> {
        self.connection_id
    }

    pub fn gatt(&self) -> Option<&GattIndex> {
        self.gatt.as_ref()
    }

    pub fn notify_handle(&self) -> Option<u16> {
        self.notify_handle
    }

    pub fn discovery(&self) -> DiscoveryState {
        self.discovery
    }

    pub fn is_reconnect_scheduled(&self) -> bool {
        self.timers.is_armed(TimerKind::Reconnect)
    }

    pub fn is_connect_timer_armed(&self) -> bool {
        self.timers.is_armed(TimerKind::ConnectTimeout)
    }

    pub fn is_polling(&self) -> bool {
        self.timers.is_armed(TimerKind::Poll)
    }

    /// Identity taken from the first advertisement.
    pub fn set_identity(&mut self, name: Option<String>, address_type: u8) {
        self.name = name;
        self.address_type = address_type;
    }

    /// Record another advertisement sighting.
    pub fn observe(&mut self, rssi: i8) {
        self.last_seen = Instant::now();
        self.last_rssi = rssi;
    }

    /// The last disconnect was asked for by the caller. Such devices are
    /// left alone until connected explicitly again.
    pub fn was_disconnect_requested(&self) -> bool {
        self.disconnect_requested
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    fn change_state(&mut self, error: Option<GatewayError>, new_state: ConnectionState) {
        let old_state = self.state;
        self.state = new_state;

        match &error {
            Some(e) => warn!("Device {} is now {} due to error: {}", self.address, new_state, e),
            None => info!("Device {} is now {}", self.address, new_state),
        }

        self.emit(GatewayEvent::ConnectionStateChanged {
            address: self.address,
            error,
            new_state,
            old_state,
        });
    }

    /// Tear down per-connection state and land in DISCONNECTED.
    fn finish_disconnect(&mut self, error: Option<GatewayError>, reconnect: bool) {
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.timers.cancel(TimerKind::Poll);

        self.connection_id = None;
        self.abandoning = false;
        self.gatt = None;
        self.notify_handle = None;
        self.discovery = DiscoveryState::Idle;
        self.change_state(error, ConnectionState::Disconnected);

        if reconnect {
            self.schedule_reconnect();
        }
    }

    /// Arm the backoff timer. At most one reconnect is pending at a time.
    pub fn schedule_reconnect(&mut self) {
        info!(
            "Reconnecting to device {} in {:?}",
            self.address, self.config.reconnect_backoff
        );
        self.timers
            .arm_once(TimerKind::Reconnect, self.config.reconnect_backoff);
    }

    /// Accept or reject a timer event addressed to this session.
    pub fn accept_timer(&mut self, event: &TimerEvent) -> bool {
        self.timers.accept(event)
    }

    /// Issue a direct connect. The link is up once a connection status event
    /// with both `connected` and `completed` set arrives.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(GatewayError::NotReady(format!(
                "cannot connect device {} while {}",
                self.address, self.state
            )));
        }

        self.disconnect_requested = false;
        self.timers.cancel(TimerKind::Reconnect);
        self.change_state(None, ConnectionState::Connecting);

        let params = self.config.connection;
        let command = Command::GapConnectDirect {
            address: self.address,
            address_type: self.address_type,
            interval_min: params.interval_min,
            interval_max: params.interval_max,
            timeout: params.supervision_timeout,
            latency: params.latency,
        };

        let result = match self.transport.submit(command, self.config.command_timeout).await {
            Ok(Response::ConnectionOpened { connection }) => Ok(connection),
            Ok(_) => Err(TransportError::UnexpectedResponse {
                command: "gap_connect_direct",
            }),
            Err(e) => Err(e),
        };

        match result {
            Ok(connection) => {
                debug!(
                    "Connect to {} accepted, connection id {}",
                    self.address, connection
                );
                self.connection_id = Some(connection);
                self.timers
                    .arm_once(TimerKind::ConnectTimeout, self.config.connect_timeout);
                Ok(())
            }
            Err(e) => {
                let error = GatewayError::from(e);
                self.finish_disconnect(Some(error.clone()), false);
                Err(error)
            }
        }
    }

    /// The link did not come up in time. Drop the attempt and retry later.
    ///
    /// The attempt ends in DISCONNECTING: the dongle reuses connection ids,
    /// so the id is only released once its disconnect event has arrived.
    /// A second expiry while still waiting for that event finishes the
    /// teardown anyway.
    pub async fn on_connect_timeout(&mut self) {
        match self.state {
            ConnectionState::Connecting => {}
            ConnectionState::Disconnecting if self.abandoning => {
                warn!(
                    "Device {} never confirmed the abandoned connect, releasing it",
                    self.address
                );
                let reconnect = !self.disconnect_requested;
                self.finish_disconnect(Some(GatewayError::ConnectTimeout), reconnect);
                return;
            }
            _ => return,
        }

        warn!(
            "Device {} not connected within {:?}, giving up this attempt",
            self.address, self.config.connect_timeout
        );

        let connection = match self.connection_id {
            Some(connection) => connection,
            None => {
                self.finish_disconnect(Some(GatewayError::ConnectTimeout), true);
                return;
            }
        };

        self.abandoning = true;
        self.change_state(None, ConnectionState::Disconnecting);

        let command = Command::ConnectionDisconnect { connection };
        if let Err(e) = submit_ack(self.transport.as_ref(), command, self.config.command_timeout).await {
            warn!("Disconnect after connect timeout failed for {}: {}", self.address, e);
            self.finish_disconnect(Some(GatewayError::ConnectTimeout), true);
            return;
        }
        self.timers
            .arm_once(TimerKind::ConnectTimeout, self.config.connect_timeout);
    }

    /// Caller-initiated disconnect. Never followed by an automatic reconnect.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.disconnect_requested = true;
        self.timers.cancel(TimerKind::Reconnect);

        match self.state {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => return Ok(()),
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        let connection = match self.connection_id {
            Some(connection) => connection,
            None => {
                // Connect request never made it to the radio.
                self.finish_disconnect(None, false);
                return Ok(());
            }
        };

        self.timers.cancel(TimerKind::ConnectTimeout);
        self.timers.cancel(TimerKind::Poll);
        self.change_state(None, ConnectionState::Disconnecting);

        let command = Command::ConnectionDisconnect { connection };
        if let Err(e) = submit_ack(self.transport.as_ref(), command, self.config.command_timeout).await {
            let error = GatewayError::from(e);
            self.finish_disconnect(Some(error.clone()), false);
            return Err(error);
        }
        Ok(())
    }

    /// Feed an event routed to this session by connection id.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionStatus {
                flags,
                conn_interval,
                timeout,
                latency,
                ..
            } => self.on_connection_status(flags, conn_interval, timeout, latency),
            TransportEvent::Disconnected { reason, .. } => self.on_disconnected(reason),
            TransportEvent::InformationFound { handle, uuid, .. } => {
                self.on_information_found(handle, &uuid)
            }
            TransportEvent::AttributeValue { handle, value, .. } => {
                self.on_attribute_value(handle, value)
            }
            TransportEvent::ProcedureCompleted { result, .. } => self.on_procedure_completed(result),
            TransportEvent::Advertisement { .. } => {}
        }
    }

    fn on_connection_status(
        &mut self,
        flags: ConnectionFlags,
        conn_interval: u16,
        timeout: u16,
        latency: u16,
    ) {
        if flags.is_established() && self.state == ConnectionState::Connecting {
            self.timers.cancel(TimerKind::ConnectTimeout);
            self.change_state(None, ConnectionState::Connected);
        } else {
            debug!(
                "Device {} connection status flags {:#04x}, interval {}, timeout {}, latency {}",
                self.address, flags.0, conn_interval, timeout, latency
            );
        }
    }

    fn on_disconnected(&mut self, reason: u16) {
        if self.state == ConnectionState::Disconnected {
            debug!("Ignoring disconnect of already disconnected {}", self.address);
            return;
        }

        let expected = self.state == ConnectionState::Disconnecting && self.disconnect_requested;
        if self.abandoning && !expected {
            self.finish_disconnect(Some(GatewayError::ConnectTimeout), true);
            return;
        }

        let error = if expected {
            None
        } else {
            Some(GatewayError::ConnectionLost(format!(
                "{} ({:#06x})",
                protocol::describe_reason(reason),
                reason
            )))
        };

        self.finish_disconnect(error, !expected);
    }

    fn on_information_found(&mut self, handle: u16, uuid: &[u8]) {
        let uuid = match AttributeUuid::from_wire(uuid) {
            Some(uuid) => uuid,
            None => {
                warn!(
                    "Device {} reported attribute {:#06x} with a {}-byte uuid",
                    self.address,
                    handle,
                    uuid.len()
                );
                return;
            }
        };

        let gatt = match self.gatt.as_mut() {
            Some(gatt) => gatt,
            None => {
                warn!("Device {} sent discovery results without a GATT index", self.address);
                return;
            }
        };

        if uuid == CCC_UUID {
            // The data stream CCC is the last one the node reports.
            self.notify_handle = Some(handle);
        }
        let attribute = gatt.assign_handle(uuid, handle);
        trace!("Device {} {} -> {:#06x}", self.address, attribute.name, handle);
    }

    fn on_attribute_value(&mut self, handle: u16, value: Vec<u8>) {
        trace!("Device {} value {:#06x}: {:02x?}", self.address, handle, value);

        let name = match self.gatt.as_mut().and_then(|g| g.record_value(handle, &value)) {
            Some(attribute) => attribute.name.clone(),
            None => {
                warn!(
                    "Device {} value for unresolved handle {:#06x} dropped",
                    self.address, handle
                );
                return;
            }
        };

        self.emit(GatewayEvent::AttributeValueReceived {
            address: self.address,
            name,
            value,
        });
    }

    fn on_procedure_completed(&mut self, result: u16) {
        if self.discovery != DiscoveryState::InProgress {
            trace!("Device {} procedure completed ({:#06x})", self.address, result);
            return;
        }

        if result != 0 {
            warn!(
                "Device {} attribute discovery ended with result {:#06x}",
                self.address, result
            );
        }

        self.discovery = DiscoveryState::Complete;
        let (resolved, total) = self
            .gatt
            .as_ref()
            .map(|g| (g.resolved_count(), g.declared_count()))
            .unwrap_or((0, 0));
        info!(
            "Device {} GATT index loaded, {}/{} attributes resolved",
            self.address, resolved, total
        );

        self.emit(GatewayEvent::GattDiscoveryCompleted {
            address: self.address,
            resolved,
            total,
        });
    }

    fn require_connected(&self, action: &str) -> Result<u8> {
        match (self.state, self.connection_id) {
            (ConnectionState::Connected, Some(connection)) => Ok(connection),
            _ => Err(GatewayError::NotReady(format!(
                "cannot {} on device {} while {}",
                action, self.address, self.state
            ))),
        }
    }

    /// Start attribute discovery. Results arrive as events; the call only
    /// covers issuing the request. A cached index is kept unless
    /// `force_reload` is set.
    pub async fn read_gatt_index(
        &mut self,
        catalog: &Arc<AttributeCatalog>,
        force_reload: bool,
    ) -> Result<()> {
        let connection = self.require_connected("read the GATT index")?;

        if self.gatt.is_some() && !force_reload {
            return Ok(());
        }

        info!("Device {} reloading GATT handle index", self.address);
        self.catalog = Arc::clone(catalog);
        self.gatt = Some(GattIndex::new(&self.catalog));
        self.notify_handle = None;
        self.discovery = DiscoveryState::InProgress;

        let command = Command::AttClientFindInformation {
            connection,
            start: FIRST_HANDLE,
            end: LAST_HANDLE,
        };
        if let Err(e) = submit_ack(self.transport.as_ref(), command, self.config.command_timeout).await {
            self.gatt = None;
            self.notify_handle = None;
            self.discovery = DiscoveryState::Idle;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn enable_notifications(&mut self) -> Result<()> {
        let connection = self.require_connected("enable notifications")?;
        let handle = self.notify_handle.ok_or_else(|| {
            GatewayError::NotReady(format!(
                "no client characteristic configuration handle on device {}",
                self.address
            ))
        })?;

        let command = Command::AttClientAttributeWrite {
            connection,
            handle,
            data: NOTIFICATIONS_ENABLED.to_vec(),
        };
        submit_ack(self.transport.as_ref(), command, self.config.write_timeout).await?;
        info!("Device {} notifications enabled", self.address);
        Ok(())
    }

    /// Resolve a name to `(connection, handle)` for a read or write.
    fn resolve(&self, name: &str, action: &str) -> Result<(u8, u16)> {
        let declared = self.catalog.contains(name)
            || self.gatt.as_ref().map_or(false, |g| g.by_name(name).is_some());
        if !declared {
            return Err(GatewayError::UnknownAttribute(name.to_string()));
        }

        let connection = self.require_connected(action)?;

        match self.gatt.as_ref().and_then(|g| g.by_name(name)) {
            Some(attribute) if attribute.is_resolved() => Ok((connection, attribute.handle)),
            _ => Err(GatewayError::UnresolvedHandle(name.to_string())),
        }
    }

    pub async fn write_attribute(&mut self, name: &str, value: &[u8]) -> Result<()> {
        let (connection, handle) = self.resolve(name, "write an attribute")?;
        debug!("Device {} write {} = {:02x?}", self.address, name, value);

        let command = Command::AttClientAttributeWrite {
            connection,
            handle,
            data: value.to_vec(),
        };
        submit_ack(self.transport.as_ref(), command, self.config.write_timeout).await?;
        Ok(())
    }

    pub async fn read_attribute(&mut self, name: &str) -> Result<Vec<u8>> {
        let (connection, handle) = self.resolve(name, "read an attribute")?;

        let command = Command::AttClientReadByHandle { connection, handle };
        match self.transport.submit(command, self.config.write_timeout).await? {
            Response::AttributeValue { value, .. } => {
                if let Some(gatt) = self.gatt.as_mut() {
                    gatt.record_value(handle, &value);
                }
                debug!("Device {} read {} = {:02x?}", self.address, name, value);
                Ok(value)
            }
            _ => Err(TransportError::UnexpectedResponse {
                command: "attclient_read_by_handle",
            }
            .into()),
        }
    }

    /// Repeating timer that emits `PollDue` while connected.
    pub fn start_polling(&mut self, interval: Duration) -> Result<()> {
        self.require_connected("start polling")?;
        self.timers.arm_repeating(TimerKind::Poll, interval);
        Ok(())
    }

    pub fn stop_polling(&mut self) {
        self.timers.cancel(TimerKind::Poll);
    }
}

impl std::fmt::Debug for RemoteDeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDeviceSession")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("notify_handle", &self.notify_handle)
            .field("discovery", &self.discovery)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::names;
    use crate::infrastructure::bluetooth::simulator::{
        SimulatedPeripheral, SimulatedRadio, REASON_TIMEOUT,
    };
    use crate::infrastructure::bluetooth::timer::TimerReceiver;
    use crate::infrastructure::bluetooth::transport::EventReceiver;

    const ADDRESS: DeviceAddress = DeviceAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    struct Harness {
        radio: Arc<SimulatedRadio>,
        notifications: EventReceiver,
        events: mpsc::UnboundedReceiver<GatewayEvent>,
        timers: TimerReceiver,
        catalog: Arc<AttributeCatalog>,
        session: RemoteDeviceSession,
    }

    impl Harness {
        fn new() -> Self {
            let (radio, notifications) =
                SimulatedRadio::new(vec![SimulatedPeripheral::txw51(ADDRESS, -60)]);
            let (events_tx, events) = mpsc::unbounded_channel();
            let (timer_tx, timers) = mpsc::unbounded_channel();
            let catalog = Arc::new(AttributeCatalog::txw51());
            let session = RemoteDeviceSession::new(
                ADDRESS,
                radio.clone(),
                events_tx,
                timer_tx,
                Arc::clone(&catalog),
                SessionConfig::default(),
            );
            Self {
                radio,
                notifications,
                events,
                timers,
                catalog,
                session,
            }
        }

        /// Route every queued radio event to the session.
        fn feed(&mut self) {
            while let Ok(event) = self.notifications.try_recv() {
                self.session.handle_event(event);
            }
        }

        fn drain(&mut self) -> Vec<GatewayEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn transitions(&mut self) -> Vec<(ConnectionState, Option<GatewayError>)> {
            self.drain()
                .into_iter()
                .filter_map(|event| match event {
                    GatewayEvent::ConnectionStateChanged {
                        new_state, error, ..
                    } => Some((new_state, error)),
                    _ => None,
                })
                .collect()
        }

        async fn connected(mut self) -> Self {
            self.session.connect().await.unwrap();
            self.feed();
            assert_eq!(self.session.state(), ConnectionState::Connected);
            self.drain();
            self
        }

        async fn discovered(mut self) -> Self {
            let catalog = Arc::clone(&self.catalog);
            self.session.read_gatt_index(&catalog, true).await.unwrap();
            self.feed();
            assert_eq!(self.session.discovery(), DiscoveryState::Complete);
            self.drain();
            self
        }
    }

    #[tokio::test]
    async fn test_connect_reaches_connected() {
        let mut h = Harness::new();
        h.session.connect().await.unwrap();
        assert_eq!(h.session.state(), ConnectionState::Connecting);
        assert!(h.session.is_connect_timer_armed());

        h.feed();
        assert_eq!(h.session.state(), ConnectionState::Connected);
        assert!(!h.session.is_connect_timer_armed());
        assert_eq!(h.session.connection_id(), Some(0));
        assert_eq!(
            h.transitions(),
            vec![
                (ConnectionState::Connecting, None),
                (ConnectionState::Connected, None)
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_when_not_disconnected_is_rejected() {
        let mut h = Harness::new().connected().await;
        let result = h.session.connect().await;
        assert!(matches!(result, Err(GatewayError::NotReady(_))));
        assert_eq!(h.radio.command_count("gap_connect_direct"), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_command_lands_disconnected() {
        let mut h = Harness::new();
        let failure = TransportError::Timeout {
            command: "gap_connect_direct",
            timeout_ms: 10_000,
        };
        h.radio.fail_command("gap_connect_direct", failure.clone());

        let result = h.session.connect().await;
        assert_eq!(result, Err(GatewayError::Transport(failure.clone())));
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(!h.session.is_reconnect_scheduled());
        assert_eq!(
            h.transitions(),
            vec![
                (ConnectionState::Connecting, None),
                (
                    ConnectionState::Disconnected,
                    Some(GatewayError::Transport(failure))
                )
            ]
        );
    }

    #[tokio::test]
    async fn test_gatt_index_resolves_catalog_and_notify_handle() {
        let mut h = Harness::new().connected().await;
        let catalog = Arc::clone(&h.catalog);
        h.session.read_gatt_index(&catalog, false).await.unwrap();
        assert_eq!(h.session.discovery(), DiscoveryState::InProgress);
        h.feed();

        let gatt = h.session.gatt().unwrap();
        assert_eq!(gatt.resolved_count(), catalog.len());
        assert!(h.session.notify_handle().is_some());

        match h.drain().as_slice() {
            [GatewayEvent::GattDiscoveryCompleted {
                resolved, total, ..
            }] => assert_eq!(resolved, total),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cached_gatt_index_is_not_reloaded() {
        let mut h = Harness::new().connected().await.discovered().await;
        let catalog = Arc::clone(&h.catalog);

        h.session.read_gatt_index(&catalog, false).await.unwrap();
        assert_eq!(h.radio.command_count("attclient_find_information"), 1);

        h.session.read_gatt_index(&catalog, true).await.unwrap();
        assert_eq!(h.radio.command_count("attclient_find_information"), 2);
    }

    #[tokio::test]
    async fn test_failed_discovery_request_is_not_cached() {
        let mut h = Harness::new().connected().await;
        let catalog = Arc::clone(&h.catalog);
        let failure = TransportError::Timeout {
            command: "attclient_find_information",
            timeout_ms: 1_000,
        };
        h.radio
            .fail_command("attclient_find_information", failure.clone());

        let result = h.session.read_gatt_index(&catalog, false).await;
        assert_eq!(result, Err(GatewayError::Transport(failure)));
        assert!(h.session.gatt().is_none());
        assert_eq!(h.session.discovery(), DiscoveryState::Idle);

        h.radio.clear_failures();
        h.session.read_gatt_index(&catalog, false).await.unwrap();
        assert_eq!(h.radio.command_count("attclient_find_information"), 2);

        h.feed();
        assert_eq!(h.session.discovery(), DiscoveryState::Complete);
        assert_eq!(h.session.gatt().unwrap().resolved_count(), catalog.len());
        assert!(matches!(
            h.drain().as_slice(),
            [GatewayEvent::GattDiscoveryCompleted { .. }]
        ));
    }

    #[tokio::test]
    async fn test_gatt_index_requires_connection() {
        let mut h = Harness::new();
        let catalog = Arc::clone(&h.catalog);
        let result = h.session.read_gatt_index(&catalog, false).await;
        assert!(matches!(result, Err(GatewayError::NotReady(_))));
        assert!(h.radio.commands().is_empty());
    }

    #[tokio::test]
    async fn test_attribute_errors_send_nothing() {
        let mut h = Harness::new().connected().await;
        let sent = h.radio.commands().len();

        let unknown = h.session.write_attribute("NO_SUCH_ATTRIBUTE", &[1]).await;
        assert_eq!(
            unknown,
            Err(GatewayError::UnknownAttribute("NO_SUCH_ATTRIBUTE".into()))
        );

        let unknown = h.session.read_attribute("NO_SUCH_ATTRIBUTE").await;
        assert_eq!(
            unknown,
            Err(GatewayError::UnknownAttribute("NO_SUCH_ATTRIBUTE".into()))
        );

        let unresolved = h.session.read_attribute(names::LSM330_CHAR_ACC_EN).await;
        assert_eq!(
            unresolved,
            Err(GatewayError::UnresolvedHandle(names::LSM330_CHAR_ACC_EN.into()))
        );

        let notify = h.session.enable_notifications().await;
        assert!(matches!(notify, Err(GatewayError::NotReady(_))));
        assert_eq!(h.radio.commands().len(), sent);
    }

    #[tokio::test]
    async fn test_write_then_read_attribute() {
        let mut h = Harness::new().connected().await.discovered().await;
        h.session
            .write_attribute(names::LSM330_CHAR_ACC_FSCALE, &[3])
            .await
            .unwrap();
        let value = h
            .session
            .read_attribute(names::LSM330_CHAR_ACC_FSCALE)
            .await
            .unwrap();
        assert_eq!(value, vec![3]);

        let cached = h
            .session
            .gatt()
            .and_then(|g| g.by_name(names::LSM330_CHAR_ACC_FSCALE))
            .and_then(|a| a.last_value.clone());
        assert_eq!(cached, Some(vec![3]));
    }

    #[tokio::test]
    async fn test_notification_is_reported_by_name() {
        let mut h = Harness::new().connected().await.discovered().await;
        h.session.enable_notifications().await.unwrap();
        h.feed();
        h.drain();

        let stream = h.catalog.uuid_of(names::MEASURE_CHAR_DATASTREAM).unwrap();
        assert!(h.radio.notify(&ADDRESS, &stream, vec![0x01, 0x00, 1, 0, 2, 0, 3, 0]));
        h.feed();

        match h.drain().as_slice() {
            [GatewayEvent::AttributeValueReceived { name, value, .. }] => {
                assert_eq!(name, names::MEASURE_CHAR_DATASTREAM);
                assert_eq!(value.len(), 8);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_link_loss_schedules_reconnect() {
        let mut h = Harness::new().connected().await.discovered().await;
        assert!(h.radio.drop_link(&ADDRESS, REASON_TIMEOUT));
        h.feed();

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert_eq!(h.session.connection_id(), None);
        assert!(h.session.gatt().is_none());
        assert!(h.session.is_reconnect_scheduled());
        match h.transitions().as_slice() {
            [(ConnectionState::Disconnected, Some(GatewayError::ConnectionLost(_)))] => {}
            other => panic!("unexpected transitions {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requested_disconnect_does_not_reconnect() {
        let mut h = Harness::new().connected().await;
        h.session.start_polling(Duration::from_secs(5)).unwrap();

        h.session.disconnect().await.unwrap();
        assert_eq!(h.session.state(), ConnectionState::Disconnecting);
        assert!(!h.session.is_polling());
        h.feed();

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(h.session.was_disconnect_requested());
        assert!(!h.session.is_reconnect_scheduled());
        assert_eq!(
            h.transitions(),
            vec![
                (ConnectionState::Disconnecting, None),
                (ConnectionState::Disconnected, None)
            ]
        );

        // Nothing left to tear down.
        h.session.disconnect().await.unwrap();
        assert_eq!(h.radio.command_count("connection_disconnect"), 1);
    }

    #[tokio::test]
    async fn test_link_failure_while_connecting_schedules_one_reconnect() {
        let mut h = Harness::new();
        h.radio.stall_connections(ADDRESS);
        h.session.connect().await.unwrap();
        assert!(h.radio.drop_link(&ADDRESS, REASON_TIMEOUT));
        h.feed();

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(!h.session.is_connect_timer_armed());
        assert!(h.session.is_reconnect_scheduled());
        match h.transitions().as_slice() {
            [(ConnectionState::Connecting, None), (ConnectionState::Disconnected, Some(GatewayError::ConnectionLost(_)))] => {}
            other => panic!("unexpected transitions {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_caller_disconnect_while_connecting_schedules_nothing() {
        let mut h = Harness::new();
        h.radio.stall_connections(ADDRESS);
        h.session.connect().await.unwrap();

        h.session.disconnect().await.unwrap();
        h.feed();

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(!h.session.is_connect_timer_armed());
        assert!(!h.session.is_reconnect_scheduled());
        assert_eq!(
            h.transitions().last(),
            Some(&(ConnectionState::Disconnected, None))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_gives_up_and_retries() {
        let mut h = Harness::new();
        h.radio.stall_connections(ADDRESS);
        h.session.connect().await.unwrap();
        h.feed();
        assert_eq!(h.session.state(), ConnectionState::Connecting);

        let event = h.timers.recv().await.unwrap();
        assert_eq!(event.kind, TimerKind::ConnectTimeout);
        assert!(h.session.accept_timer(&event));
        h.session.on_connect_timeout().await;

        // The id stays claimed until the dongle confirms the close.
        assert_eq!(h.session.state(), ConnectionState::Disconnecting);
        assert_eq!(h.session.connection_id(), Some(0));
        assert!(!h.session.is_reconnect_scheduled());
        assert_eq!(h.radio.command_count("connection_disconnect"), 1);

        h.feed();
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert_eq!(h.session.connection_id(), None);
        assert!(h.session.is_reconnect_scheduled());
        assert!(!h.session.is_connect_timer_armed());
        assert_eq!(
            h.transitions(),
            vec![
                (ConnectionState::Connecting, None),
                (ConnectionState::Disconnecting, None),
                (
                    ConnectionState::Disconnected,
                    Some(GatewayError::ConnectTimeout)
                )
            ]
        );

        let event = h.timers.recv().await.unwrap();
        assert_eq!(event.kind, TimerKind::Reconnect);
        assert!(h.session.accept_timer(&event));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_connect_is_released_without_disconnect_event() {
        let mut h = Harness::new();
        h.radio.stall_connections(ADDRESS);
        h.session.connect().await.unwrap();

        let event = h.timers.recv().await.unwrap();
        assert!(h.session.accept_timer(&event));
        h.session.on_connect_timeout().await;
        assert_eq!(h.session.state(), ConnectionState::Disconnecting);

        // Lose the dongle's disconnect event.
        while h.notifications.try_recv().is_ok() {}

        let event = h.timers.recv().await.unwrap();
        assert_eq!(event.kind, TimerKind::ConnectTimeout);
        assert!(h.session.accept_timer(&event));
        h.session.on_connect_timeout().await;

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert_eq!(h.session.connection_id(), None);
        assert!(h.session.is_reconnect_scheduled());
        assert_eq!(h.radio.command_count("connection_disconnect"), 1);
        assert_eq!(
            h.transitions().last(),
            Some(&(
                ConnectionState::Disconnected,
                Some(GatewayError::ConnectTimeout)
            ))
        );
    }

    #[tokio::test]
    async fn test_polling_requires_connection() {
        let mut h = Harness::new();
        assert!(matches!(
            h.session.start_polling(Duration::from_secs(1)),
            Err(GatewayError::NotReady(_))
        ));
        assert!(!h.session.is_polling());
    }
}
