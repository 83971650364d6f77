//! Link Layer Controller
//!
//! Owns the transport and the device registry. Drives scanning, reset and
//! the one-connect-at-a-time policy, and routes dongle events and timer
//! events to the sessions they belong to.

use crate::domain::catalog::AttributeCatalog;
use crate::domain::models::{
    ConnectionState, DeviceAddress, GatewayEvent, LinkLayerState, ScannedDevice,
};
use crate::domain::settings::{ScanParameters, Settings};
use crate::error::{GatewayError, Result};
use crate::infrastructure::bluetooth::connection::{RemoteDeviceSession, SessionConfig};
use crate::infrastructure::bluetooth::protocol::{
    Command, TransportEvent, ADDRESS_TYPE_RANDOM, DISCOVER_GENERIC, GAP_NON_CONNECTABLE,
    GAP_NON_DISCOVERABLE,
};
use crate::infrastructure::bluetooth::registry::DeviceRegistry;
use crate::infrastructure::bluetooth::scanner::{self, NameFilter};
use crate::infrastructure::bluetooth::timer::{TimerEvent, TimerKind, TimerReceiver, TimerSender};
use crate::infrastructure::bluetooth::transport::{submit_ack, CommandTransport, EventReceiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Controller-level settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub session: SessionConfig,
    pub name_filter: NameFilter,
    pub scan: ScanParameters,
    pub hello_timeout: Duration,
    pub reset_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ControllerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            session: SessionConfig::from(settings),
            name_filter: NameFilter::new(settings.name_filter.clone()),
            scan: settings.scan,
            hello_timeout: Duration::from_millis(settings.hello_timeout_ms),
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
            command_timeout: Duration::from_millis(settings.command_timeout_ms),
        }
    }
}

/// What the radio is doing besides holding connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RadioRole {
    Idle,
    Scanning,
    Advertising,
}

/// Work item for the controller.
#[derive(Debug, Clone)]
pub enum ControllerInput {
    Transport(TransportEvent),
    Timer(TimerEvent),
}

pub struct LinkLayerController {
    transport: Arc<dyn CommandTransport>,
    notifications: EventReceiver,
    timer_sender: TimerSender,
    timer_receiver: TimerReceiver,
    events: mpsc::UnboundedSender<GatewayEvent>,
    registry: DeviceRegistry,
    catalog: Arc<AttributeCatalog>,
    config: ControllerConfig,
    role: RadioRole,
    state: LinkLayerState,
}

impl LinkLayerController {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        notifications: EventReceiver,
        events: mpsc::UnboundedSender<GatewayEvent>,
        config: ControllerConfig,
        catalog: Arc<AttributeCatalog>,
    ) -> Self {
        let (timer_sender, timer_receiver) = mpsc::unbounded_channel();
        Self {
            transport,
            notifications,
            timer_sender,
            timer_receiver,
            events,
            registry: DeviceRegistry::new(),
            catalog,
            config,
            role: RadioRole::Idle,
            state: LinkLayerState::Standby,
        }
    }

    pub fn state(&self) -> LinkLayerState {
        self.state
    }

    pub fn catalog(&self) -> &Arc<AttributeCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn session(&self, address: &DeviceAddress) -> Option<&RemoteDeviceSession> {
        self.registry.get(address)
    }

    pub fn is_scanning(&self) -> bool {
        self.role == RadioRole::Scanning
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    /// Recompute the link-layer state from the radio role and the sessions.
    fn refresh_link_state(&mut self, error: Option<GatewayError>) {
        let sessions = || self.registry.iter().map(|s| s.state());
        let new_state = if sessions().any(|s| s == ConnectionState::Connecting) {
            LinkLayerState::Connecting
        } else if self.role == RadioRole::Scanning {
            LinkLayerState::Scanning
        } else if self.role == RadioRole::Advertising {
            LinkLayerState::Advertising
        } else if sessions().any(|s| s == ConnectionState::Connected) {
            LinkLayerState::Connected
        } else {
            LinkLayerState::Standby
        };

        if new_state == self.state {
            return;
        }

        let old_state = self.state;
        self.state = new_state;
        info!("Dongle link layer is now {}", new_state);
        self.emit(GatewayEvent::LinkLayerStateChanged {
            error,
            new_state,
            old_state,
        });
    }

    fn after_session_op(&mut self, address: &DeviceAddress) {
        self.registry.sync_connection(address);
        self.refresh_link_state(None);
    }

    fn session_mut(&mut self, address: &DeviceAddress) -> Result<&mut RemoteDeviceSession> {
        self.registry
            .get_mut(address)
            .ok_or(GatewayError::UnknownDevice(*address))
    }

    /// A device whose connection id is still claimed without an established
    /// link. The dongle hands out freed ids again, so a new connect has to
    /// wait until such an id is released.
    fn connect_in_flight(&self) -> Option<DeviceAddress> {
        self.registry
            .iter()
            .find(|s| {
                matches!(
                    s.state(),
                    ConnectionState::Connecting | ConnectionState::Disconnecting
                )
            })
            .map(|s| s.address())
    }

    /// Check the dongle is alive.
    pub async fn init(&mut self) -> Result<()> {
        submit_ack(
            self.transport.as_ref(),
            Command::SystemHello,
            self.config.hello_timeout,
        )
        .await?;
        info!("Dongle answered hello");
        Ok(())
    }

    /// Reset the dongle and forget every device.
    pub async fn reset(&mut self) -> Result<()> {
        submit_ack(
            self.transport.as_ref(),
            Command::SystemReset { boot_to_dfu: false },
            self.config.reset_timeout,
        )
        .await?;

        info!("Dongle reset, dropping {} known devices", self.registry.len());
        self.registry.clear();
        self.role = RadioRole::Idle;
        self.refresh_link_state(None);
        Ok(())
    }

    pub async fn start_scanning(&mut self) -> Result<()> {
        if self.role == RadioRole::Scanning {
            return Ok(());
        }

        let scan = self.config.scan;
        submit_ack(
            self.transport.as_ref(),
            Command::GapSetScanParameters {
                interval: scan.interval,
                window: scan.window,
                active: scan.active,
            },
            self.config.command_timeout,
        )
        .await?;
        submit_ack(
            self.transport.as_ref(),
            Command::GapDiscover {
                mode: DISCOVER_GENERIC,
            },
            self.config.command_timeout,
        )
        .await?;

        self.role = RadioRole::Scanning;
        self.refresh_link_state(None);
        Ok(())
    }

    pub async fn stop_scanning(&mut self) -> Result<()> {
        if self.role != RadioRole::Scanning {
            return Ok(());
        }

        submit_ack(
            self.transport.as_ref(),
            Command::GapEndProcedure,
            self.config.command_timeout,
        )
        .await?;

        self.role = RadioRole::Idle;
        self.refresh_link_state(None);
        Ok(())
    }

    /// Make the dongle non-discoverable and non-connectable.
    pub async fn stop_advertising(&mut self) -> Result<()> {
        submit_ack(
            self.transport.as_ref(),
            Command::GapSetMode {
                discoverable: GAP_NON_DISCOVERABLE,
                connectable: GAP_NON_CONNECTABLE,
            },
            self.config.command_timeout,
        )
        .await?;

        if self.role == RadioRole::Advertising {
            self.role = RadioRole::Idle;
        }
        self.refresh_link_state(None);
        Ok(())
    }

    /// Ask every device to disconnect and cancel pending reconnects. Does not
    /// wait for the links to go down. Returns the first failure after trying
    /// every device.
    pub async fn disconnect_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for address in self.registry.addresses() {
            if let Err(e) = self.disconnect(&address).await {
                warn!("Disconnecting {} failed: {}", address, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Register a sighting. Returns `true` when the address is new.
    pub fn on_advertisement(
        &mut self,
        address: DeviceAddress,
        rssi: i8,
        advertised_name: Option<String>,
    ) -> bool {
        self.register_sighting(address, ADDRESS_TYPE_RANDOM, rssi, advertised_name)
    }

    fn register_sighting(
        &mut self,
        address: DeviceAddress,
        address_type: u8,
        rssi: i8,
        name: Option<String>,
    ) -> bool {
        if let Some(session) = self.registry.get_mut(&address) {
            session.observe(rssi);
            return false;
        }

        let eligible = self.config.name_filter.accepts(name.as_deref());
        let mut session = RemoteDeviceSession::new(
            address,
            Arc::clone(&self.transport),
            self.events.clone(),
            self.timer_sender.clone(),
            Arc::clone(&self.catalog),
            self.config.session.clone(),
        );
        session.set_identity(name.clone(), address_type);
        session.set_eligible(eligible);
        session.observe(rssi);
        self.registry.insert(session);

        info!(
            "New device {} ({}) rssi {}{}",
            address,
            name.as_deref().unwrap_or("unnamed"),
            rssi,
            if eligible { "" } else { ", ignored by name filter" }
        );
        self.emit(GatewayEvent::DeviceFound(ScannedDevice {
            address,
            name,
            rssi,
            eligible,
        }));
        true
    }

    /// Connect the first eligible, disconnected device in sighting order.
    /// Does nothing while another connect or disconnect is in flight.
    /// Devices waiting out a reconnect backoff or parked by an explicit
    /// disconnect are skipped.
    /// Scanning is stopped first since the radio cannot do both.
    pub async fn connect_next_pending(&mut self) -> Result<Option<DeviceAddress>> {
        if let Some(busy) = self.connect_in_flight() {
            debug!("Connect to {} still in flight", busy);
            return Ok(None);
        }

        let next = self
            .registry
            .iter()
            .find(|s| {
                s.state() == ConnectionState::Disconnected
                    && s.is_eligible()
                    && !s.was_disconnect_requested()
                    && !s.is_reconnect_scheduled()
            })
            .map(|s| s.address());

        let address = match next {
            Some(address) => address,
            None => {
                debug!("No pending device to connect");
                return Ok(None);
            }
        };

        self.stop_scanning().await?;
        self.connect_session(&address).await?;
        Ok(Some(address))
    }

    /// Connect a specific device.
    pub async fn connect(&mut self, address: &DeviceAddress) -> Result<()> {
        if let Some(busy) = self.connect_in_flight() {
            return Err(GatewayError::NotReady(format!(
                "connect to {} still in flight",
                busy
            )));
        }
        self.stop_scanning().await?;
        self.connect_session(address).await
    }

    async fn connect_session(&mut self, address: &DeviceAddress) -> Result<()> {
        let result = self.session_mut(address)?.connect().await;
        self.after_session_op(address);
        result
    }

    pub async fn disconnect(&mut self, address: &DeviceAddress) -> Result<()> {
        let result = self.session_mut(address)?.disconnect().await;
        self.after_session_op(address);
        result
    }

    /// Disconnect a device and drop it from the registry.
    pub async fn forget(&mut self, address: &DeviceAddress) -> Result<()> {
        let result = self.disconnect(address).await;
        self.registry.remove(address);
        self.refresh_link_state(None);
        info!("Forgot device {}", address);
        result
    }

    pub async fn read_gatt_index(&mut self, address: &DeviceAddress, force_reload: bool) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        let result = self
            .session_mut(address)?
            .read_gatt_index(&catalog, force_reload)
            .await;
        self.after_session_op(address);
        result
    }

    pub async fn enable_notifications(&mut self, address: &DeviceAddress) -> Result<()> {
        let result = self.session_mut(address)?.enable_notifications().await;
        self.after_session_op(address);
        result
    }

    pub async fn read_attribute(&mut self, address: &DeviceAddress, name: &str) -> Result<Vec<u8>> {
        let result = self.session_mut(address)?.read_attribute(name).await;
        self.after_session_op(address);
        result
    }

    pub async fn write_attribute(
        &mut self,
        address: &DeviceAddress,
        name: &str,
        value: &[u8],
    ) -> Result<()> {
        let result = self.session_mut(address)?.write_attribute(name, value).await;
        self.after_session_op(address);
        result
    }

    pub fn start_polling(&mut self, address: &DeviceAddress, interval: Duration) -> Result<()> {
        self.session_mut(address)?.start_polling(interval)
    }

    pub fn stop_polling(&mut self, address: &DeviceAddress) -> Result<()> {
        self.session_mut(address)?.stop_polling();
        Ok(())
    }

    /// Route a dongle event. Events for unknown connections are dropped.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if let TransportEvent::Advertisement {
            sender,
            address_type,
            rssi,
            data,
        } = event
        {
            let name = scanner::advertised_name(&data);
            self.register_sighting(sender, address_type, rssi, name);
            return;
        }

        let connection = match event.connection() {
            Some(connection) => connection,
            None => return,
        };

        let address = match self.registry.address_for_connection(connection) {
            Some(address) => address,
            None => {
                warn!(
                    "Dropping {} event {} for unknown connection {}",
                    event.class(),
                    event.id(),
                    connection
                );
                return;
            }
        };

        if let Some(session) = self.registry.get_mut(&address) {
            session.handle_event(event);
        }
        self.after_session_op(&address);
    }

    pub async fn handle_timer(&mut self, event: TimerEvent) {
        let address = event.address;
        let accepted = match self.registry.get_mut(&address) {
            Some(session) => session.accept_timer(&event),
            None => false,
        };
        if !accepted {
            trace!("Stale {:?} timer for {} dropped", event.kind, address);
            return;
        }

        match event.kind {
            TimerKind::ConnectTimeout => {
                if let Some(session) = self.registry.get_mut(&address) {
                    session.on_connect_timeout().await;
                }
                self.after_session_op(&address);
            }
            TimerKind::Reconnect => self.reconnect(&address).await,
            TimerKind::Poll => self.emit(GatewayEvent::PollDue { address }),
        }
    }

    async fn reconnect(&mut self, address: &DeviceAddress) {
        let ready = self
            .registry
            .get(address)
            .map_or(false, |s| s.state() == ConnectionState::Disconnected);
        if !ready {
            return;
        }

        if let Some(busy) = self.connect_in_flight() {
            debug!("Reconnect of {} deferred, {} is connecting", address, busy);
            if let Some(session) = self.registry.get_mut(address) {
                session.schedule_reconnect();
            }
            return;
        }

        let result = match self.stop_scanning().await {
            Ok(()) => self.connect_session(address).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Reconnect to {} failed: {}", address, e);
            if let Some(session) = self.registry.get_mut(address) {
                session.schedule_reconnect();
            }
        }
    }

    /// Wait for the next dongle or timer event. `None` once the transport
    /// closed its event stream.
    pub async fn next_input(&mut self) -> Option<ControllerInput> {
        tokio::select! {
            event = self.notifications.recv() => event.map(ControllerInput::Transport),
            Some(timer) = self.timer_receiver.recv() => Some(ControllerInput::Timer(timer)),
        }
    }

    pub async fn dispatch(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Transport(event) => self.handle_transport_event(event),
            ControllerInput::Timer(event) => self.handle_timer(event).await,
        }
    }

    /// Handle everything already queued without waiting. Returns the number
    /// of inputs handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let input = match self.notifications.try_recv() {
                Ok(event) => ControllerInput::Transport(event),
                Err(_) => match self.timer_receiver.try_recv() {
                    Ok(timer) => ControllerInput::Timer(timer),
                    Err(_) => return handled,
                },
            };
            self.dispatch(input).await;
            handled += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::names;
    use crate::domain::sample;
    use crate::infrastructure::bluetooth::simulator::{SimulatedPeripheral, SimulatedRadio};

    const NODE: DeviceAddress = DeviceAddress::new([0xc0, 0xff, 0xee, 0x00, 0x00, 0x01]);

    fn setup(
        peripherals: Vec<SimulatedPeripheral>,
    ) -> (
        LinkLayerController,
        Arc<SimulatedRadio>,
        mpsc::UnboundedReceiver<GatewayEvent>,
    ) {
        let (radio, notifications) = SimulatedRadio::new(peripherals);
        let (events_tx, events) = mpsc::unbounded_channel();
        let controller = LinkLayerController::new(
            radio.clone(),
            notifications,
            events_tx,
            ControllerConfig::default(),
            Arc::new(AttributeCatalog::txw51()),
        );
        (controller, radio, events)
    }

    #[tokio::test]
    async fn test_scanning_is_idempotent() {
        let (mut controller, radio, _events) = setup(Vec::new());
        assert_eq!(controller.state(), LinkLayerState::Standby);

        controller.start_scanning().await.unwrap();
        controller.start_scanning().await.unwrap();
        assert_eq!(controller.state(), LinkLayerState::Scanning);
        assert_eq!(radio.command_count("gap_discover"), 1);

        controller.stop_scanning().await.unwrap();
        controller.stop_scanning().await.unwrap();
        assert_eq!(controller.state(), LinkLayerState::Standby);
        assert_eq!(radio.command_count("gap_end_procedure"), 1);

        controller.stop_advertising().await.unwrap();
        assert_eq!(controller.state(), LinkLayerState::Standby);
        assert_eq!(radio.command_count("gap_set_mode"), 1);
    }

    #[tokio::test]
    async fn test_init_reports_transport_failure() {
        let (mut controller, radio, _events) = setup(Vec::new());
        let failure = crate::error::TransportError::Timeout {
            command: "system_hello",
            timeout_ms: 1000,
        };
        radio.fail_command("system_hello", failure.clone());
        assert_eq!(controller.init().await, Err(GatewayError::Transport(failure)));
    }

    #[tokio::test]
    async fn test_repeated_sightings_update_one_entry() {
        let (mut controller, _radio, mut events) = setup(Vec::new());

        assert!(controller.on_advertisement(NODE, -70, Some("TXW51".into())));
        assert!(!controller.on_advertisement(NODE, -40, Some("TXW51".into())));
        assert!(!controller.on_advertisement(NODE, -55, None));

        assert_eq!(controller.registry().len(), 1);
        let session = controller.session(&NODE).unwrap();
        assert_eq!(session.last_rssi(), -55);
        assert!(session.is_eligible());

        let found = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, GatewayEvent::DeviceFound(_)))
            .count();
        assert_eq!(found, 1);
    }

    #[tokio::test]
    async fn test_only_one_connect_in_flight() {
        let other = DeviceAddress::new([0xc0, 0xff, 0xee, 0x00, 0x00, 0x02]);
        let (mut controller, radio, _events) = setup(vec![
            SimulatedPeripheral::txw51(NODE, -60),
            SimulatedPeripheral::txw51(other, -60),
        ]);
        radio.stall_connections(NODE);
        controller.on_advertisement(NODE, -60, Some("TXW51".into()));
        controller.on_advertisement(other, -60, Some("TXW51".into()));

        assert_eq!(controller.connect_next_pending().await, Ok(Some(NODE)));
        assert_eq!(controller.connect_next_pending().await, Ok(None));
        assert!(matches!(
            controller.connect(&other).await,
            Err(GatewayError::NotReady(_))
        ));
        assert_eq!(radio.command_count("gap_connect_direct"), 1);
        assert_eq!(controller.state(), LinkLayerState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_connection_id_is_not_handed_on_early() {
        let other = DeviceAddress::new([0xc0, 0xff, 0xee, 0x00, 0x00, 0x02]);
        let (mut controller, radio, _events) = setup(vec![
            SimulatedPeripheral::txw51(NODE, -60),
            SimulatedPeripheral::txw51(other, -60),
        ]);
        radio.reuse_connection_ids();
        radio.stall_connections(NODE);
        controller.on_advertisement(NODE, -60, Some("TXW51".into()));
        controller.on_advertisement(other, -60, Some("TXW51".into()));

        assert_eq!(controller.connect_next_pending().await, Ok(Some(NODE)));
        let timeout = controller.timer_receiver.recv().await.unwrap();
        assert_eq!(timeout.kind, TimerKind::ConnectTimeout);
        controller.handle_timer(timeout).await;

        // The dongle has not reported connection 0 closed yet.
        let session = controller.session(&NODE).unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnecting);
        assert_eq!(controller.registry().address_for_connection(0), Some(NODE));
        assert_eq!(controller.connect_next_pending().await, Ok(None));
        assert_eq!(radio.command_count("gap_connect_direct"), 1);

        controller.process_pending().await;
        let session = controller.session(&NODE).unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.is_reconnect_scheduled());

        assert_eq!(controller.connect_next_pending().await, Ok(Some(other)));
        controller.process_pending().await;
        assert_eq!(
            controller.session(&other).map(|s| s.state()),
            Some(ConnectionState::Connected)
        );
        assert_eq!(controller.registry().address_for_connection(0), Some(other));
        assert_eq!(
            controller.session(&NODE).map(|s| s.state()),
            Some(ConnectionState::Disconnected)
        );
        assert!(controller.registry().is_consistent());
    }

    #[tokio::test]
    async fn test_end_to_end_discovery_to_samples() {
        let (mut controller, radio, mut events) =
            setup(vec![SimulatedPeripheral::txw51(NODE, -60)]);

        controller.start_scanning().await.unwrap();
        controller.process_pending().await;
        assert_eq!(
            controller.session(&NODE).map(|s| s.state()),
            Some(ConnectionState::Disconnected)
        );

        assert_eq!(controller.connect_next_pending().await, Ok(Some(NODE)));
        assert!(!controller.is_scanning());
        controller.process_pending().await;
        assert_eq!(controller.state(), LinkLayerState::Connected);
        assert_eq!(controller.registry().address_for_connection(0), Some(NODE));

        controller.read_gatt_index(&NODE, false).await.unwrap();
        controller.process_pending().await;
        let session = controller.session(&NODE).unwrap();
        let gatt = session.gatt().unwrap();
        assert_eq!(gatt.resolved_count(), controller.catalog().len());
        // The generic device name attribute is kept under its hex name.
        assert_eq!(gatt.by_handle(3).map(|a| a.name.as_str()), Some("2a00"));

        controller.enable_notifications(&NODE).await.unwrap();
        controller.process_pending().await;
        while events.try_recv().is_ok() {}

        let stream = controller
            .catalog()
            .uuid_of(names::MEASURE_CHAR_DATASTREAM)
            .unwrap();
        let frame = vec![0x02, 7, 100, 0, 0xCE, 0xFF, 25, 0, 0xF6, 0xFF, 0, 0, 10, 0];
        assert!(radio.notify(&NODE, &stream, frame));
        controller.process_pending().await;

        let value = match events.try_recv() {
            Ok(GatewayEvent::AttributeValueReceived { name, value, .. }) => {
                assert_eq!(name, names::MEASURE_CHAR_DATASTREAM);
                value
            }
            other => panic!("unexpected event {:?}", other),
        };
        let samples = sample::decode(&value, sample::DEFAULT_ACC_SCALE).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].sequence_number, 7);
    }

    #[tokio::test]
    async fn test_forget_drops_device_and_its_connection() {
        let (mut controller, radio, _events) =
            setup(vec![SimulatedPeripheral::txw51(NODE, -60)]);
        controller.on_advertisement(NODE, -60, Some("TXW51".into()));
        controller.connect(&NODE).await.unwrap();
        controller.process_pending().await;

        controller.forget(&NODE).await.unwrap();
        controller.process_pending().await;

        assert!(controller.registry().is_empty());
        assert_eq!(controller.registry().address_for_connection(0), None);
        assert!(!radio.is_connected(&NODE));
        assert_eq!(controller.state(), LinkLayerState::Standby);
    }

    #[tokio::test]
    async fn test_events_for_unknown_connection_are_dropped() {
        let (mut controller, _radio, mut events) = setup(Vec::new());
        controller.handle_transport_event(TransportEvent::AttributeValue {
            connection: 9,
            handle: 0x20,
            value: vec![1],
        });
        assert!(events.try_recv().is_err());
    }
}
