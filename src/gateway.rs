//! Measurement Gateway
//!
//! Application layer on top of the link layer controller: connects every
//! sensor node it finds, loads its attribute table, starts measuring and
//! publishes what comes back.

use crate::domain::catalog::{names, AttributeCatalog};
use crate::domain::models::{ConnectionState, DeviceAddress, GatewayEvent, Sample};
use crate::domain::sample::{self, gyroscope_scale, AccelerometerRange, ScaleFactors};
use crate::domain::settings::Settings;
use crate::error::{GatewayError, Result};
use crate::infrastructure::bluetooth::transport::{CommandTransport, EventReceiver};
use crate::infrastructure::bluetooth::{ControllerConfig, ControllerInput, LinkLayerController};
use crate::infrastructure::publisher::{Publisher, Topics};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

/// Sample as published on the measurement topic.
#[derive(Serialize)]
struct Measurement<'a> {
    device: DeviceAddress,
    #[serde(flatten)]
    sample: &'a Sample,
}

/// Collects the device information reads of one node. Publishing waits until
/// the remaining-reads counter drops to zero.
#[derive(Debug, Default)]
pub struct DeviceInfoPlan {
    remaining: usize,
    values: BTreeMap<String, String>,
}

impl DeviceInfoPlan {
    pub fn new(reads: usize) -> Self {
        Self {
            remaining: reads,
            values: BTreeMap::new(),
        }
    }

    /// Record one finished read. Returns `true` when it was the last one.
    pub fn record(&mut self, name: &str, value: Option<&[u8]>) -> bool {
        let key = name
            .strip_prefix("DEVICE_INFO_CHAR_")
            .unwrap_or(name)
            .to_lowercase();
        if let Some(value) = value {
            let text = String::from_utf8_lossy(value)
                .trim_end_matches('\0')
                .to_string();
            self.values.insert(key, text);
        }
        self.remaining = self.remaining.saturating_sub(1);
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

enum GatewayInput {
    Event(GatewayEvent),
    Controller(ControllerInput),
    ScanWindowElapsed,
    TransportClosed,
    Shutdown,
}

async fn scan_window_elapsed(window: &mut Option<Pin<Box<Sleep>>>) {
    match window {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

pub struct Gateway<P: Publisher> {
    controller: LinkLayerController,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    publisher: P,
    topics: Topics,
    settings: Settings,
    scales: HashMap<DeviceAddress, ScaleFactors>,
    scan_window: Option<Pin<Box<Sleep>>>,
    scan_window_used: bool,
}

impl<P: Publisher> Gateway<P> {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        notifications: EventReceiver,
        publisher: P,
        settings: Settings,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let controller = LinkLayerController::new(
            transport,
            notifications,
            events_tx,
            ControllerConfig::from(&settings),
            Arc::new(AttributeCatalog::txw51()),
        );

        Self {
            controller,
            events,
            publisher,
            topics: Topics::new(&settings.topic_prefix),
            settings,
            scales: HashMap::new(),
            scan_window: None,
            scan_window_used: false,
        }
    }

    pub fn controller(&self) -> &LinkLayerController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut LinkLayerController {
        &mut self.controller
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn scale_factors(&self, address: &DeviceAddress) -> Option<ScaleFactors> {
        self.scales.get(address).copied()
    }

    pub fn is_scan_window_armed(&self) -> bool {
        self.scan_window.is_some()
    }

    fn publish(&mut self, topic: &str, payload: impl AsRef<[u8]>) {
        self.publisher.publish(topic, payload.as_ref());
    }

    fn publish_error(&mut self, address: &DeviceAddress, err: &GatewayError) {
        error!("Device {}: {}", address, err);
        let topic = self.topics.error(address);
        self.publish(&topic, err.to_string());
    }

    /// Say hello to the dongle and start looking for nodes.
    pub async fn start(&mut self) -> Result<()> {
        self.controller.init().await?;
        if self.settings.reset_on_startup {
            self.controller.reset().await?;
        }
        self.controller.stop_scanning().await?;
        self.controller.start_scanning().await?;
        let topic = self.topics.discover();
        self.publish(&topic, "BlueGiga dongle starts discovering sensor nodes");
        info!("Gateway started, scanning for sensor nodes");
        Ok(())
    }

    /// Run until `shutdown` resolves or the transport goes away, then
    /// disconnect everything.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        tokio::pin!(shutdown);

        loop {
            let input = tokio::select! {
                _ = &mut shutdown => GatewayInput::Shutdown,
                Some(event) = self.events.recv() => GatewayInput::Event(event),
                input = self.controller.next_input() => match input {
                    Some(input) => GatewayInput::Controller(input),
                    None => GatewayInput::TransportClosed,
                },
                _ = scan_window_elapsed(&mut self.scan_window) => GatewayInput::ScanWindowElapsed,
            };

            match input {
                GatewayInput::Event(event) => self.handle_event(event).await,
                GatewayInput::Controller(input) => self.controller.dispatch(input).await,
                GatewayInput::ScanWindowElapsed => self.on_scan_window_elapsed().await,
                GatewayInput::TransportClosed => {
                    warn!("Dongle event stream closed");
                    break;
                }
                GatewayInput::Shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Disconnect every node and handle what is already queued.
    pub async fn shutdown(&mut self) -> Result<()> {
        let result = self.controller.disconnect_all().await;
        self.pump().await;
        result
    }

    /// Handle every queued controller input and gateway event, repeating
    /// until both queues are empty.
    pub async fn pump(&mut self) {
        loop {
            let mut handled = self.controller.process_pending().await;
            while let Ok(event) = self.events.try_recv() {
                self.handle_event(event).await;
                handled += 1;
            }
            if handled == 0 {
                break;
            }
        }
    }

    pub async fn on_scan_window_elapsed(&mut self) {
        self.scan_window = None;
        info!(
            "Scan window over, connecting {} known devices",
            self.controller.registry().len()
        );
        if let Err(e) = self.controller.stop_scanning().await {
            warn!("Stopping the scan failed: {}", e);
        }
        self.connect_next().await;
    }

    fn is_backing_off(&self, address: &DeviceAddress) -> bool {
        self.controller
            .session(address)
            .map_or(false, |s| s.is_reconnect_scheduled())
    }

    async fn connect_next(&mut self) {
        match self.controller.connect_next_pending().await {
            Ok(Some(address)) => debug!("Connecting next device {}", address),
            Ok(None) => {}
            Err(e) => warn!("Connecting next device failed: {}", e),
        }
    }

    pub async fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::LinkLayerStateChanged {
                error, new_state, ..
            } => {
                let payload = match error {
                    Some(e) => format!("{} due to error {}", new_state, e),
                    None => format!("{} ", new_state),
                };
                let topic = self.topics.link_layer_state();
                self.publish(&topic, payload);
            }
            GatewayEvent::DeviceFound(device) => {
                if !device.eligible {
                    debug!("Ignoring device {}", device.address);
                    return;
                }
                let topic = self.topics.found();
                self.publish(&topic, format!("{} {}", device.address, device.rssi));

                if !self.scan_window_used {
                    self.scan_window_used = true;
                    let window = Duration::from_millis(self.settings.scan_window_ms);
                    self.scan_window = Some(Box::pin(tokio::time::sleep(window)));
                }
            }
            GatewayEvent::ConnectionStateChanged {
                address,
                error,
                new_state,
                old_state,
            } => {
                let payload = match &error {
                    Some(e) => format!("{} due to error {}", new_state, e),
                    None => format!("{} ", new_state),
                };
                let topic = self.topics.connection_state(&address);
                self.publish(&topic, payload);

                match new_state {
                    ConnectionState::Connected => self.on_connected(&address).await,
                    ConnectionState::Disconnected
                        if error.is_some()
                            && matches!(
                                old_state,
                                ConnectionState::Connecting | ConnectionState::Disconnecting
                            )
                            && self.is_backing_off(&address) =>
                    {
                        // Give the remaining nodes a turn while this one backs off.
                        self.connect_next().await;
                    }
                    _ => {}
                }
            }
            GatewayEvent::GattDiscoveryCompleted {
                address,
                resolved,
                total,
            } => {
                debug!("Device {} resolved {}/{} attributes", address, resolved, total);
                self.on_discovery_completed(&address).await;
            }
            GatewayEvent::AttributeValueReceived {
                address,
                name,
                value,
            } => {
                if name == names::MEASURE_CHAR_DATASTREAM {
                    self.on_data_frame(&address, &value);
                } else {
                    debug!("Device {} pushed {} = {:02x?}", address, name, value);
                }
            }
            GatewayEvent::PollDue { address } => self.on_poll(&address).await,
        }
    }

    async fn on_connected(&mut self, address: &DeviceAddress) {
        if let Err(e) = self.controller.read_gatt_index(address, true).await {
            self.publish_error(address, &e);
            self.connect_next().await;
        }
    }

    async fn on_discovery_completed(&mut self, address: &DeviceAddress) {
        self.read_device_info(address).await;

        match self.start_measuring(address).await {
            Ok(()) => info!("Device {} has started measuring", address),
            Err(e) => self.publish_error(address, &e),
        }

        self.connect_next().await;
    }

    /// Read every resolved device information characteristic and publish
    /// them together once the last read is done.
    pub async fn read_device_info(&mut self, address: &DeviceAddress) {
        let available: Vec<&'static str> = match self.controller.session(address).and_then(|s| s.gatt()) {
            Some(gatt) => names::DEVICE_INFO_CHARACTERISTICS
                .iter()
                .copied()
                .filter(|name| gatt.by_name(name).map_or(false, |a| a.is_resolved()))
                .collect(),
            None => return,
        };
        if available.is_empty() {
            return;
        }

        let mut plan = DeviceInfoPlan::new(available.len());
        for name in available {
            let value = match self.controller.read_attribute(address, name).await {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Device {} reading {} failed: {}", address, name, e);
                    None
                }
            };

            if plan.record(name, value.as_deref()) {
                match serde_json::to_vec(plan.values()) {
                    Ok(payload) => {
                        let topic = self.topics.info(address);
                        self.publish(&topic, payload);
                    }
                    Err(e) => warn!("Device {} info not serializable: {}", address, e),
                }
            }
        }
    }

    /// Configure the inertial sensor, enable the data stream and start the
    /// temperature poll.
    pub async fn start_measuring(&mut self, address: &DeviceAddress) -> Result<()> {
        info!("Device {} is starting up measuring", address);
        let topic = self.topics.start(address);
        self.publish(&topic, "start measuring");

        let controller = &mut self.controller;
        controller
            .write_attribute(address, names::LSM330_CHAR_GYRO_EN, &[1])
            .await?;
        controller
            .write_attribute(address, names::LSM330_CHAR_ACC_EN, &[1])
            .await?;
        controller
            .write_attribute(
                address,
                names::LSM330_CHAR_ACC_FSCALE,
                &[self.settings.acc_full_scale],
            )
            .await?;
        controller.enable_notifications(address).await?;

        let acc_code = controller
            .read_attribute(address, names::LSM330_CHAR_ACC_FSCALE)
            .await?
            .first()
            .copied()
            .unwrap_or(0);
        let gyro_code = controller
            .read_attribute(address, names::LSM330_CHAR_GYRO_FSCALE)
            .await?
            .first()
            .copied()
            .unwrap_or(0);

        let range = AccelerometerRange::from_code(acc_code);
        self.scales.insert(
            *address,
            ScaleFactors {
                accelerometer: range.mg_per_lsb,
                gyroscope: gyroscope_scale(gyro_code),
            },
        );
        info!(
            "Device {} accelerometer range {}G, {} mG/LSB",
            address, range.range_g, range.mg_per_lsb
        );
        let topic = self.topics.accelerometer(address);
        self.publish(
            &topic,
            format!(" Max: {}G / Min: {}mG", range.range_g, range.mg_per_lsb),
        );

        self.controller
            .write_attribute(address, names::MEASURE_CHAR_START, &[1])
            .await?;
        self.controller.start_polling(
            address,
            Duration::from_millis(self.settings.poll_interval_ms),
        )?;
        Ok(())
    }

    fn on_data_frame(&mut self, address: &DeviceAddress, frame: &[u8]) {
        let scales = self.scales.get(address).copied().unwrap_or_default();
        let samples = match sample::decode_with(frame, &scales) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Device {} frame dropped: {}", address, e);
                return;
            }
        };

        let topic = self.topics.measurement();
        for sample in &samples {
            let message = Measurement {
                device: *address,
                sample,
            };
            match serde_json::to_vec(&message) {
                Ok(payload) => self.publish(&topic, payload),
                Err(e) => warn!("Sample not serializable: {}", e),
            }
        }
    }

    async fn on_poll(&mut self, address: &DeviceAddress) {
        match self
            .controller
            .read_attribute(address, names::LSM330_CHAR_TEMP_SAMPLE)
            .await
        {
            Ok(value) if value.len() == 1 => {
                let celsius = value[0] as i8;
                debug!("Device {} temperature {}", address, celsius);
                let topic = self.topics.temperature(address);
                self.publish(&topic, celsius.to_string());
            }
            Ok(value) => warn!("Device {} unexpected temperature {:02x?}", address, value),
            Err(e) => warn!("Device {} reading temperature failed: {}", address, e),
        }
    }
}
