use ble_sensor_gateway::domain::settings::SettingsService;
use ble_sensor_gateway::infrastructure::bluetooth::simulator::SimulatedRadio;
use ble_sensor_gateway::infrastructure::logging;
use ble_sensor_gateway::infrastructure::publisher::LogPublisher;
use ble_sensor_gateway::Gateway;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = match std::env::args_os().nth(1) {
        Some(path) => SettingsService::from_path(path),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {:#}", e))
        .ok();

    info!(
        "Starting BLE sensor gateway (settings {})",
        settings_service.path().display()
    );

    let (radio, notifications) = SimulatedRadio::new(SimulatedRadio::demo_fleet());
    radio.enable_streaming(Duration::from_millis(500));

    let mut gateway = Gateway::new(radio, notifications, LogPublisher, settings);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {}", e);
        }
    };

    gateway.run(shutdown).await?;
    info!("Gateway stopped");
    Ok(())
}
