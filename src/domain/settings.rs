use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_sensor_gateway".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Direct-connect parameters, in radio units (1.25 ms intervals, 10 ms
/// supervision timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    pub interval_min: u16,
    pub interval_max: u16,
    pub supervision_timeout: u16,
    pub latency: u16,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            interval_min: 60,
            interval_max: 75,
            supervision_timeout: 700,
            latency: 9,
        }
    }
}

/// Scan interval and window in 0.625 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParameters {
    pub interval: u16,
    pub window: u16,
    pub active: bool,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            interval: 0xC8,
            window: 0xC8,
            active: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    /// Only advertisers whose name contains this string are connected.
    /// `None` accepts every advertiser.
    #[serde(default = "default_name_filter")]
    pub name_filter: Option<String>,

    // Supervision timings
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    // Command timeouts
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    // Radio parameters
    #[serde(default)]
    pub connection: ConnectionParameters,
    #[serde(default)]
    pub scan: ScanParameters,

    // Measurement
    #[serde(default = "default_acc_full_scale")]
    pub acc_full_scale: u8,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_false")]
    pub reset_on_startup: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            name_filter: default_name_filter(),
            scan_window_ms: default_scan_window_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            hello_timeout_ms: default_hello_timeout_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            connection: ConnectionParameters::default(),
            scan: ScanParameters::default(),
            acc_full_scale: default_acc_full_scale(),
            topic_prefix: default_topic_prefix(),
            reset_on_startup: false,
        }
    }
}

fn default_name_filter() -> Option<String> {
    Some("TXW51".to_string())
}
fn default_scan_window_ms() -> u64 {
    5000
}
fn default_connect_timeout_ms() -> u64 {
    10000
}
fn default_reconnect_backoff_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_command_timeout_ms() -> u64 {
    10000
}
fn default_write_timeout_ms() -> u64 {
    30000
}
fn default_hello_timeout_ms() -> u64 {
    1000
}
fn default_reset_timeout_ms() -> u64 {
    5000
}
fn default_acc_full_scale() -> u8 {
    4
}
fn default_topic_prefix() -> String {
    "/sming".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file. A missing or unreadable file yields defaults.
    pub fn from_path(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings, {} not loaded: {:#}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleSensorGateway");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "name_filter": null, "scan_window_ms": 250 }"#).unwrap();
        assert_eq!(settings.name_filter, None);
        assert_eq!(settings.scan_window_ms, 250);
        assert_eq!(settings.connect_timeout_ms, 10000);
        assert_eq!(settings.connection.latency, 9);
        assert_eq!(settings.topic_prefix, "/sming");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("ble_sensor_gateway_missing_settings.json");
        let _ = fs::remove_file(&path);
        let service = SettingsService::from_path(&path);
        assert_eq!(service.get().name_filter.as_deref(), Some("TXW51"));
        assert_eq!(service.get().acc_full_scale, 4);
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "ble_sensor_gateway_settings_{}.json",
            std::process::id()
        ));
        let mut service = SettingsService::from_path(&path);
        service.get_mut().poll_interval_ms = 1234;
        service.save().unwrap();

        let reloaded = SettingsService::from_path(&path);
        assert_eq!(reloaded.get().poll_interval_ms, 1234);
        let _ = fs::remove_file(&path);
    }
}
