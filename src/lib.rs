//! BLE Sensor Gateway
//!
//! Drives a serial BLE dongle as a central, keeps a fleet of TXW51 sensor
//! nodes connected and publishes their measurements as topic/payload pairs.

pub mod domain;
pub mod error;
pub mod gateway;
pub mod infrastructure;

pub use error::{GatewayError, Result};
pub use gateway::Gateway;
