//! Bluetooth Module
//!
//! Talks to a BLE dongle through a serial command queue and manages the
//! fleet of sensor nodes reachable through it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  LinkLayerController                     │
//! │  (scan / reset / connect-next policy, event routing)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐  ┌────────────┐  ┌────────────┐
//! │  Registry  │  │  Session   │  │ Transport  │
//! │            │  │            │  │            │
//! │ - address  │  │ - state    │  │ - commands │
//! │ - conn id  │  │ - GATT     │  │ - events   │
//! │            │  │ - timers   │  │            │
//! └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Commands, responses and events of the dongle
//! - [`transport`] - The command queue seam
//! - [`scanner`] - Advertisement parsing and name filtering
//! - [`connection`] - Per-device session state machine
//! - [`registry`] - Sessions indexed by address and connection id
//! - [`service`] - Link layer controller
//! - [`register`] - I2C register access through attributes
//! - [`simulator`] - In-memory dongle
//! - [`timer`] - Session timers

pub mod connection;
pub mod protocol;
pub mod register;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod simulator;
pub mod timer;
pub mod transport;

pub use connection::{DiscoveryState, RemoteDeviceSession, SessionConfig};
pub use service::{ControllerConfig, ControllerInput, LinkLayerController};
pub use transport::CommandTransport;
