//! Domain Layer
//!
//! Types and pure logic of the gateway: addresses, states, the attribute
//! catalog, per-device GATT tables, sample decoding and settings.

pub mod catalog;
pub mod gatt;
pub mod models;
pub mod sample;
pub mod settings;
