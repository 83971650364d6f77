//! Error types for the gateway core.
//!
//! Every error is `Clone` so it can ride along inside a
//! [`GatewayEvent`](crate::domain::models::GatewayEvent) to observers.

use crate::domain::models::DeviceAddress;
use thiserror::Error;

/// Failure of a single command submitted to the radio transport.
///
/// Always retryable by the caller. The core never retries on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("command {command} timed out after {timeout_ms} ms")]
    Timeout {
        command: &'static str,
        timeout_ms: u64,
    },

    #[error("command {command} failed with result code {code:#06x}")]
    Failed { command: &'static str, code: u16 },

    #[error("unexpected response to command {command}")]
    UnexpectedResponse { command: &'static str },

    #[error("transport closed: {0}")]
    Closed(String),
}

/// A streaming notification frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operation attempted in the wrong state.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The name is not part of the attribute catalog.
    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),

    /// The name is known but discovery has not assigned it a handle yet.
    #[error("attribute `{0}` has no handle yet, read the GATT index first")]
    UnresolvedHandle(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("no device registered for address {0}")]
    UnknownDevice(DeviceAddress),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("connection was not established in time")]
    ConnectTimeout,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
