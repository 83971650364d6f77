//! Command Transport
//!
//! The seam between the gateway core and the serial command queue that
//! talks to the dongle.

use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{Command, Response, TransportEvent};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Receiving end of the unsolicited event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// A single-outstanding, FIFO command queue.
///
/// Implementations must resolve commands in submission order and never run
/// two of them at once. Unsolicited events are delivered separately on the
/// [`EventReceiver`] handed out alongside the transport.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn submit(&self, command: Command, timeout: Duration) -> Result<Response, TransportError>;
}

/// Submit a command whose only meaningful result is success.
pub async fn submit_ack(
    transport: &dyn CommandTransport,
    command: Command,
    timeout: Duration,
) -> Result<(), TransportError> {
    let name = command.name();
    match transport.submit(command, timeout).await? {
        Response::Ack => Ok(()),
        other => {
            tracing::debug!("Ignoring payload in response to {}: {:?}", name, other);
            Ok(())
        }
    }
}
