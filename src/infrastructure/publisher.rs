//! Publication Sink
//!
//! Fire-and-forget topic/payload output of the gateway, plus the topic
//! naming scheme.

use crate::domain::models::DeviceAddress;
use tracing::info;

pub trait Publisher: Send {
    fn publish(&mut self, topic: &str, payload: &[u8]);
}

/// Writes every message to the log.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        info!(target: "publish", "{} {}", topic, String::from_utf8_lossy(payload));
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryPublisher {
    messages: Vec<(String, Vec<u8>)>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[(String, Vec<u8>)] {
        &self.messages
    }

    /// Payloads published on `topic`, decoded as UTF-8.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.messages
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        self.messages.push((topic.to_string(), payload.to_vec()));
    }
}

/// Forwarding impl so a shared sink can be handed to the gateway and
/// inspected afterwards.
impl<P: Publisher> Publisher for std::sync::Arc<std::sync::Mutex<P>> {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        match self.lock() {
            Ok(mut inner) => inner.publish(topic, payload),
            Err(poisoned) => poisoned.into_inner().publish(topic, payload),
        }
    }
}

/// Topic names under a common prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn discover(&self) -> String {
        format!("{}/discover", self.prefix)
    }

    pub fn found(&self) -> String {
        format!("{}/found", self.prefix)
    }

    pub fn link_layer_state(&self) -> String {
        format!("{}/blueGigaDongle/linkLayerState", self.prefix)
    }

    pub fn measurement(&self) -> String {
        format!("{}/measurement", self.prefix)
    }

    pub fn connection_state(&self, address: &DeviceAddress) -> String {
        format!("{}/{}/connectionState", self.prefix, address)
    }

    pub fn start(&self, address: &DeviceAddress) -> String {
        format!("{}/{}/start", self.prefix, address)
    }

    pub fn info(&self, address: &DeviceAddress) -> String {
        format!("{}/{}/info", self.prefix, address)
    }

    pub fn accelerometer(&self, address: &DeviceAddress) -> String {
        format!("{}/{}/accelerometer", self.prefix, address)
    }

    pub fn temperature(&self, address: &DeviceAddress) -> String {
        format!("{}/{}/temp", self.prefix, address)
    }

    pub fn error(&self, address: &DeviceAddress) -> String {
        format!("{}/{}/error", self.prefix, address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let topics = Topics::new("/sming/");
        let address = DeviceAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(topics.found(), "/sming/found");
        assert_eq!(topics.discover(), "/sming/discover");
        assert_eq!(
            topics.connection_state(&address),
            "/sming/aabbccddeeff/connectionState"
        );
        assert_eq!(
            topics.link_layer_state(),
            "/sming/blueGigaDongle/linkLayerState"
        );
    }

    #[test]
    fn test_memory_publisher() {
        let mut publisher = MemoryPublisher::new();
        publisher.publish("/a", b"one");
        publisher.publish("/b", b"two");
        publisher.publish("/a", b"three");
        assert_eq!(publisher.payloads("/a"), vec!["one", "three"]);
        assert_eq!(publisher.messages().len(), 3);
    }
}
