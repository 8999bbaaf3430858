//! Seam between the session and the MQTT client library
//!
//! The session never talks to `rumqttc` directly. It holds an
//! [`MqttTransport`] for outgoing requests and drains a channel of
//! [`TransportEvent`]s for everything the connection reports. The production
//! implementation is [`RumqttcTransport`](super::rumqttc_client::RumqttcTransport);
//! tests plug in a scripted one.

use rumqttc::QoS;
use tokio::sync::oneshot;

use super::error::MqttError;

/// Acknowledgement of a completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    /// Packet identifier of the acknowledged packet, 0 for QoS 0 publishes
    pub pkid: u16,
}

/// Resolves once the request behind it completes or fails
pub type Completion = oneshot::Receiver<Result<Ack, MqttError>>;

/// Sending half of a [`Completion`]
pub type Completer = oneshot::Sender<Result<Ack, MqttError>>;

/// Builds a completion that is already resolved
pub fn completed(result: Result<Ack, MqttError>) -> Completion {
    let (tx, rx) = oneshot::channel();
    // receiver is alive, send cannot fail
    let _ = tx.send(result);
    rx
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

impl PublishOptions {
    pub fn qos(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

/// Lifecycle and data events reported by the connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The broker accepted the connection
    Connected,
    /// A PUBLISH arrived from the broker
    Message { topic: String, payload: Vec<u8> },
    /// The broker sent a DISCONNECT
    Disconnected,
    /// A new connection attempt is about to start
    Reconnecting,
    /// The connection dropped
    Offline,
    /// The client was asked to stop and will not reconnect
    End,
    /// Connection-level error, already formatted
    Error(String),
    /// The network stream closed
    Closed,
}

/// Outgoing side of an MQTT connection
///
/// Calls never block. Each returns a [`Completion`] that resolves exactly once
/// with the broker's acknowledgement or the reason the request failed.
pub trait MqttTransport: Send + Sync {
    fn subscribe(&self, topics: &[String], qos: QoS) -> Completion;

    fn unsubscribe(&self, topics: &[String]) -> Completion;

    fn publish(&self, topic: &str, payload: Vec<u8>, options: PublishOptions) -> Completion;

    /// Asks the client to disconnect; the connection reports `End` once done
    fn end(&self) -> Result<(), MqttError>;
}
