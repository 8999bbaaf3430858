//! Listener-based façade over an MQTT client
//!
//! A [`MqttSession`] connects to a broker, forwards subscribe, unsubscribe
//! and publish requests, and relays connection lifecycle and incoming
//! messages to every registered [`MqttListener`]. Protocol handling is left
//! to `rumqttc`.

pub mod logger;
pub mod mqtt;

pub use logger::Logger;
pub use mqtt::config::MqttConfig;
pub use mqtt::error::MqttError;
pub use mqtt::listener::{MqttListener, Topics};
pub use mqtt::mqtt_handler::{MqttSession, PublishCallback};
pub use mqtt::observer::ListenerRegistry;
pub use mqtt::rumqttc_client::RumqttcTransport;
pub use mqtt::transport::{Ack, MqttTransport, PublishOptions, TransportEvent};
pub use rumqttc::QoS;
