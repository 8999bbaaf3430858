//! # MQTT Relay Module
//!
//! Connects to a broker through `rumqttc` and relays everything the
//! connection reports to a set of registered listeners.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs          - Session options, TOML loading, broker URL parsing
//! ├── error.rs           - MqttError
//! ├── listener.rs        - MqttListener contract and Topics argument
//! ├── message_manager.rs - Incoming payload decoding
//! ├── mqtt_handler.rs    - MqttSession: event relay and request forwarding
//! ├── observer.rs        - Ordered listener registry
//! ├── rumqttc_client.rs  - Production transport and event loop driver
//! ├── topics.rs          - Subscribed-topic bookkeeping
//! ├── tracker.rs         - Request/ack correlation
//! └── transport.rs       - MqttTransport seam and TransportEvent
//! ```
//!
//! ## Event Flow
//!
//! The transport's driver task polls the client event loop and pushes
//! [`TransportEvent`]s into a channel. The session's relay task drains that
//! channel and calls every listener in registration order. Connect,
//! disconnect and message events reach listeners; reconnect, offline, end,
//! error and close only show up in the debug log.
//!
//! Subscribe, unsubscribe and publish return immediately. Each yields a
//! [`Completion`] that a short-lived task awaits before relaying the outcome.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mqtt_relay::{MqttConfig, MqttError, MqttListener, MqttSession, Topics};
//! use serde_json::Value;
//!
//! struct Printer;
//!
//! impl MqttListener for Printer {
//!     fn on_connected(&self) { println!("connected"); }
//!     fn on_disconnected(&self) { println!("disconnected"); }
//!     fn on_subscribed(&self, topics: &Topics) { println!("subscribed {}", topics); }
//!     fn on_subscribe_fail(&self, topics: &Topics, e: &MqttError) { println!("{}: {}", topics, e); }
//!     fn on_unsubscribed(&self, topics: &Topics) { println!("unsubscribed {}", topics); }
//!     fn on_unsubscribe_fail(&self, topics: &Topics, e: &MqttError) { println!("{}: {}", topics, e); }
//!     fn on_message(&self, topic: &str, payload: &Value) { println!("{} {}", topic, payload); }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), MqttError> {
//! let session = MqttSession::new();
//! session.add_listener(Arc::new(Printer));
//! session.init(MqttConfig::new("mqtt://localhost:1883").with_debug(true))?;
//! session.subscribe(["sensors/temperature", "sensors/humidity"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod message_manager;
pub mod mqtt_handler;
pub mod observer;
pub mod rumqttc_client;
pub mod topics;
pub mod tracker;
pub mod transport;

pub use transport::{Completion, TransportEvent};
