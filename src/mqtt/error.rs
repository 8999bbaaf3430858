//! Error definitions for the MQTT relay

use thiserror::Error;

/// Errors surfaced by the session, the transport and the configuration layer
///
/// Subscribe and unsubscribe failures reach listeners through
/// `on_subscribe_fail` / `on_unsubscribe_fail`, publish failures reach the
/// caller's callback. Connection-level errors are only logged.
#[derive(Debug, Error)]
pub enum MqttError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation was issued before `init` opened a connection
    #[error("Session not initialized")]
    NotInitialized,

    /// `init` was called while a connection is still attached
    #[error("Session already initialized")]
    AlreadyInitialized,

    /// The session needs a tokio runtime to spawn its relay tasks
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The client refused to enqueue the request
    #[error("Client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The network connection reported an error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection dropped while the request was waiting for its ack
    #[error("Connection lost before the request was acknowledged")]
    ConnectionLost,

    /// The broker answered a SUBSCRIBE with a failure return code
    #[error("Broker rejected subscription (packet id {0})")]
    SubscribeRejected(u16),

    /// The transport went away without completing the request
    #[error("Request dropped by the transport")]
    RequestDropped,

    /// Incoming payload is not valid UTF-8
    #[error("Payload is not valid UTF-8: {0}")]
    PayloadEncoding(#[from] std::str::Utf8Error),

    /// Incoming payload is not valid JSON
    #[error("Payload is not valid JSON: {0}")]
    PayloadDecode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}
