//! Session manager relaying connection events to listeners
//!
//! [`MqttSession`] owns one connection to a broker, a registry of
//! [`MqttListener`]s and the set of topics it has subscribed to. Everything
//! the connection reports is fanned out to the listeners; subscribe and
//! unsubscribe outcomes are fanned out as well, while publish outcomes go to
//! the caller's callback only.
//!
//! ```text
//! caller ─subscribe/publish→ MqttSession ─→ MqttTransport ─→ broker
//!                                 ↑                 │
//!   listeners ←─relay─────────────┴─TransportEvent──┘
//! ```
//!
//! Nothing here blocks: every operation returns at once and its outcome
//! arrives later through a listener callback or the publish callback.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use rumqttc::QoS;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{generate_client_id, MqttConfig};
use super::error::MqttError;
use super::listener::{MqttListener, Topics};
use super::message_manager::{preview, MqttMessage};
use super::observer::ListenerRegistry;
use super::rumqttc_client::RumqttcTransport;
use super::topics::TopicSet;
use super::transport::{completed, Ack, Completion, MqttTransport, PublishOptions, TransportEvent};
use crate::logger::Logger;
use crate::relay_log;

/// How long `end` keeps the old connection around to deliver its last events
const END_GRACE: Duration = Duration::from_secs(5);

/// Receives the outcome of a single publish
pub type PublishCallback = Box<dyn FnOnce(Result<Ack, MqttError>) + Send + 'static>;

static INSTANCE: OnceLock<MqttSession> = OnceLock::new();

/// Handle to a relay session; clones share the same session
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    client_id: String,
    logger: Arc<Logger>,
    listeners: ListenerRegistry,
    topics: Mutex<TopicSet>,
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    transport: Arc<dyn MqttTransport>,
    relay: JoinHandle<()>,
    runtime: Handle,
}

impl Default for MqttSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttSession {
    /// Creates an unconnected session with its own logger
    pub fn new() -> Self {
        Self::with_logger(Arc::new(Logger::default()))
    }

    /// Creates an unconnected session logging through `logger`
    pub fn with_logger(logger: Arc<Logger>) -> Self {
        let client_id = generate_client_id();
        debug!("Created MQTT session {}", client_id);
        Self {
            inner: Arc::new(SessionInner {
                client_id,
                logger,
                listeners: ListenerRegistry::new(),
                topics: Mutex::new(TopicSet::new()),
                connection: Mutex::new(None),
            }),
        }
    }

    /// Process-wide session, created on first use
    ///
    /// Prefer constructing a session with [`MqttSession::new`] and passing it
    /// around; this accessor exists for code that cannot thread a handle
    /// through.
    pub fn instance() -> &'static MqttSession {
        INSTANCE.get_or_init(MqttSession::new)
    }

    /// Generated client identifier, used unless the config overrides it
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.inner.logger
    }

    pub fn add_listener(&self, listener: Arc<dyn MqttListener>) {
        self.inner.listeners.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MqttListener>) {
        self.inner.listeners.remove_listener(listener);
    }

    pub fn listeners(&self) -> Vec<Arc<dyn MqttListener>> {
        self.inner.listeners.listeners()
    }

    /// Topics subscribed through this session, in subscription order
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.inner.topics().to_vec()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.connection().is_some()
    }

    /// Connects to `config.broker_url` and starts relaying events
    ///
    /// Must be called from within a tokio runtime. A session holds one
    /// connection at a time; call [`MqttSession::end`] before initializing
    /// again.
    ///
    /// # Errors
    ///
    /// * [`MqttError::Config`] - broker URL or options are invalid
    /// * [`MqttError::AlreadyInitialized`] - a connection is already attached
    /// * [`MqttError::NoRuntime`] - called outside a tokio runtime
    pub fn init(&self, config: MqttConfig) -> Result<(), MqttError> {
        self.inner.logger.set_debug(config.is_debug);
        config.validate()?;
        if self.is_initialized() {
            warn!("MQTT session already initialized, ignoring init");
            return Err(MqttError::AlreadyInitialized);
        }

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| self.inner.client_id.clone());
        info!(
            "Initializing MQTT session {} for {}",
            client_id, config.broker_url
        );
        let (transport, events) = RumqttcTransport::connect(&config, &client_id)?;
        self.attach(transport, events)
    }

    /// Wires an already connected transport into the session
    ///
    /// `init` uses this with a [`RumqttcTransport`]; other transports can be
    /// plugged in the same way.
    pub fn attach<T>(
        &self,
        transport: T,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Result<(), MqttError>
    where
        T: MqttTransport + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| MqttError::NoRuntime(e.to_string()))?;
        let mut connection = self.inner.connection();
        if connection.is_some() {
            return Err(MqttError::AlreadyInitialized);
        }

        let relay = runtime.spawn(relay_events(Arc::downgrade(&self.inner), events));
        *connection = Some(Connection {
            transport: Arc::new(transport),
            relay,
            runtime,
        });
        debug!("MQTT transport attached");
        Ok(())
    }

    /// Subscribes to one or more topics at QoS 0
    ///
    /// The topics join the subscribed set right away, before the broker
    /// answers, and stay there even if the subscription fails. Listeners get
    /// `on_subscribed` or `on_subscribe_fail` with the topics as passed in.
    pub fn subscribe(&self, topics: impl Into<Topics>) {
        let topics = topics.into();
        let names = topics.names();
        self.inner.topics().extend(&names);
        relay_log!(self.inner.logger, "mqtt subscribing to {}", topics);

        let completion = match self.inner.transport() {
            Some(transport) => transport.subscribe(&names, QoS::AtMostOnce),
            None => completed(Err(MqttError::NotInitialized)),
        };
        self.inner.on_complete(completion, move |session, result| match result {
            Ok(_) => {
                relay_log!(session.logger, "mqtt subscribed to {}", topics);
                session.listeners.for_each(|l| l.on_subscribed(&topics));
            }
            Err(e) => {
                relay_log!(session.logger, "mqtt subscribe to {} failed: {}", topics, e);
                session
                    .listeners
                    .for_each(|l| l.on_subscribe_fail(&topics, &e));
            }
        });
    }

    /// Unsubscribes from one or more topics
    ///
    /// Leaves the subscribed set untouched; only
    /// [`MqttSession::unsubscribe_all`] removes topics from it.
    pub fn unsubscribe(&self, topics: impl Into<Topics>) {
        let topics = topics.into();
        relay_log!(self.inner.logger, "mqtt unsubscribing from {}", topics);

        let completion = match self.inner.transport() {
            Some(transport) => transport.unsubscribe(&topics.names()),
            None => completed(Err(MqttError::NotInitialized)),
        };
        self.inner.on_complete(completion, move |session, result| match result {
            Ok(_) => {
                relay_log!(session.logger, "mqtt unsubscribed from {}", topics);
                session.listeners.for_each(|l| l.on_unsubscribed(&topics));
            }
            Err(e) => {
                relay_log!(
                    session.logger,
                    "mqtt unsubscribe from {} failed: {}",
                    topics,
                    e
                );
                session
                    .listeners
                    .for_each(|l| l.on_unsubscribe_fail(&topics, &e));
            }
        });
    }

    /// Unsubscribes from every topic in the subscribed set
    ///
    /// On success the subscribed set is cleared, including topics added while
    /// the request was in flight; on failure the set is unchanged. An empty
    /// set succeeds without contacting the broker.
    pub fn unsubscribe_all(&self) {
        let snapshot = self.inner.topics().to_vec();
        relay_log!(self.inner.logger, "mqtt unsubscribing all: {:?}", snapshot);

        let completion = match self.inner.transport() {
            None => completed(Err(MqttError::NotInitialized)),
            Some(_) if snapshot.is_empty() => completed(Ok(Ack::default())),
            Some(transport) => transport.unsubscribe(&snapshot),
        };
        let topics = Topics::Many(snapshot);
        self.inner.on_complete(completion, move |session, result| match result {
            Ok(_) => {
                relay_log!(session.logger, "mqtt unsubscribed from all topics");
                session.topics().clear();
                session.listeners.for_each(|l| l.on_unsubscribed(&topics));
            }
            Err(e) => {
                relay_log!(session.logger, "mqtt unsubscribe all failed: {}", e);
                session
                    .listeners
                    .for_each(|l| l.on_unsubscribe_fail(&topics, &e));
            }
        });
    }

    /// Publishes `payload` on `topic`
    ///
    /// `callback` runs exactly once with the acknowledgement or the error.
    /// Listeners are not told about publishes.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        options: PublishOptions,
        callback: Option<PublishCallback>,
    ) {
        let payload = payload.into();
        let shown = preview(&payload);
        let topic_name = topic.to_string();

        let completion = match self.inner.transport() {
            Some(transport) => transport.publish(topic, payload, options),
            None => completed(Err(MqttError::NotInitialized)),
        };
        self.inner.on_complete(completion, move |session, result| {
            match &result {
                Ok(_) => relay_log!(session.logger, "{} published: {}", topic_name, shown),
                Err(e) => relay_log!(
                    session.logger,
                    "{} publish failed ({}): {}",
                    topic_name,
                    e,
                    shown
                ),
            }
            if let Some(callback) = callback {
                callback(result);
            }
        });
    }

    /// Disconnects from the broker and detaches the connection
    ///
    /// The old connection gets a short grace period to deliver its closing
    /// events; afterwards the session can be initialized again.
    pub fn end(&self) -> Result<(), MqttError> {
        let connection = self
            .inner
            .connection()
            .take()
            .ok_or(MqttError::NotInitialized)?;
        relay_log!(self.inner.logger, "mqtt ending connection");

        let result = connection.transport.end();
        let Connection {
            transport,
            relay,
            runtime,
        } = connection;
        runtime.spawn(async move {
            if tokio::time::timeout(END_GRACE, relay).await.is_err() {
                debug!("Connection did not close within {:?}", END_GRACE);
            }
            drop(transport);
        });
        result
    }
}

impl SessionInner {
    fn topics(&self) -> std::sync::MutexGuard<'_, TopicSet> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Option<Arc<dyn MqttTransport>> {
        self.connection().as_ref().map(|c| c.transport.clone())
    }

    fn runtime(&self) -> Option<Handle> {
        self.connection()
            .as_ref()
            .map(|c| c.runtime.clone())
            .or_else(|| Handle::try_current().ok())
    }

    /// Runs `handler` with the request's outcome once it resolves
    fn on_complete<F>(self: &Arc<Self>, mut completion: Completion, handler: F)
    where
        F: FnOnce(&SessionInner, Result<Ack, MqttError>) + Send + 'static,
    {
        let Some(runtime) = self.runtime() else {
            // without a runtime only already resolved requests can be reported
            let result = completion
                .try_recv()
                .unwrap_or_else(|e| Err(MqttError::NoRuntime(e.to_string())));
            handler(self.as_ref(), result);
            return;
        };

        let session = Arc::downgrade(self);
        runtime.spawn(async move {
            let result = completion
                .await
                .unwrap_or(Err(MqttError::RequestDropped));
            match session.upgrade() {
                Some(session) => handler(session.as_ref(), result),
                None => debug!("Session dropped before request completed"),
            }
        });
    }

    fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                relay_log!(self.logger, "mqtt connected");
                self.listeners.for_each(|l| l.on_connected());
            }
            TransportEvent::Message { topic, payload } => {
                match MqttMessage::decode(topic.as_str(), &payload) {
                    Ok(message) => {
                        relay_log!(self.logger, "mqtt message {}", message);
                        self.listeners
                            .for_each(|l| l.on_message(&message.topic, &message.payload));
                    }
                    Err(e) => {
                        warn!("Dropping undecodable message on {}: {}", topic, e);
                        relay_log!(self.logger, "mqtt message on {} not decodable: {}", topic, e);
                        self.listeners.for_each(|l| l.on_message_error(&topic, &e));
                    }
                }
            }
            TransportEvent::Disconnected => {
                relay_log!(self.logger, "mqtt disconnected");
                self.listeners.for_each(|l| l.on_disconnected());
            }
            TransportEvent::Reconnecting => relay_log!(self.logger, "mqtt reconnecting"),
            TransportEvent::Offline => relay_log!(self.logger, "mqtt offline"),
            TransportEvent::End => relay_log!(self.logger, "mqtt ended"),
            TransportEvent::Error(e) => relay_log!(self.logger, "mqtt error: {}", e),
            TransportEvent::Closed => relay_log!(self.logger, "mqtt closed"),
        }
    }
}

async fn relay_events(session: Weak<SessionInner>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.dispatch(event);
    }
    debug!("MQTT event relay stopped");
}
