//! Production transport on top of `rumqttc`
//!
//! [`RumqttcTransport::connect`] builds the client and spawns a driver task
//! that polls the `rumqttc` event loop. The driver turns packets into
//! [`TransportEvent`]s for the session and feeds acknowledgements into the
//! shared [`RequestTracker`] so every request gets exactly one completion.
//!
//! Reconnection stays with `rumqttc`: after a failed poll the driver waits
//! `reconnect_period_ms` and polls again, which makes the event loop dial
//! the broker anew.

use std::sync::{Arc, Mutex, PoisonError};

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet, QoS,
    SubscribeFilter, SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{BrokerAddress, MqttConfig};
use super::error::MqttError;
use super::tracker::{RequestKind, RequestTracker};
use super::transport::{completed, Completion, MqttTransport, PublishOptions, TransportEvent};

/// Buffer between the driver task and the session's relay task
const EVENT_BUFFER: usize = 100;

pub struct RumqttcTransport {
    client: AsyncClient,
    tracker: Arc<Mutex<RequestTracker>>,
    shutdown: CancellationToken,
    driver: JoinHandle<()>,
}

impl RumqttcTransport {
    /// Builds the client for `config` and starts polling its event loop
    ///
    /// Must be called from within a tokio runtime. The returned receiver
    /// yields every lifecycle and data event of the connection.
    pub fn connect(
        config: &MqttConfig,
        client_id: &str,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), MqttError> {
        let options = mqtt_options(config, client_id)?;
        let (client, mut eventloop) = AsyncClient::new(options, config.request_capacity);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(config.connect_timeout_secs());
        eventloop.set_network_options(network);

        let tracker = Arc::new(Mutex::new(RequestTracker::new()));
        let shutdown = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let driver = Driver {
            eventloop,
            tracker: tracker.clone(),
            events: events_tx,
            shutdown: shutdown.clone(),
            reconnect_period: config.reconnect_period(),
            link: Link::default(),
        };
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| MqttError::NoRuntime(e.to_string()))?
            .spawn(driver.run());

        info!("MQTT client {} created for {}", client_id, config.broker_url);

        Ok((
            Self {
                client,
                tracker,
                shutdown,
                driver: handle,
            },
            events_rx,
        ))
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, RequestTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn mqtt_options(config: &MqttConfig, client_id: &str) -> Result<MqttOptions, MqttError> {
    config.validate()?;
    let address = BrokerAddress::parse(&config.broker_url)?;

    let mut options = MqttOptions::new(client_id, address.host, address.port);
    options
        .set_keep_alive(config.keep_alive())
        .set_clean_session(config.clean);
    if let (Some(user), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(user.clone(), password.clone());
    }
    Ok(options)
}

impl MqttTransport for RumqttcTransport {
    fn subscribe(&self, topics: &[String], qos: QoS) -> Completion {
        let filters: Vec<SubscribeFilter> = topics
            .iter()
            .map(|t| SubscribeFilter::new(t.clone(), qos))
            .collect();

        // queue the ticket before the request so its Outgoing event finds it
        let mut tracker = self.tracker();
        let (ticket, completion) = tracker.register(RequestKind::Subscribe, 1, false);
        if let Err(e) = self.client.try_subscribe_many(filters) {
            warn!("Subscribe request rejected by client: {}", e);
            tracker.abandon(RequestKind::Subscribe, ticket, 1, e.into());
        }
        completion
    }

    fn unsubscribe(&self, topics: &[String]) -> Completion {
        if topics.is_empty() {
            return completed(Ok(Default::default()));
        }

        // one UNSUBSCRIBE per topic, the request completes with the last ack
        let mut tracker = self.tracker();
        let (ticket, completion) =
            tracker.register(RequestKind::Unsubscribe, topics.len(), false);
        for (sent, topic) in topics.iter().enumerate() {
            if let Err(e) = self.client.try_unsubscribe(topic.clone()) {
                warn!("Unsubscribe request for {} rejected by client: {}", topic, e);
                tracker.abandon(RequestKind::Unsubscribe, ticket, topics.len() - sent, e.into());
                break;
            }
        }
        completion
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, options: PublishOptions) -> Completion {
        let mut tracker = self.tracker();
        let (ticket, completion) = tracker.register(
            RequestKind::Publish,
            1,
            options.qos == QoS::AtMostOnce,
        );
        if let Err(e) = self
            .client
            .try_publish(topic, options.qos, options.retain, payload)
        {
            warn!("Publish to {} rejected by client: {}", topic, e);
            tracker.abandon(RequestKind::Publish, ticket, 1, e.into());
        }
        completion
    }

    fn end(&self) -> Result<(), MqttError> {
        info!("Disconnecting MQTT client");
        self.client.try_disconnect()?;
        Ok(())
    }
}

impl Drop for RumqttcTransport {
    fn drop(&mut self) {
        debug!("Stopping MQTT driver task");
        self.shutdown.cancel();
        self.driver.abort();
    }
}

struct Driver {
    eventloop: EventLoop,
    tracker: Arc<Mutex<RequestTracker>>,
    events: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
    reconnect_period: std::time::Duration,
    link: Link,
}

impl Driver {
    async fn run(mut self) {
        debug!("MQTT driver started");
        loop {
            let polled = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            let stopping = polled.is_err() && self.link.ending;
            let events = {
                let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
                match polled {
                    Ok(event) => self.link.on_event(event, &mut tracker),
                    Err(e) => self.link.on_error(&e.to_string(), &mut tracker),
                }
            };
            self.emit_all(events).await;

            if stopping {
                break;
            }
            if self.link.reconnecting {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.reconnect_period) => {}
                }
                self.link.reconnecting = false;
                self.emit_all(vec![TransportEvent::Reconnecting]).await;
            }
        }

        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_all(|| MqttError::RequestDropped);
        debug!("MQTT driver stopped");
    }

    async fn emit_all(&mut self, events: Vec<TransportEvent>) {
        for event in events {
            if self.events.send(event).await.is_err() {
                debug!("Session stopped listening for transport events");
                return;
            }
        }
    }
}

/// Connection state seen by the driver; translates `rumqttc` events
#[derive(Debug, Default)]
struct Link {
    online: bool,
    /// A DISCONNECT went out, the next poll error ends the connection
    ending: bool,
    /// The last poll failed, wait before polling again
    reconnecting: bool,
}

impl Link {
    fn on_event(&mut self, event: Event, tracker: &mut RequestTracker) -> Vec<TransportEvent> {
        match event {
            Event::Incoming(packet) => self.on_incoming(packet, tracker),
            Event::Outgoing(outgoing) => {
                self.on_outgoing(outgoing, tracker);
                Vec::new()
            }
        }
    }

    fn on_incoming(&mut self, packet: Packet, tracker: &mut RequestTracker) -> Vec<TransportEvent> {
        match packet {
            // refused connections surface as poll errors
            Packet::ConnAck(_) => {
                self.online = true;
                vec![TransportEvent::Connected]
            }
            Packet::Publish(publish) => vec![TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }],
            Packet::SubAck(ack) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                let result = if rejected {
                    Err(MqttError::SubscribeRejected(ack.pkid))
                } else {
                    Ok(())
                };
                tracker.on_ack(RequestKind::Subscribe, ack.pkid, result);
                Vec::new()
            }
            Packet::UnsubAck(ack) => {
                tracker.on_ack(RequestKind::Unsubscribe, ack.pkid, Ok(()));
                Vec::new()
            }
            Packet::PubAck(ack) => {
                tracker.on_ack(RequestKind::Publish, ack.pkid, Ok(()));
                Vec::new()
            }
            Packet::PubComp(ack) => {
                tracker.on_ack(RequestKind::Publish, ack.pkid, Ok(()));
                Vec::new()
            }
            Packet::Disconnect => {
                self.online = false;
                vec![TransportEvent::Disconnected]
            }
            _ => Vec::new(),
        }
    }

    fn on_outgoing(&mut self, outgoing: Outgoing, tracker: &mut RequestTracker) {
        match outgoing {
            Outgoing::Subscribe(pkid) => tracker.on_outgoing(RequestKind::Subscribe, pkid),
            Outgoing::Unsubscribe(pkid) => tracker.on_outgoing(RequestKind::Unsubscribe, pkid),
            Outgoing::Publish(pkid) => tracker.on_outgoing(RequestKind::Publish, pkid),
            Outgoing::AwaitAck(pkid) => tracker.on_collision(pkid),
            Outgoing::Disconnect => self.ending = true,
            _ => {}
        }
    }

    fn on_error(&mut self, reason: &str, tracker: &mut RequestTracker) -> Vec<TransportEvent> {
        if self.ending {
            debug!("Event loop stopped after disconnect: {}", reason);
            self.online = false;
            return vec![TransportEvent::Closed, TransportEvent::End];
        }

        error!("MQTT connection error: {}", reason);
        tracker.fail_in_flight(RequestKind::Subscribe, || MqttError::ConnectionLost);
        tracker.fail_in_flight(RequestKind::Unsubscribe, || MqttError::ConnectionLost);
        self.reconnecting = true;

        let mut events = vec![
            TransportEvent::Error(reason.to_string()),
            TransportEvent::Closed,
        ];
        if self.online {
            self.online = false;
            events.push(TransportEvent::Offline);
        }
        events
    }
}
