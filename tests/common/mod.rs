#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mqtt_relay::mqtt::transport::Completer;
use mqtt_relay::{
    Ack, MqttError, MqttListener, MqttTransport, PublishOptions, QoS, Topics, TransportEvent,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(50);

/// Request as seen by the scripted transport
#[derive(Debug)]
pub enum Request {
    Subscribe {
        topics: Vec<String>,
        qos: QoS,
        done: Completer,
    },
    Unsubscribe {
        topics: Vec<String>,
        done: Completer,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        options: PublishOptions,
        done: Completer,
    },
    End,
}

impl Request {
    pub fn complete(self, result: Result<Ack, MqttError>) {
        let done = match self {
            Request::Subscribe { done, .. }
            | Request::Unsubscribe { done, .. }
            | Request::Publish { done, .. } => done,
            Request::End => panic!("end has no completion"),
        };
        done.send(result).expect("session stopped waiting");
    }
}

/// Transport that records requests and lets the test resolve them
pub struct FakeTransport {
    requests: Arc<Mutex<VecDeque<Request>>>,
}

/// Test-side handle of a [`FakeTransport`]
#[derive(Clone)]
pub struct FakeBroker {
    requests: Arc<Mutex<VecDeque<Request>>>,
    events: mpsc::Sender<TransportEvent>,
}

pub fn fake_connection() -> (FakeTransport, FakeBroker, mpsc::Receiver<TransportEvent>) {
    let requests = Arc::new(Mutex::new(VecDeque::new()));
    let (events_tx, events_rx) = mpsc::channel(16);
    (
        FakeTransport {
            requests: requests.clone(),
        },
        FakeBroker {
            requests,
            events: events_tx,
        },
        events_rx,
    )
}

impl FakeTransport {
    fn push(&self, request: Request) {
        self.requests.lock().unwrap().push_back(request);
    }

    fn record(&self, make: impl FnOnce(Completer) -> Request) -> mqtt_relay::mqtt::Completion {
        let (done, completion) = oneshot::channel();
        self.push(make(done));
        completion
    }
}

impl MqttTransport for FakeTransport {
    fn subscribe(&self, topics: &[String], qos: QoS) -> mqtt_relay::mqtt::Completion {
        let topics = topics.to_vec();
        self.record(|done| Request::Subscribe { topics, qos, done })
    }

    fn unsubscribe(&self, topics: &[String]) -> mqtt_relay::mqtt::Completion {
        let topics = topics.to_vec();
        self.record(|done| Request::Unsubscribe { topics, done })
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> mqtt_relay::mqtt::Completion {
        let topic = topic.to_string();
        self.record(|done| Request::Publish {
            topic,
            payload,
            options,
            done,
        })
    }

    fn end(&self) -> Result<(), MqttError> {
        self.push(Request::End);
        Ok(())
    }
}

impl FakeBroker {
    pub async fn emit(&self, event: TransportEvent) {
        self.events.send(event).await.expect("relay stopped");
    }

    pub async fn message(&self, topic: &str, payload: &[u8]) {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
        .await;
    }

    pub fn next_request(&self) -> Request {
        self.requests
            .lock()
            .unwrap()
            .pop_front()
            .expect("no request recorded")
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Connected,
    Disconnected,
    Subscribed(Topics),
    SubscribeFail(Topics, String),
    Unsubscribed(Topics),
    UnsubscribeFail(Topics, String),
    Message(String, Value),
    MessageError(String),
}

/// Listener forwarding every callback, tagged with its name, into a channel
pub struct Recording {
    name: &'static str,
    tx: mpsc::UnboundedSender<(&'static str, Seen)>,
}

impl Recording {
    fn seen(&self, event: Seen) {
        let _ = self.tx.send((self.name, event));
    }
}

impl MqttListener for Recording {
    fn on_connected(&self) {
        self.seen(Seen::Connected);
    }

    fn on_disconnected(&self) {
        self.seen(Seen::Disconnected);
    }

    fn on_subscribed(&self, topics: &Topics) {
        self.seen(Seen::Subscribed(topics.clone()));
    }

    fn on_subscribe_fail(&self, topics: &Topics, error: &MqttError) {
        self.seen(Seen::SubscribeFail(topics.clone(), error.to_string()));
    }

    fn on_unsubscribed(&self, topics: &Topics) {
        self.seen(Seen::Unsubscribed(topics.clone()));
    }

    fn on_unsubscribe_fail(&self, topics: &Topics, error: &MqttError) {
        self.seen(Seen::UnsubscribeFail(topics.clone(), error.to_string()));
    }

    fn on_message(&self, topic: &str, payload: &Value) {
        self.seen(Seen::Message(topic.to_string(), payload.clone()));
    }

    fn on_message_error(&self, topic: &str, _error: &MqttError) {
        self.seen(Seen::MessageError(topic.to_string()));
    }
}

/// Collects what a group of [`Recording`] listeners observed
pub struct Recorder {
    tx: mpsc::UnboundedSender<(&'static str, Seen)>,
    rx: mpsc::UnboundedReceiver<(&'static str, Seen)>,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn listener(&self, name: &'static str) -> Arc<dyn MqttListener> {
        Arc::new(Recording {
            name,
            tx: self.tx.clone(),
        })
    }

    pub async fn next(&mut self) -> (&'static str, Seen) {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for listener callback")
            .expect("recorder closed")
    }

    pub async fn assert_quiet(&mut self) {
        if let Ok(Some(seen)) = tokio::time::timeout(QUIET, self.rx.recv()).await {
            panic!("unexpected listener callback: {:?}", seen);
        }
    }
}

/// In-memory writer for capturing formatted log output
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Installs an INFO-level fmt subscriber on the current thread
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}
