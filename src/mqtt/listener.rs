//! Listener contract for session events

use std::fmt;

use serde_json::Value;

use super::error::MqttError;

/// Topic argument of subscribe/unsubscribe calls, handed back unchanged to
/// the listener callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topics {
    Single(String),
    Many(Vec<String>),
}

impl Topics {
    /// Topic names in call order
    pub fn names(&self) -> Vec<String> {
        match self {
            Topics::Single(topic) => vec![topic.clone()],
            Topics::Many(topics) => topics.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Topics::Single(_) => false,
            Topics::Many(topics) => topics.is_empty(),
        }
    }
}

impl From<&str> for Topics {
    fn from(topic: &str) -> Self {
        Topics::Single(topic.to_owned())
    }
}

impl From<String> for Topics {
    fn from(topic: String) -> Self {
        Topics::Single(topic)
    }
}

impl From<Vec<String>> for Topics {
    fn from(topics: Vec<String>) -> Self {
        Topics::Many(topics)
    }
}

impl From<&[&str]> for Topics {
    fn from(topics: &[&str]) -> Self {
        Topics::Many(topics.iter().map(|t| (*t).to_owned()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Topics {
    fn from(topics: [&str; N]) -> Self {
        Topics::Many(topics.iter().map(|t| (*t).to_owned()).collect())
    }
}

impl fmt::Display for Topics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Topics::Single(topic) => write!(f, "{}", topic),
            Topics::Many(topics) => write!(f, "[{}]", topics.join(", ")),
        }
    }
}

/// Receiver of connection, subscription and message events
///
/// Implementations are registered on a session with
/// [`MqttSession::add_listener`](crate::MqttSession::add_listener) and are
/// called from the session's relay tasks, hence `Send + Sync`. Callbacks must
/// not block; they run one after another for every listener.
pub trait MqttListener: Send + Sync {
    fn on_connected(&self);

    fn on_disconnected(&self);

    fn on_subscribed(&self, topics: &Topics);

    fn on_subscribe_fail(&self, topics: &Topics, error: &MqttError);

    fn on_unsubscribed(&self, topics: &Topics);

    fn on_unsubscribe_fail(&self, topics: &Topics, error: &MqttError);

    /// A message arrived and its payload parsed as JSON
    fn on_message(&self, topic: &str, payload: &Value);

    /// A message arrived but its payload was not UTF-8 JSON
    fn on_message_error(&self, _topic: &str, _error: &MqttError) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_single_and_many() {
        assert_eq!(Topics::from("a/b").to_string(), "a/b");
        assert_eq!(Topics::from(["a", "b"]).to_string(), "[a, b]");
    }

    #[test]
    fn names_keep_call_order() {
        let topics = Topics::from(vec!["z".to_string(), "a".to_string()]);
        assert_eq!(topics.names(), vec!["z", "a"]);
        assert!(!Topics::from("x").is_empty());
        assert!(Topics::Many(Vec::new()).is_empty());
    }
}
