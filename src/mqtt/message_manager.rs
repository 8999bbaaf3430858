use chrono::{DateTime, Local};
use serde_json::Value;
use std::fmt;

use super::error::MqttError;

/// Incoming message with its payload parsed as JSON
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Value,
    pub received_at: DateTime<Local>,
}

impl MqttMessage {
    /// Decodes a raw payload as UTF-8 text and parses it as JSON
    pub fn decode(topic: impl Into<String>, payload: &[u8]) -> Result<Self, MqttError> {
        Ok(MqttMessage {
            topic: topic.into(),
            payload: decode_payload(payload)?,
            received_at: Local::now(),
        })
    }
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {} {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload
        )
    }
}

pub fn decode_payload(payload: &[u8]) -> Result<Value, MqttError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

/// Printable preview of an outgoing payload for the debug log
pub fn preview(payload: &[u8]) -> String {
    const MAX: usize = 120;
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= MAX {
        return text.into_owned();
    }
    let mut cut: String = text.chars().take(MAX).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_json_object() {
        let msg = MqttMessage::decode("t", br#"{"x":1}"#).unwrap();
        assert_eq!(msg.topic, "t");
        assert_eq!(msg.payload, json!({"x": 1}));
        assert!(msg.to_string().contains("t {\"x\":1}"));
    }

    #[test]
    fn decodes_json_scalars() {
        assert_eq!(decode_payload(b"42").unwrap(), json!(42));
        assert_eq!(decode_payload(b"\"on\"").unwrap(), json!("on"));
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(matches!(
            decode_payload(&[0xff, 0xfe]),
            Err(MqttError::PayloadEncoding(_))
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            decode_payload(b"{not json"),
            Err(MqttError::PayloadDecode(_))
        ));
    }

    #[test]
    fn preview_truncates_long_payloads() {
        let long = vec![b'a'; 500];
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), 121);
        assert_eq!(preview(b"short"), "short");
    }
}
