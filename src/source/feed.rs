//! Feed events, topic routing and payload decoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Suffix of every telemetry topic.
const TELEMETRY_SUFFIX: &str = "/telemetry";

/// One delivery from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Last-known-value replay rather than a live publish.
    pub retained: bool,
}

impl FeedMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained,
        }
    }
}

/// Transport lifecycle and message events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Connected,
    Message(FeedMessage),
    /// A transport-level error. The transport may keep retrying.
    Error(String),
    /// Input that could not be decoded into a delivery. The transport is
    /// still healthy.
    Malformed(String),
    Closed,
}

/// Errors produced while decoding feed input.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),

    #[error("malformed feed record: {0}")]
    MalformedRecord(String),
}

/// Extract the source id from a `<prefix><digits>/telemetry` topic.
///
/// Returns `None` for any other topic.
///
/// ```
/// use nodewatch::source::parse_topic;
///
/// assert_eq!(parse_topic("source3/telemetry", "source").as_deref(), Some("source3"));
/// assert_eq!(parse_topic("source3/status", "source"), None);
/// ```
pub fn parse_topic(topic: &str, prefix: &str) -> Option<String> {
    let id = topic.strip_suffix(TELEMETRY_SUFFIX)?;
    let digits = id.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(id.to_string())
}

/// Decode a payload into a flat JSON object.
pub fn decode_payload(payload: &[u8]) -> Result<Map<String, Value>, FeedError> {
    let text = std::str::from_utf8(payload)?;
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(FeedError::NotAnObject("array")),
        Value::String(_) => Err(FeedError::NotAnObject("string")),
        Value::Number(_) => Err(FeedError::NotAnObject("number")),
        Value::Bool(_) => Err(FeedError::NotAnObject("boolean")),
        Value::Null => Err(FeedError::NotAnObject("null")),
    }
}

/// A recorded feed message, one per line in replay files and TCP streams.
///
/// `payload` is either the JSON document itself or a string holding the raw
/// payload text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub topic: String,
    pub payload: Value,
    #[serde(default)]
    pub retained: bool,
}

impl FeedRecord {
    /// Parse one record from a line of text.
    pub fn parse(line: &str) -> Result<Self, FeedError> {
        serde_json::from_str(line).map_err(|e| FeedError::MalformedRecord(e.to_string()))
    }

    /// Convert to the message the transport would have delivered.
    pub fn into_message(self) -> FeedMessage {
        let payload = match self.payload {
            Value::String(raw) => raw.into_bytes(),
            other => other.to_string().into_bytes(),
        };
        FeedMessage {
            topic: self.topic,
            payload,
            retained: self.retained,
        }
    }
}
