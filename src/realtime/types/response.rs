use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::ws::{MessageParser, WsError};

/// Value of the `type` field that marks a server heartbeat.
pub const HEARTBEAT_TYPE: &str = "heartbeat";

/// An inbound frame, discriminated on its `type` field.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeMessage {
    /// Server liveness signal, consumed by the client
    Heartbeat,
    /// Anything else, forwarded to the registered callback
    Event(Event),
}

impl RealtimeMessage {
    fn from_value(value: Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some(HEARTBEAT_TYPE) => Self::Heartbeat,
            _ => Self::Event(Event(value)),
        }
    }
}

/// A decoded realtime event, exactly as the server sent it.
///
/// Events are usually JSON objects; named fields are reached through [`Event::get`] or the
/// typed accessors below. Non-object payloads are delivered unchanged too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Value);

impl Event {
    /// The `type` field, if present and a string.
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// The `id` field, if present and a string.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Looks up a named field of an object payload.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Event {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Event> for Value {
    fn from(event: Event) -> Self {
        event.0
    }
}

/// Decodes JSON frames into [`RealtimeMessage`]s.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct EventParser;

impl MessageParser<RealtimeMessage> for EventParser {
    fn parse(&self, bytes: &[u8]) -> Result<RealtimeMessage> {
        let value: Value = serde_json::from_slice(bytes).map_err(WsError::MessageParse)?;
        Ok(RealtimeMessage::from_value(value))
    }
}
