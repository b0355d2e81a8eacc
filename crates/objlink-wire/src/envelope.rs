//! Wire envelope for remote object events.
//!
//! Each message is a JSON object `{event, objectId, member, data}`. `data` is
//! itself JSON, carried base64-encoded: a single value for `prop` and `reply`,
//! an ordered argument list for `sig` and `inv`.

use objlink_types::{LinkError, LinkResult, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serde helper for `Vec<u8>` as a base64 string (`null` reads as empty).
mod base64_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// The kind of an event, which fixes the shape of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Property change, single value.
    #[serde(rename = "prop")]
    Property,
    /// Signal, argument list.
    #[serde(rename = "sig")]
    Signal,
    /// Method invocation, argument list.
    #[serde(rename = "inv")]
    Invoke,
    /// Method result, single value.
    #[serde(rename = "reply")]
    Reply,
    /// Method failure reply, [`ErrorReply`] payload.
    #[serde(rename = "err")]
    Error,
}

impl EventKind {
    /// Whether the payload is an ordered argument list.
    pub fn carries_args(self) -> bool {
        matches!(self, EventKind::Signal | EventKind::Invoke)
    }

    /// The wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Property => "prop",
            EventKind::Signal => "sig",
            EventKind::Invoke => "inv",
            EventKind::Reply => "reply",
            EventKind::Error => "err",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a method invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No implementation registered for the member.
    NotFound,
    /// The implementation returned an error.
    Failed,
}

impl ErrorCode {
    /// The wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::Failed => "failed",
        }
    }
}

/// Payload of an [`EventKind::Error`] reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: ErrorCode,
    pub message: String,
}

/// A single event on an object's topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Identity of the object, also the transport topic.
    #[serde(rename = "objectId")]
    pub object_id: String,
    /// Property, signal or method name.
    pub member: String,
    /// JSON-encoded payload.
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
}

impl Event {
    /// Build an event around an already encoded payload.
    pub fn new(
        kind: EventKind,
        object_id: impl Into<String>,
        member: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            object_id: object_id.into(),
            member: member.into(),
            data,
        }
    }

    pub fn property(object_id: impl Into<String>, member: impl Into<String>, value: Value) -> Self {
        Self::new(EventKind::Property, object_id, member, value_bytes(value))
    }

    pub fn signal(object_id: impl Into<String>, member: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(EventKind::Signal, object_id, member, value_bytes(Value::List(args)))
    }

    pub fn invoke(object_id: impl Into<String>, member: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(EventKind::Invoke, object_id, member, value_bytes(Value::List(args)))
    }

    /// Reply to an invoke. Carries the same object and member as the request.
    pub fn reply(object_id: impl Into<String>, member: impl Into<String>, result: Value) -> Self {
        Self::new(EventKind::Reply, object_id, member, value_bytes(result))
    }

    /// Failure reply to an invoke.
    pub fn error(object_id: impl Into<String>, member: impl Into<String>, reply: &ErrorReply) -> Self {
        let payload = BTreeMap::from([
            ("code".to_string(), Value::from(reply.code.as_str())),
            ("message".to_string(), Value::from(reply.message.as_str())),
        ]);
        Self::new(EventKind::Error, object_id, member, value_bytes(Value::Map(payload)))
    }

    /// Decode the payload as a single value.
    pub fn value(&self) -> LinkResult<Value> {
        serde_json::from_slice(&self.data)
            .map_err(|e| LinkError::Decode(format!("{} payload of {}: {e}", self.kind, self.member)))
    }

    /// Decode the payload as an ordered argument list. `null` reads as no arguments.
    pub fn args(&self) -> LinkResult<Vec<Value>> {
        match self.value()? {
            Value::List(args) => Ok(args),
            Value::Null => Ok(Vec::new()),
            other => Err(LinkError::Decode(format!(
                "{} payload of {} is not an argument list: {other:?}",
                self.kind, self.member
            ))),
        }
    }

    /// Decode the payload as keyword arguments.
    pub fn kwargs(&self) -> LinkResult<BTreeMap<String, Value>> {
        match self.value()? {
            Value::Map(map) => Ok(map),
            other => Err(LinkError::Decode(format!(
                "{} payload of {} is not a keyword map: {other:?}",
                self.kind, self.member
            ))),
        }
    }

    /// Decode the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> LinkResult<T> {
        serde_json::from_slice(&self.data)
            .map_err(|e| LinkError::Decode(format!("{} payload of {}: {e}", self.kind, self.member)))
    }

    /// Decode an [`EventKind::Error`] payload.
    pub fn error_reply(&self) -> LinkResult<ErrorReply> {
        self.decode()
    }
}

fn value_bytes(value: Value) -> Vec<u8> {
    serde_json::Value::from(value).to_string().into_bytes()
}

/// Encode an event of `kind` carrying `payload`.
///
/// Signal and invoke events require `payload` to be a [`Value::List`].
pub fn encode(kind: EventKind, object_id: &str, member: &str, payload: Value) -> LinkResult<Vec<u8>> {
    if kind.carries_args() && !matches!(payload, Value::List(_)) {
        return Err(LinkError::Decode(format!(
            "{kind} event for {object_id}.{member} needs an argument list"
        )));
    }
    encode_event(&Event::new(kind, object_id, member, value_bytes(payload)))
}

/// Serialize an event envelope.
pub fn encode_event(event: &Event) -> LinkResult<Vec<u8>> {
    serde_json::to_vec(event).map_err(|e| LinkError::Decode(e.to_string()))
}

/// Parse an event envelope without looking at the payload.
///
/// Method replies go through this: peers that answer by reusing the `inv`
/// envelope put a single result value where the arguments were.
pub fn parse_envelope(bytes: &[u8]) -> LinkResult<Event> {
    serde_json::from_slice(bytes).map_err(|e| LinkError::Decode(format!("envelope: {e}")))
}

/// Parse an event envelope and check its payload shape.
pub fn decode_event(bytes: &[u8]) -> LinkResult<Event> {
    let event = parse_envelope(bytes)?;
    match event.kind {
        EventKind::Signal | EventKind::Invoke => {
            event.args()?;
        }
        EventKind::Property | EventKind::Reply => {
            event.value()?;
        }
        EventKind::Error => {
            event.error_reply()?;
        }
    }
    Ok(event)
}
