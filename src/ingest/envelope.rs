//! Webhook envelope detection and payload decoding
//!
//! The provider wraps the same event in one of three envelopes depending on
//! its delivery mode:
//!
//! ```text
//! Batched  [ { "body": { ...event } } ]
//! Wrapped  { "body": { ...event } }
//! Direct   { ...event }
//! ```
//!
//! The envelope is peeled once here and the event decoded into typed structs.
//! Field decoding is tolerant: a field carrying an unexpected JSON type reads
//! as absent instead of failing the whole event.

use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::IngestError;

/// Event type carrying chat messages
pub const MESSAGES_EVENT: &str = "messages";

/// Header consulted when the body carries no instance name
pub const INSTANCE_HEADER: &str = "x-instance-name";

/// Known envelope shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeShape {
    /// Non-empty array whose first element nests the event under `body`
    Batched,
    /// Object nesting the event under `body`
    Wrapped,
    /// The event itself
    Direct,
}

impl EnvelopeShape {
    /// Detect the shape of a decoded request body
    #[must_use]
    pub fn detect(body: &Value) -> Self {
        match body {
            Value::Array(items) if !items.is_empty() => Self::Batched,
            Value::Object(map) if map.contains_key("body") => Self::Wrapped,
            _ => Self::Direct,
        }
    }

    /// Short name for logging
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Batched => "batched",
            Self::Wrapped => "wrapped",
            Self::Direct => "direct",
        }
    }
}

/// Peel the envelope off a request body
///
/// Returns the detected shape and the inner event value. A batched element
/// without `body` yields `Value::Null`, which later fails as unrecognized.
#[must_use]
pub fn unwrap_envelope(body: Value) -> (EnvelopeShape, Value) {
    let shape = EnvelopeShape::detect(&body);
    let inner = match (shape, body) {
        (EnvelopeShape::Batched, Value::Array(mut items)) => {
            match items.swap_remove(0) {
                Value::Object(mut first) => first.remove("body").unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
        (EnvelopeShape::Wrapped, Value::Object(mut map)) => {
            map.remove("body").unwrap_or(Value::Null)
        }
        (_, other) => other,
    };
    (shape, inner)
}

/// Event as sent by the provider, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default, rename = "EventType", deserialize_with = "lenient_string")]
    pub event_type_pascal: Option<String>,
    #[serde(default, rename = "eventType", deserialize_with = "lenient_string")]
    pub event_type_camel: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub event: Option<String>,

    #[serde(default, rename = "instanceName", deserialize_with = "lenient_string")]
    pub instance_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub instance: Option<String>,
    #[serde(default, rename = "instance_name", deserialize_with = "lenient_string")]
    pub instance_name_snake: Option<String>,

    #[serde(default, deserialize_with = "lenient_object")]
    pub message: Option<WebhookMessage>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub chat: Option<ChatInfo>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub owner: Option<String>,
}

impl RawEvent {
    fn event_type(&self) -> Option<&str> {
        first_non_empty(&[
            self.event_type_pascal.as_deref(),
            self.event_type_camel.as_deref(),
            self.event.as_deref(),
        ])
    }

    fn instance_name(&self) -> Option<&str> {
        first_non_empty(&[
            self.instance_name.as_deref(),
            self.instance.as_deref(),
            self.instance_name_snake.as_deref(),
        ])
    }
}

/// Message object nested in an event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessage {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, rename = "messageid", deserialize_with = "lenient_string")]
    pub messageid: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message_id: Option<String>,

    /// Author identifier (`<digits>@s.whatsapp.net`, `<id>@lid`, ...)
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender: Option<String>,
    /// Chat identifier; the remote party for direct chats
    #[serde(default, rename = "chatid", deserialize_with = "lenient_string")]
    pub chatid: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub from_me: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub was_sent_by_api: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub device_sent: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_group: bool,

    /// Provider message type (`conversation`, `imageMessage`, ...)
    #[serde(default, deserialize_with = "lenient_string")]
    pub message_type: Option<String>,
    /// Generic kind (`text`, `media`)
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub kind: Option<String>,
    /// Media subtype (`image`, `audio`, `ptt`, `document`, ...)
    #[serde(default, deserialize_with = "lenient_string")]
    pub media_type: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub media: Option<MediaRef>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,

    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub message_timestamp: Option<i64>,
}

impl WebhookMessage {
    /// Provider message id (`messageid`, then `messageId`, then `id`)
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        first_non_empty(&[
            self.messageid.as_deref(),
            self.message_id.as_deref(),
            self.id.as_deref(),
        ])
    }

    /// Text carried by `content` when it is a plain string
    #[must_use]
    pub fn content_text(&self) -> Option<&str> {
        match &self.content {
            Some(MessageContent::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Content object when `content` is structured
    #[must_use]
    pub fn content_object(&self) -> Option<&ContentObject> {
        match &self.content {
            Some(MessageContent::Object(obj)) => Some(obj),
            _ => None,
        }
    }
}

/// `content` is either a plain string or a structured media descriptor
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Object(ContentObject),
    Other(Value),
}

/// Structured `content` payload of media messages
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentObject {
    #[serde(default, rename = "URL", deserialize_with = "lenient_string")]
    pub url_upper: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub mimetype: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub caption: Option<String>,
}

impl ContentObject {
    /// `URL`, falling back to `url`
    #[must_use]
    pub fn any_url(&self) -> Option<&str> {
        first_non_empty(&[self.url_upper.as_deref(), self.url.as_deref()])
    }
}

/// Nested `media` object
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaRef {
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub mimetype: Option<String>,
}

/// Chat metadata nested in an event
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub wa_chatid: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub wa_name: Option<String>,
    #[serde(default, rename = "wa_contactName", deserialize_with = "lenient_string")]
    pub wa_contact_name: Option<String>,
    #[serde(default, rename = "imagePreview", deserialize_with = "lenient_string")]
    pub image_preview: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub image: Option<String>,
}

impl ChatInfo {
    /// Best display name for the remote party
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        first_non_empty(&[
            self.wa_contact_name.as_deref(),
            self.name.as_deref(),
            self.wa_name.as_deref(),
        ])
    }

    /// Profile picture URL
    #[must_use]
    pub fn avatar_url(&self) -> Option<&str> {
        first_non_empty(&[self.image_preview.as_deref(), self.image.as_deref()])
    }
}

/// A validated webhook event, discarded after the request
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub shape: EnvelopeShape,
    pub event_type: Option<String>,
    pub instance_name: String,
    pub message: WebhookMessage,
    pub chat: ChatInfo,
    pub owner: Option<String>,
    /// Unwrapped event as received, kept for debug logging
    pub raw: Value,
}

impl InboundEvent {
    /// Unwrap and decode a request body
    ///
    /// The instance name comes from the event, falling back to the
    /// [`INSTANCE_HEADER`] header.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::UnrecognizedPayload`] when the event carries no
    /// message, names a non-message event type, or has no instance name
    pub fn decode(body: Value, headers: &HeaderMap) -> Result<Self, IngestError> {
        let (shape, raw) = unwrap_envelope(body);

        if !raw.is_object() {
            return Err(IngestError::UnrecognizedPayload(format!(
                "{} envelope does not contain an event object",
                shape.as_str()
            )));
        }

        let event = RawEvent::deserialize(&raw)
            .map_err(|e| IngestError::UnrecognizedPayload(format!("undecodable event: {e}")))?;

        // Absent event type is tolerated; a different one is not
        let event_type = event.event_type().map(ToString::to_string);
        if let Some(kind) = &event_type {
            if !kind.eq_ignore_ascii_case(MESSAGES_EVENT) {
                return Err(IngestError::UnrecognizedPayload(format!(
                    "unsupported event type: {kind}"
                )));
            }
        }

        let instance_name = event
            .instance_name()
            .map(ToString::to_string)
            .or_else(|| {
                headers
                    .get(INSTANCE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
            })
            .ok_or_else(|| IngestError::UnrecognizedPayload("missing instance name".to_string()))?;

        let RawEvent {
            message,
            chat,
            owner,
            ..
        } = event;

        let message = message
            .ok_or_else(|| IngestError::UnrecognizedPayload("missing message".to_string()))?;

        Ok(Self {
            shape,
            event_type,
            instance_name,
            message,
            chat: chat.unwrap_or_default(),
            owner,
            raw,
        })
    }
}

/// First candidate that is present and not blank
pub(crate) fn first_non_empty<'a>(candidates: &[Option<&'a str>]) -> Option<&'a str> {
    candidates
        .iter()
        .flatten()
        .copied()
        .find(|s| !s.trim().is_empty())
}

/// Strings and numbers read as strings; anything else reads as absent
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Booleans, `"true"`/`"false"` and `0`/`1`; anything else reads as `false`
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true") || s.trim() == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    })
}

/// Integer, float or numeric string
#[allow(clippy::cast_possible_truncation)]
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Objects decode into `T`; anything else, or an undecodable object, reads as absent
fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    })
}
