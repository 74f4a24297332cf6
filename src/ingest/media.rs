//! Media-vs-text classification and media URL resolution
//!
//! No single field marks media across every payload variant, so
//! classification ORs four independent signals. Binary content is fetched
//! and persisted by a [`MediaStore`]; the durable message content never holds
//! the provider URL, which may be time-limited.

use super::IngestError;
use super::envelope::{ContentObject, WebhookMessage, first_non_empty};
use crate::gateway::MediaStore;

/// Provider message types that are plain text, compared case-insensitively
pub const PLAIN_TEXT_TYPES: [&str; 2] = ["conversation", "extendedtextmessage"];

/// Message type recorded for plain text
pub const TEXT_MESSAGE_TYPE: &str = "text";

/// Classification of a message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Plain text
    Text { content: String },
    /// Media attachment
    Media {
        /// Media subtype (`image`, `audio`, `document`, ...)
        subtype: String,
        /// Provider URL of the binary, when one was found
        source_url: Option<String>,
        /// Original text fields, used when the media cannot be stored
        text: String,
    },
}

/// Final content of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContent {
    pub is_media: bool,
    pub content: String,
    pub media_url: Option<String>,
    pub message_type: String,
}

/// Whether any media signal is present
#[must_use]
pub fn is_media(message: &WebhookMessage) -> bool {
    let generic_media = message
        .kind
        .as_deref()
        .is_some_and(|k| k.eq_ignore_ascii_case("media"))
        && has_text(message.media_type.as_deref());

    let media_message_type = message.message_type.as_deref().is_some_and(|t| {
        let lower = t.to_ascii_lowercase();
        lower.contains("message") && !PLAIN_TEXT_TYPES.contains(&lower.as_str())
    });

    let nested_media_url = has_text(message.media.as_ref().and_then(|m| m.url.as_deref()));

    let content_object_url = message
        .content_object()
        .and_then(ContentObject::any_url)
        .is_some();

    generic_media || media_message_type || nested_media_url || content_object_url
}

/// Locate the media URL: content object, then `media.url`, then top-level `url`
#[must_use]
pub fn source_url(message: &WebhookMessage) -> Option<&str> {
    first_non_empty(&[
        message.content_object().and_then(ContentObject::any_url),
        message.media.as_ref().and_then(|m| m.url.as_deref()),
        message.url.as_deref(),
    ])
}

/// First non-empty of the text field and a string `content`, else empty
#[must_use]
pub fn text_content(message: &WebhookMessage) -> String {
    first_non_empty(&[message.text.as_deref(), message.content_text()])
        .unwrap_or_default()
        .to_string()
}

/// Media subtype used for the message type and the placeholder
#[must_use]
pub fn media_subtype(message: &WebhookMessage) -> String {
    if let Some(media_type) = message.media_type.as_deref().filter(|s| !s.trim().is_empty()) {
        return media_type.trim().to_ascii_lowercase();
    }

    if let Some(message_type) = message.message_type.as_deref() {
        let lower = message_type.trim().to_ascii_lowercase();
        if let Some(stem) = lower.strip_suffix("message").filter(|s| !s.is_empty()) {
            return stem.to_string();
        }
    }

    let mimetype = message
        .content_object()
        .and_then(|c| c.mimetype.as_deref())
        .or_else(|| message.media.as_ref().and_then(|m| m.mimetype.as_deref()));
    if let Some((major, _)) = mimetype.and_then(|m| m.split_once('/')) {
        if !major.is_empty() {
            return major.to_ascii_lowercase();
        }
    }

    "media".to_string()
}

/// Placeholder content for a stored attachment
#[must_use]
pub fn placeholder(subtype: &str) -> String {
    format!("[{subtype}]")
}

/// Classify a message as text or media
#[must_use]
pub fn classify(message: &WebhookMessage) -> Classified {
    let text = text_content(message);

    if !is_media(message) {
        return Classified::Text { content: text };
    }

    Classified::Media {
        subtype: media_subtype(message),
        source_url: source_url(message).map(ToString::to_string),
        text,
    }
}

/// Resolve final content, persisting the attachment through the store
///
/// With no store, no URL, or a failed store in non-strict mode, the message
/// keeps its original text and a null media URL.
///
/// # Errors
///
/// Returns [`IngestError::MediaFetch`] when the store fails and `strict` is set
pub async fn resolve(
    classified: Classified,
    store: Option<&dyn MediaStore>,
    company_id: &str,
    provider_id: &str,
    strict: bool,
) -> Result<ResolvedContent, IngestError> {
    let (subtype, source_url, text) = match classified {
        Classified::Text { content } => {
            return Ok(ResolvedContent {
                is_media: false,
                content,
                media_url: None,
                message_type: TEXT_MESSAGE_TYPE.to_string(),
            });
        }
        Classified::Media {
            subtype,
            source_url,
            text,
        } => (subtype, source_url, text),
    };

    let unstored = |text: String, subtype: String| ResolvedContent {
        is_media: true,
        content: text,
        media_url: None,
        message_type: subtype,
    };

    let Some(source_url) = source_url else {
        tracing::debug!(provider_id, subtype = %subtype, "media message without URL");
        return Ok(unstored(text, subtype));
    };

    let Some(store) = store else {
        tracing::debug!(provider_id, "media store disabled, keeping text only");
        return Ok(unstored(text, subtype));
    };

    match store.persist_media(company_id, provider_id, &source_url).await {
        Ok(stored_url) => {
            tracing::debug!(provider_id, store = store.name(), url = %stored_url, "media stored");
            Ok(ResolvedContent {
                is_media: true,
                content: placeholder(&subtype),
                media_url: Some(stored_url),
                message_type: subtype,
            })
        }
        Err(e) if strict => Err(IngestError::MediaFetch(e.to_string())),
        Err(e) => {
            tracing::warn!(
                provider_id,
                store = store.name(),
                error = %e,
                "failed to store media, keeping text only"
            );
            Ok(unstored(text, subtype))
        }
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|s| !s.trim().is_empty())
}
