//! Noise filter for events that must never become CRM messages

use serde::Serialize;

use super::envelope::WebhookMessage;

/// Marker carried by anonymous/broadcast link identifiers
pub const LID_MARKER: &str = "@lid";

/// Suffix carried by group chat identifiers
pub const GROUP_SUFFIX: &str = "@g.us";

/// Why an event was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    /// Group chat message
    GroupMessage,
    /// Authored by the connected line and self-sent events are ignored
    SelfSent,
    /// The CRM's own outbound send echoed back by the provider
    ApiEchoed,
    /// Anonymous/broadcast link identifier, never a phone number
    AnonymousLinkIdentifier,
}

impl FilterReason {
    /// Machine-readable reason
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GroupMessage => "group_message",
            Self::SelfSent => "self_sent",
            Self::ApiEchoed => "api_echoed",
            Self::AnonymousLinkIdentifier => "anonymous_link_identifier",
        }
    }
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(FilterReason),
}

/// Noise filter
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseFilter {
    /// Also reject every `fromMe` event
    pub ignore_self_sent: bool,
}

impl NoiseFilter {
    /// Create a filter
    #[must_use]
    pub const fn new(ignore_self_sent: bool) -> Self {
        Self { ignore_self_sent }
    }

    /// Evaluate the rules in order; the first match wins
    ///
    /// 1. LID identifier on sender or chat
    /// 2. group flag or group suffix on sender or chat
    /// 3. API echo of the CRM's own send
    /// 4. any `fromMe` event, when self-sent events are ignored
    #[must_use]
    pub fn check(&self, message: &WebhookMessage, chat_id: Option<&str>) -> FilterDecision {
        let ids = [message.sender.as_deref(), message.chatid.as_deref(), chat_id];
        let ids = ids.iter().flatten();

        if ids.clone().any(|id| id.contains(LID_MARKER)) {
            return FilterDecision::Reject(FilterReason::AnonymousLinkIdentifier);
        }

        if message.is_group || ids.clone().any(|id| id.ends_with(GROUP_SUFFIX)) {
            return FilterDecision::Reject(FilterReason::GroupMessage);
        }

        if message.was_sent_by_api {
            return FilterDecision::Reject(FilterReason::ApiEchoed);
        }

        if self.ignore_self_sent && message.from_me {
            return FilterDecision::Reject(FilterReason::SelfSent);
        }

        FilterDecision::Accept
    }
}
