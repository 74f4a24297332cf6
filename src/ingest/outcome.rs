//! Pipeline stages, classified failures and terminal outcomes

use serde::Serialize;
use thiserror::Error;

use super::filter::FilterReason;

/// Pipeline states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Received,
    Unwrapped,
    Filtered,
    DirectionResolved,
    PhoneResolved,
    MediaResolved,
    IdentityResolved,
    DuplicateChecked,
    Persisted,
    Responded,
}

impl IngestStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Unwrapped => "unwrapped",
            Self::Filtered => "filtered",
            Self::DirectionResolved => "direction_resolved",
            Self::PhoneResolved => "phone_resolved",
            Self::MediaResolved => "media_resolved",
            Self::IdentityResolved => "identity_resolved",
            Self::DuplicateChecked => "duplicate_checked",
            Self::Persisted => "persisted",
            Self::Responded => "responded",
        }
    }
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified, non-retryable ingestion failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// Body is not a recognizable message event
    #[error("unrecognized payload: {0}")]
    UnrecognizedPayload(String),

    /// Event carries no provider message id
    #[error("message has no provider id")]
    MissingMessageId,

    /// No usable phone number for the remote party
    #[error("invalid phone number: {0:?}")]
    InvalidPhoneNumber(String),

    /// Instance name is not registered
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Persistence gateway failed
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Media could not be fetched or stored
    #[error("media fetch failure: {0}")]
    MediaFetch(String),
}

impl IngestError {
    /// Machine-readable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnrecognizedPayload(_) => "unrecognized_payload",
            Self::MissingMessageId => "missing_message_id",
            Self::InvalidPhoneNumber(_) => "invalid_phone_number",
            Self::InstanceNotFound(_) => "instance_not_found",
            Self::Persistence(_) => "persistence_failure",
            Self::MediaFetch(_) => "media_fetch_failure",
        }
    }

    /// Whether the failure comes from the payload itself rather than infrastructure
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedPayload(_) | Self::MissingMessageId | Self::InvalidPhoneNumber(_)
        )
    }
}

impl From<crate::Error> for IngestError {
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::Media(msg) => Self::MediaFetch(msg),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Identifiers of a recorded message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedIds {
    pub message_id: String,
    pub contact_id: String,
    pub conversation_id: String,
}

/// Terminal outcome of one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new message was recorded
    Stored(IngestedIds),
    /// The provider message id was already recorded
    Duplicate(IngestedIds),
    /// The event was rejected by the noise filter
    Filtered(FilterReason),
    /// Processing stopped; `stage` names the step that failed
    Failed {
        stage: IngestStage,
        error: IngestError,
    },
}

impl IngestOutcome {
    pub(crate) const fn failed(stage: IngestStage, error: IngestError) -> Self {
        Self::Failed { stage, error }
    }

    /// Whether the delivery counts as handled
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Recorded message ids, for stored and duplicate outcomes
    #[must_use]
    pub const fn ids(&self) -> Option<&IngestedIds> {
        match self {
            Self::Stored(ids) | Self::Duplicate(ids) => Some(ids),
            Self::Filtered(_) | Self::Failed { .. } => None,
        }
    }
}
