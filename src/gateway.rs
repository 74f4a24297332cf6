//! Interfaces the ingestion pipeline consumes
//!
//! The pipeline decides what a contact, conversation or message should look
//! like; implementations of these traits own the actual commit. Find-or-create
//! and insert-or-detect-duplicate must be atomic per key: two concurrent
//! deliveries for the same new phone number or the same provider message id
//! must not produce two rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Result;
use crate::ingest::Direction;

/// Instance lookup result: the connected line and its owning company
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstance {
    pub instance_id: String,
    pub company_id: String,
    pub company_name: String,
}

/// Outcome of a find-or-create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub id: String,
    /// `true` when this call created the row
    pub created: bool,
}

/// Contact fields supplied on find-or-create
#[derive(Debug, Clone)]
pub struct ContactUpsert<'a> {
    pub company_id: &'a str,
    pub phone: &'a str,
    /// Display name; an empty name never overwrites a stored one
    pub name: &'a str,
    /// Stored on creation only
    pub avatar_url: Option<&'a str>,
    pub source: &'a str,
}

/// Conversation fields supplied on find-or-create
#[derive(Debug, Clone)]
pub struct ConversationUpsert<'a> {
    pub company_id: &'a str,
    pub phone: &'a str,
    pub contact_id: &'a str,
    pub instance_id: &'a str,
    pub last_message_at: DateTime<Utc>,
}

/// A message about to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub provider_message_id: String,
    pub conversation_id: String,
    pub company_id: String,
    pub instance_id: String,
    pub content: String,
    pub message_type: String,
    pub direction: Direction,
    pub sender_name: Option<String>,
    pub sender_phone: String,
    pub media_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

/// A recorded message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub provider_message_id: String,
    pub conversation_id: String,
    pub company_id: String,
    pub instance_id: String,
    pub content: String,
    pub message_type: String,
    pub direction: Direction,
    pub sender_name: Option<String>,
    pub sender_phone: String,
    pub media_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

/// Outcome of an idempotent message insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageInsert {
    /// The row was created by this call
    Created(String),
    /// A row with the same provider message id already existed
    Existing(String),
}

impl MessageInsert {
    /// Internal id of the message row, created or not
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }
}

/// Instance/company lookup
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Resolve a provider instance name to its company
    ///
    /// Returns `Ok(None)` when no instance carries that name.
    ///
    /// # Errors
    ///
    /// Returns error if the lookup itself fails
    async fn resolve_instance(&self, instance_name: &str) -> Result<Option<ResolvedInstance>>;
}

/// Contact, conversation and message persistence
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Find or create the contact keyed by (company, phone)
    ///
    /// On find, only the stored name changes, and only when a non-empty name
    /// is given. The avatar is written when the contact is created.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails
    async fn find_or_create_contact(&self, contact: &ContactUpsert<'_>) -> Result<Upserted>;

    /// Find or create the conversation keyed by (company, phone)
    ///
    /// On find, `last_message_at` is advanced to the given timestamp.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails
    async fn find_or_create_conversation(
        &self,
        conversation: &ConversationUpsert<'_>,
    ) -> Result<Upserted>;

    /// Look up a message by provider message id
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails
    async fn find_message_by_provider_id(&self, provider_id: &str)
    -> Result<Option<StoredMessage>>;

    /// Insert a message, or return the existing row for its provider id
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails
    async fn insert_message(&self, message: &NewMessage) -> Result<MessageInsert>;
}

/// Fetch-and-persist of media attachments
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Copy the media at `source_url` into durable storage
    ///
    /// Returns the durable URL.
    ///
    /// # Errors
    ///
    /// Returns error if the download or the write fails
    async fn persist_media(
        &self,
        company_id: &str,
        message_id: &str,
        source_url: &str,
    ) -> Result<String>;

    /// Store name for logging
    fn name(&self) -> &'static str;
}
