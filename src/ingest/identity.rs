//! Contact and conversation resolution

use chrono::{DateTime, Utc};

use crate::Result;
use crate::gateway::{ContactUpsert, ConversationUpsert, PersistenceGateway};

/// Who the message is with, as seen by the CRM
#[derive(Debug, Clone)]
pub struct IdentityRequest<'a> {
    pub company_id: &'a str,
    pub instance_id: &'a str,
    /// Canonical phone of the remote party
    pub phone: &'a str,
    /// Display name observed on this event, possibly empty
    pub name: &'a str,
    pub avatar_url: Option<&'a str>,
    /// Event timestamp, written as the conversation's last activity
    pub at: DateTime<Utc>,
}

/// Resolved contact and conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub contact_id: String,
    pub conversation_id: String,
    pub contact_created: bool,
    pub conversation_created: bool,
}

/// Finds or creates the contact, then the conversation
pub struct IdentityResolver<'a> {
    gateway: &'a dyn PersistenceGateway,
    source_tag: &'a str,
}

impl<'a> IdentityResolver<'a> {
    #[must_use]
    pub const fn new(gateway: &'a dyn PersistenceGateway, source_tag: &'a str) -> Self {
        Self {
            gateway,
            source_tag,
        }
    }

    /// Resolve both records, creating either or both as needed
    ///
    /// # Errors
    ///
    /// Returns error if the gateway fails
    pub async fn resolve(&self, request: &IdentityRequest<'_>) -> Result<ResolvedIdentity> {
        let contact = self
            .gateway
            .find_or_create_contact(&ContactUpsert {
                company_id: request.company_id,
                phone: request.phone,
                name: request.name.trim(),
                avatar_url: request.avatar_url,
                source: self.source_tag,
            })
            .await?;

        if contact.created {
            tracing::info!(
                company_id = request.company_id,
                phone = request.phone,
                contact_id = %contact.id,
                "created contact"
            );
        }

        let conversation = self
            .gateway
            .find_or_create_conversation(&ConversationUpsert {
                company_id: request.company_id,
                phone: request.phone,
                contact_id: &contact.id,
                instance_id: request.instance_id,
                last_message_at: request.at,
            })
            .await?;

        if conversation.created {
            tracing::info!(
                company_id = request.company_id,
                phone = request.phone,
                conversation_id = %conversation.id,
                "created conversation"
            );
        }

        Ok(ResolvedIdentity {
            contact_id: contact.id,
            conversation_id: conversation.id,
            contact_created: contact.created,
            conversation_created: conversation.created,
        })
    }
}
