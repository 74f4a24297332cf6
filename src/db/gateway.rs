//! `SQLite` implementation of the pipeline's storage interfaces

use async_trait::async_trait;

use super::{CompanyRepo, ContactRepo, ConversationRepo, DbPool, MessageRepo};
use crate::Result;
use crate::gateway::{
    ContactUpsert, ConversationUpsert, InstanceDirectory, MessageInsert, NewMessage,
    PersistenceGateway, ResolvedInstance, StoredMessage, Upserted,
};

/// Instance directory and persistence gateway over one pool
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    companies: CompanyRepo,
    contacts: ContactRepo,
    conversations: ConversationRepo,
    messages: MessageRepo,
}

impl SqliteGateway {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self {
            companies: CompanyRepo::new(pool.clone()),
            contacts: ContactRepo::new(pool.clone()),
            conversations: ConversationRepo::new(pool.clone()),
            messages: MessageRepo::new(pool),
        }
    }
}

#[async_trait]
impl InstanceDirectory for SqliteGateway {
    async fn resolve_instance(&self, instance_name: &str) -> Result<Option<ResolvedInstance>> {
        self.companies.resolve(instance_name)
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn find_or_create_contact(&self, contact: &ContactUpsert<'_>) -> Result<Upserted> {
        self.contacts.find_or_create(contact)
    }

    async fn find_or_create_conversation(
        &self,
        conversation: &ConversationUpsert<'_>,
    ) -> Result<Upserted> {
        self.conversations.find_or_create(conversation)
    }

    async fn find_message_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<StoredMessage>> {
        self.messages.find_by_provider_id(provider_id)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageInsert> {
        self.messages.insert(message)
    }
}
