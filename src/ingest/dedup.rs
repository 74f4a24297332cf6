//! Idempotency guard against provider redelivery

use crate::Result;
use crate::gateway::{PersistenceGateway, StoredMessage};

/// Result of the duplicate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    /// No message recorded under this provider id
    New,
    /// Already recorded; carries the existing row
    Duplicate(Box<StoredMessage>),
}

/// Look up a provider message id before inserting
///
/// Runs after identity resolution so a retried delivery still refreshes the
/// contact and conversation, and before the insert so no second row is
/// attempted. The insert itself is idempotent too, which covers a retry
/// racing the first attempt between this check and the insert.
///
/// # Errors
///
/// Returns error if the gateway lookup fails
pub async fn check(gateway: &dyn PersistenceGateway, provider_id: &str) -> Result<DuplicateCheck> {
    Ok(match gateway.find_message_by_provider_id(provider_id).await? {
        Some(existing) => DuplicateCheck::Duplicate(Box::new(existing)),
        None => DuplicateCheck::New,
    })
}
