//! Conversation repository

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use super::{DbPool, format_datetime, parse_datetime};
use crate::gateway::{ConversationUpsert, Upserted};
use crate::{Error, Result};

const CONVERSATION_COLUMNS: &str =
    "id, company_id, phone, contact_id, instance_id, status, last_message_at, created_at";

/// Status given to newly opened conversations
pub const ACTIVE_STATUS: &str = "active";

/// A conversation thread, unique per (company, phone)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub company_id: String,
    pub phone: String,
    pub contact_id: String,
    pub instance_id: String,
    pub status: String,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            phone: row.get(2)?,
            contact_id: row.get(3)?,
            instance_id: row.get(4)?,
            status: row.get(5)?,
            last_message_at: parse_datetime(&row.get::<_, String>(6)?),
            created_at: parse_datetime(&row.get::<_, String>(7)?),
        })
    }
}

/// Conversation repository
#[derive(Debug, Clone)]
pub struct ConversationRepo {
    pool: DbPool,
}

impl ConversationRepo {
    /// Create a new repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find a conversation by company and canonical phone
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, company_id: &str, phone: &str) -> Result<Option<Conversation>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let conversation = conn
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE company_id = ?1 AND phone = ?2"
                ),
                [company_id, phone],
                Conversation::from_row,
            )
            .optional()?;

        Ok(conversation)
    }

    /// Find the conversation for (company, phone) or open a new one
    ///
    /// On find, `last_message_at` only moves forward so an out-of-order
    /// delivery never rewinds the thread.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_or_create(&self, upsert: &ConversationUpsert<'_>) -> Result<Upserted> {
        let mut conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let at = format_datetime(&upsert.last_message_at);

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM conversations WHERE company_id = ?1 AND phone = ?2",
                [upsert.company_id, upsert.phone],
                |row| row.get(0),
            )
            .optional()?;

        let result = if let Some(id) = existing {
            tx.execute(
                "UPDATE conversations SET last_message_at = MAX(last_message_at, ?2) WHERE id = ?1",
                [&id, &at],
            )?;
            Upserted { id, created: false }
        } else {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO conversations
                    (id, company_id, phone, contact_id, instance_id, status, last_message_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id,
                    upsert.company_id,
                    upsert.phone,
                    upsert.contact_id,
                    upsert.instance_id,
                    ACTIVE_STATUS,
                    at,
                    format_datetime(&Utc::now()),
                ],
            )?;
            Upserted { id, created: true }
        };

        tx.commit()?;
        Ok(result)
    }
}
