//! Message repository

use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use uuid::Uuid;

use super::{DbPool, format_datetime, parse_datetime};
use crate::gateway::{MessageInsert, NewMessage, StoredMessage};
use crate::ingest::Direction;
use crate::{Error, Result};

const MESSAGE_COLUMNS: &str = "id, provider_message_id, conversation_id, company_id, instance_id, \
     content, message_type, direction, sender_name, sender_phone, media_url, timestamp, status";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let direction: String = row.get(7)?;
    let direction = Direction::parse(&direction).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown direction {direction:?}").into(),
        )
    })?;

    Ok(StoredMessage {
        id: row.get(0)?,
        provider_message_id: row.get(1)?,
        conversation_id: row.get(2)?,
        company_id: row.get(3)?,
        instance_id: row.get(4)?,
        content: row.get(5)?,
        message_type: row.get(6)?,
        direction,
        sender_name: row.get(8)?,
        sender_phone: row.get(9)?,
        media_url: row.get(10)?,
        timestamp: parse_datetime(&row.get::<_, String>(11)?),
        status: row.get(12)?,
    })
}

/// Message repository
#[derive(Debug, Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    /// Create a new repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find a message by provider message id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_provider_id(&self, provider_id: &str) -> Result<Option<StoredMessage>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let message = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE provider_message_id = ?1"),
                [provider_id],
                message_from_row,
            )
            .optional()?;

        Ok(message)
    }

    /// Insert a message unless its provider id is already recorded
    ///
    /// The unique provider id makes this the last line of defence against
    /// concurrent redeliveries: the losing insert is a no-op and reports the
    /// winner's row.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, message: &NewMessage) -> Result<MessageInsert> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let id = Uuid::new_v4().to_string();

        let inserted = conn.execute(
            "INSERT INTO messages (id, provider_message_id, conversation_id, company_id, instance_id,
                content, message_type, direction, sender_name, sender_phone, media_url, timestamp,
                status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(provider_message_id) DO NOTHING",
            rusqlite::params![
                id,
                message.provider_message_id,
                message.conversation_id,
                message.company_id,
                message.instance_id,
                message.content,
                message.message_type,
                message.direction.as_str(),
                message.sender_name,
                message.sender_phone,
                message.media_url,
                format_datetime(&message.timestamp),
                message.status,
                format_datetime(&Utc::now()),
            ],
        )?;

        if inserted == 1 {
            return Ok(MessageInsert::Created(id));
        }

        let existing: String = conn.query_row(
            "SELECT id FROM messages WHERE provider_message_id = ?1",
            [&message.provider_message_id],
            |row| row.get(0),
        )?;

        Ok(MessageInsert::Existing(existing))
    }

    /// Total number of recorded messages
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let count = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::init_memory;

    fn new_message(provider_id: &str) -> NewMessage {
        NewMessage {
            provider_message_id: provider_id.to_string(),
            conversation_id: "conv-1".to_string(),
            company_id: "c1".to_string(),
            instance_id: "i1".to_string(),
            content: "[image]".to_string(),
            message_type: "image".to_string(),
            direction: Direction::Outbound,
            sender_name: Some("Acme".to_string()),
            sender_phone: "5511900000000".to_string(),
            media_url: Some("/media/c1/MSG1.jpg".to_string()),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            status: "sent".to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let repo = MessageRepo::new(init_memory().unwrap());
        let inserted = repo.insert(&new_message("MSG1")).unwrap();
        assert!(matches!(inserted, MessageInsert::Created(_)));

        let stored = repo.find_by_provider_id("MSG1").unwrap().unwrap();
        assert_eq!(stored.id, inserted.id());
        assert_eq!(stored.direction, Direction::Outbound);
        assert_eq!(stored.media_url.as_deref(), Some("/media/c1/MSG1.jpg"));
        assert_eq!(stored.timestamp, new_message("MSG1").timestamp);
        assert_eq!(stored.sender_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_second_insert_reports_existing() {
        let repo = MessageRepo::new(init_memory().unwrap());
        let first = repo.insert(&new_message("MSG1")).unwrap();
        let second = repo.insert(&new_message("MSG1")).unwrap();

        assert_eq!(second, MessageInsert::Existing(first.id().to_string()));
        assert_eq!(repo.count().unwrap(), 1);
    }
}
