//! Contact repository

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use super::{DbPool, format_datetime, parse_datetime};
use crate::gateway::{ContactUpsert, Upserted};
use crate::{Error, Result};

const CONTACT_COLUMNS: &str =
    "id, company_id, phone, name, avatar_url, source, created_at, updated_at";

/// A CRM contact, unique per (company, phone)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub company_id: String,
    pub phone: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            phone: row.get(2)?,
            name: row.get(3)?,
            avatar_url: row.get(4)?,
            source: row.get(5)?,
            created_at: parse_datetime(&row.get::<_, String>(6)?),
            updated_at: parse_datetime(&row.get::<_, String>(7)?),
        })
    }
}

/// Contact repository
#[derive(Debug, Clone)]
pub struct ContactRepo {
    pool: DbPool,
}

impl ContactRepo {
    /// Create a new repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find a contact by company and canonical phone
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, company_id: &str, phone: &str) -> Result<Option<Contact>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let contact = conn
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE company_id = ?1 AND phone = ?2"),
                [company_id, phone],
                Contact::from_row,
            )
            .optional()?;

        Ok(contact)
    }

    /// Find a contact by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_id(&self, id: &str) -> Result<Option<Contact>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let contact = conn
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                [id],
                Contact::from_row,
            )
            .optional()?;

        Ok(contact)
    }

    /// Find the contact for (company, phone) or create it
    ///
    /// Runs in an immediate transaction so concurrent first deliveries for
    /// the same phone serialize on the write lock. On find, only the name is
    /// touched: a non-empty name replaces the stored one. The avatar is kept
    /// from the event that created the contact.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_or_create(&self, upsert: &ContactUpsert<'_>) -> Result<Upserted> {
        let mut conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = format_datetime(&Utc::now());

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM contacts WHERE company_id = ?1 AND phone = ?2",
                [upsert.company_id, upsert.phone],
                |row| row.get(0),
            )
            .optional()?;

        let result = if let Some(id) = existing {
            tx.execute(
                "UPDATE contacts SET
                    name = CASE WHEN ?2 <> '' THEN ?2 ELSE name END,
                    updated_at = ?3
                 WHERE id = ?1",
                rusqlite::params![id, upsert.name, now],
            )?;
            Upserted { id, created: false }
        } else {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO contacts (id, company_id, phone, name, avatar_url, source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    id,
                    upsert.company_id,
                    upsert.phone,
                    upsert.name,
                    upsert.avatar_url,
                    upsert.source,
                    now
                ],
            )?;
            Upserted { id, created: true }
        };

        tx.commit()?;
        Ok(result)
    }
}
