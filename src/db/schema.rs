//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Tenants
        CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Connected WhatsApp lines, addressed by the provider's instance name
        CREATE TABLE IF NOT EXISTS instances (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL REFERENCES companies(id),
            name TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'connected',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_instances_company ON instances(company_id);

        CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            phone TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            avatar_url TEXT,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(company_id, phone)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            phone TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            instance_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            last_message_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(company_id, phone)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_contact ON conversations(contact_id);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            provider_message_id TEXT NOT NULL UNIQUE,
            conversation_id TEXT NOT NULL,
            company_id TEXT NOT NULL,
            instance_id TEXT NOT NULL,
            content TEXT NOT NULL,
            message_type TEXT NOT NULL,
            direction TEXT NOT NULL CHECK(direction IN ('inbound', 'outbound')),
            sender_name TEXT,
            sender_phone TEXT NOT NULL,
            media_url TEXT,
            timestamp TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, timestamp);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}
