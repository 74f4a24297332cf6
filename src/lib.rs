//! WA Ingest - WhatsApp webhook ingestion gateway for a multi-tenant CRM
//!
//! This library provides the core functionality for the gateway:
//! - Envelope unwrapping and lenient decoding of provider webhook events
//! - Noise filtering, direction and phone resolution
//! - Contact and conversation find-or-create per company
//! - Idempotent message persistence keyed by provider message id
//! - Media download into durable storage
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            WhatsApp provider (webhooks)              │
//! └────────────────────┬────────────────────────────────┘
//!                      │ POST /webhook
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Ingestion pipeline                   │
//! │  Unwrap │ Filter │ Direction │ Phone │ Media │ Dedup │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼──────────┐       ┌──────────▼──────────┐
//! │  SQLite (tenants,   │       │  Media store        │
//! │  contacts, messages)│       │  (local files)      │
//! └─────────────────────┘       └─────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod storage;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use gateway::{InstanceDirectory, MediaStore, PersistenceGateway};
pub use ingest::{IngestOutcome, Pipeline, PipelineSettings};
pub use storage::FileMediaStore;
