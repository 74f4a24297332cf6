//! WhatsApp webhook ingestion
//!
//! Turns one provider delivery into CRM records: unwrap the envelope, drop
//! noise, resolve direction and the remote party's phone, classify media,
//! find or create the contact and conversation, then record the message
//! exactly once per provider message id.

pub mod dedup;
pub mod direction;
pub mod envelope;
pub mod filter;
pub mod identity;
pub mod media;
pub mod outcome;
pub mod phone;
pub mod pipeline;

pub use direction::Direction;
pub use envelope::{EnvelopeShape, InboundEvent, WebhookMessage};
pub use filter::{FilterDecision, FilterReason, NoiseFilter};
pub use outcome::{IngestError, IngestOutcome, IngestStage, IngestedIds};
pub use pipeline::{Pipeline, PipelineSettings};
