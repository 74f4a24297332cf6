//! Ingestion orchestrator
//!
//! Runs one webhook delivery through every stage and always ends in one of
//! the terminal [`IngestOutcome`]s. Nothing escapes: classified failures,
//! gateway errors and panics all become [`IngestOutcome::Failed`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt;
use serde_json::Value;

use super::dedup::{self, DuplicateCheck};
use super::direction::Direction;
use super::envelope::{InboundEvent, first_non_empty};
use super::filter::{FilterDecision, NoiseFilter};
use super::identity::{IdentityRequest, IdentityResolver};
use super::media;
use super::outcome::{IngestError, IngestOutcome, IngestStage, IngestedIds};
use super::phone;
use crate::config::IngestSettings;
use crate::gateway::{InstanceDirectory, MediaStore, MessageInsert, NewMessage, PersistenceGateway};

/// Timestamps at or above this are milliseconds, below it seconds
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

type StageResult<T> = std::result::Result<T, (IngestStage, IngestError)>;

/// Pipeline behaviour, injected at construction
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Source tag written on newly created contacts
    pub source_tag: String,
    /// Reject every `fromMe` event as self-sent
    pub ignore_self_sent: bool,
    /// Fail the delivery when media cannot be stored
    pub strict_media: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let ingest = IngestSettings::default();
        Self {
            source_tag: ingest.source_tag,
            ignore_self_sent: ingest.ignore_self_sent,
            strict_media: false,
        }
    }
}

/// Webhook ingestion pipeline
#[derive(Clone)]
pub struct Pipeline {
    directory: Arc<dyn InstanceDirectory>,
    gateway: Arc<dyn PersistenceGateway>,
    media_store: Option<Arc<dyn MediaStore>>,
    settings: PipelineSettings,
}

impl Pipeline {
    /// Create a pipeline without a media store
    #[must_use]
    pub fn new(
        directory: Arc<dyn InstanceDirectory>,
        gateway: Arc<dyn PersistenceGateway>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            directory,
            gateway,
            media_store: None,
            settings,
        }
    }

    /// Attach the store used for media attachments
    #[must_use]
    pub fn with_media_store(mut self, store: Arc<dyn MediaStore>) -> Self {
        self.media_store = Some(store);
        self
    }

    /// Ingest a raw request body
    ///
    /// Bodies that are not JSON fail as unrecognized.
    pub async fn ingest_bytes(&self, body: &[u8], headers: &HeaderMap) -> IngestOutcome {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => self.ingest(value, headers).await,
            Err(e) => {
                let outcome = IngestOutcome::failed(
                    IngestStage::Received,
                    IngestError::UnrecognizedPayload(format!("invalid JSON: {e}")),
                );
                log_outcome(&outcome);
                outcome
            }
        }
    }

    /// Ingest a decoded request body
    pub async fn ingest(&self, body: Value, headers: &HeaderMap) -> IngestOutcome {
        let run = AssertUnwindSafe(self.run(body, headers)).catch_unwind().await;

        let outcome = match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err((stage, error))) => IngestOutcome::failed(stage, error),
            Err(_) => IngestOutcome::failed(
                IngestStage::Received,
                IngestError::Persistence("ingestion panicked".to_string()),
            ),
        };

        log_outcome(&outcome);
        outcome
    }

    #[allow(clippy::too_many_lines)]
    async fn run(&self, body: Value, headers: &HeaderMap) -> StageResult<IngestOutcome> {
        // Received -> Unwrapped
        let event =
            InboundEvent::decode(body, headers).map_err(|e| (IngestStage::Unwrapped, e))?;
        let message = &event.message;

        tracing::debug!(
            instance = %event.instance_name,
            provider_id = ?message.provider_id(),
            shape = event.shape.as_str(),
            "webhook event unwrapped"
        );
        tracing::trace!(raw = %event.raw, "unwrapped event");

        // Filtered: noise is dropped before anything else is demanded of it
        let filter = NoiseFilter::new(self.settings.ignore_self_sent);
        if let FilterDecision::Reject(reason) =
            filter.check(message, event.chat.wa_chatid.as_deref())
        {
            tracing::debug!(
                instance = %event.instance_name,
                provider_id = ?message.provider_id(),
                reason = %reason,
                "event filtered"
            );
            return Ok(IngestOutcome::Filtered(reason));
        }

        let provider_id = message
            .provider_id()
            .map(ToString::to_string)
            .ok_or((IngestStage::Filtered, IngestError::MissingMessageId))?;

        // DirectionResolved
        let direction =
            Direction::resolve(message.from_me, message.was_sent_by_api, message.device_sent);

        // PhoneResolved: the business's own number must never become the contact
        let candidates = match direction {
            Direction::Outbound => vec![message.chatid.as_deref(), event.chat.wa_chatid.as_deref()],
            Direction::Inbound => vec![
                message.sender.as_deref(),
                message.chatid.as_deref(),
                event.chat.wa_chatid.as_deref(),
            ],
        };
        let phone = phone::canonicalize_preferred(&candidates);
        if phone.is_empty() {
            let raw = first_non_empty(&candidates).unwrap_or_default().to_string();
            return Err((IngestStage::PhoneResolved, IngestError::InvalidPhoneNumber(raw)));
        }

        // MediaResolved: classification only; the binary is fetched once the
        // delivery is known to be new
        let classified = media::classify(message);

        // IdentityResolved
        let instance = self
            .directory
            .resolve_instance(&event.instance_name)
            .await
            .map_err(|e| (IngestStage::IdentityResolved, IngestError::from(e)))?
            .ok_or_else(|| {
                (
                    IngestStage::IdentityResolved,
                    IngestError::InstanceNotFound(event.instance_name.clone()),
                )
            })?;

        let at = event_time(message.message_timestamp);
        let name = contact_name(&event, direction);
        let resolver = IdentityResolver::new(self.gateway.as_ref(), &self.settings.source_tag);
        let identity = resolver
            .resolve(&IdentityRequest {
                company_id: &instance.company_id,
                instance_id: &instance.instance_id,
                phone: &phone,
                name,
                avatar_url: event.chat.avatar_url(),
                at,
            })
            .await
            .map_err(|e| (IngestStage::IdentityResolved, IngestError::from(e)))?;

        // DuplicateChecked
        let check = dedup::check(self.gateway.as_ref(), &provider_id)
            .await
            .map_err(|e| (IngestStage::DuplicateChecked, IngestError::from(e)))?;
        if let DuplicateCheck::Duplicate(existing) = check {
            return Ok(IngestOutcome::Duplicate(IngestedIds {
                message_id: existing.id,
                contact_id: identity.contact_id,
                conversation_id: identity.conversation_id,
            }));
        }

        let content = media::resolve(
            classified,
            self.media_store.as_deref(),
            &instance.company_id,
            &provider_id,
            self.settings.strict_media,
        )
        .await
        .map_err(|e| (IngestStage::MediaResolved, e))?;

        // Persisted
        let sender_phone = match direction {
            Direction::Inbound => phone.clone(),
            Direction::Outbound => phone::canonicalize_preferred(&[
                message.sender.as_deref(),
                event.owner.as_deref(),
            ]),
        };

        let new_message = NewMessage {
            provider_message_id: provider_id,
            conversation_id: identity.conversation_id.clone(),
            company_id: instance.company_id.clone(),
            instance_id: instance.instance_id.clone(),
            content: content.content,
            message_type: content.message_type,
            direction,
            sender_name: message
                .sender_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string),
            sender_phone,
            media_url: content.media_url,
            timestamp: at,
            status: direction.initial_status().to_string(),
        };

        let inserted = self
            .gateway
            .insert_message(&new_message)
            .await
            .map_err(|e| (IngestStage::Persisted, IngestError::from(e)))?;

        let ids = IngestedIds {
            message_id: inserted.id().to_string(),
            contact_id: identity.contact_id,
            conversation_id: identity.conversation_id,
        };

        Ok(match inserted {
            MessageInsert::Created(_) => IngestOutcome::Stored(ids),
            // A concurrent retry won the insert
            MessageInsert::Existing(_) => IngestOutcome::Duplicate(ids),
        })
    }
}

/// Name to record on the contact
///
/// Outbound events carry the business's own `senderName`, so only the chat's
/// name is trusted for them.
fn contact_name(event: &InboundEvent, direction: Direction) -> &str {
    let chat_name = event.chat.display_name();
    let name = match direction {
        Direction::Inbound => first_non_empty(&[event.message.sender_name.as_deref(), chat_name]),
        Direction::Outbound => chat_name,
    };
    name.unwrap_or_default()
}

/// Convert a provider timestamp (seconds or milliseconds) into UTC
///
/// Missing or out-of-range values read as now.
#[must_use]
pub fn event_time(timestamp: Option<i64>) -> DateTime<Utc> {
    let parsed = match timestamp {
        Some(ts) if ts >= MILLIS_THRESHOLD => Utc.timestamp_millis_opt(ts).single(),
        Some(ts) if ts > 0 => Utc.timestamp_opt(ts, 0).single(),
        _ => None,
    };
    parsed.unwrap_or_else(Utc::now)
}

fn log_outcome(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Stored(ids) => tracing::info!(
            message_id = %ids.message_id,
            conversation_id = %ids.conversation_id,
            "message ingested"
        ),
        IngestOutcome::Duplicate(ids) => tracing::debug!(
            message_id = %ids.message_id,
            "duplicate delivery, nothing recorded"
        ),
        IngestOutcome::Filtered(_) => {}
        IngestOutcome::Failed { stage, error } => {
            if error.is_validation() {
                tracing::info!(stage = %stage, error = %error, "event rejected");
            } else if matches!(error, IngestError::Persistence(_)) {
                tracing::error!(stage = %stage, error = %error, "ingestion failed");
            } else {
                tracing::warn!(stage = %stage, error = %error, "ingestion failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::db::{self, CompanyRepo, DbPool, MessageRepo, SqliteGateway};
    use crate::ingest::FilterReason;
    use crate::{Error, Result};

    struct FakeStore {
        fail: bool,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl MediaStore for FakeStore {
        async fn persist_media(
            &self,
            company_id: &str,
            message_id: &str,
            _source_url: &str,
        ) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(Error::Media("unreachable".to_string()));
            }
            Ok(format!("https://files.example.com/{company_id}/{message_id}"))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    struct Harness {
        pool: DbPool,
        pipeline: Pipeline,
        store: Arc<FakeStore>,
    }

    fn harness_with(settings: PipelineSettings, store_fails: bool) -> Harness {
        let pool = db::init_memory().unwrap();
        let companies = CompanyRepo::new(pool.clone());
        let company = companies.create_company("Acme").unwrap();
        companies.create_instance(&company.id, "inst-1").unwrap();

        let gateway = Arc::new(SqliteGateway::new(pool.clone()));
        let store = Arc::new(FakeStore {
            fail: store_fails,
            calls: Mutex::new(0),
        });
        let pipeline = Pipeline::new(gateway.clone(), gateway, settings)
            .with_media_store(store.clone());

        Harness {
            pool,
            pipeline,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(PipelineSettings::default(), false)
    }

    fn inbound_text(id: &str) -> Value {
        json!({
            "message": {
                "sender": "5511988887777@s.whatsapp.net",
                "fromMe": false,
                "messageType": "conversation",
                "text": "Olá",
                "id": id
            },
            "instanceName": "inst-1"
        })
    }

    #[tokio::test]
    async fn first_delivery_creates_everything() {
        let h = harness();
        let outcome = h.pipeline.ingest(inbound_text("MSG1"), &HeaderMap::new()).await;

        let IngestOutcome::Stored(ids) = outcome else {
            panic!("expected stored, got {outcome:?}");
        };

        let stored = MessageRepo::new(h.pool.clone())
            .find_by_provider_id("MSG1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, ids.message_id);
        assert_eq!(stored.direction, Direction::Inbound);
        assert_eq!(stored.content, "Olá");
        assert_eq!(stored.message_type, "text");
        assert_eq!(stored.sender_phone, "5511988887777");
        assert_eq!(stored.status, "received");
        assert_eq!(stored.conversation_id, ids.conversation_id);
    }

    #[tokio::test]
    async fn redelivery_is_duplicate() {
        let h = harness();
        let first = h.pipeline.ingest(inbound_text("MSG1"), &HeaderMap::new()).await;
        let second = h.pipeline.ingest(inbound_text("MSG1"), &HeaderMap::new()).await;

        let first_ids = first.ids().unwrap().clone();
        assert!(matches!(second, IngestOutcome::Duplicate(ref ids) if *ids == first_ids));
        assert_eq!(MessageRepo::new(h.pool).count().unwrap(), 1);
    }

    #[tokio::test]
    async fn group_rejected_before_anything_else() {
        let h = harness();
        let mut body = inbound_text("MSG1");
        body["message"]["isGroup"] = json!(true);
        body["instanceName"] = json!("unknown-instance");

        let outcome = h.pipeline.ingest(body, &HeaderMap::new()).await;
        assert_eq!(outcome, IngestOutcome::Filtered(FilterReason::GroupMessage));
    }

    #[tokio::test]
    async fn lid_sender_is_filtered() {
        let h = harness();
        let mut body = inbound_text("MSG1");
        body["message"]["sender"] = json!("abc@lid");

        let outcome = h.pipeline.ingest(body, &HeaderMap::new()).await;
        assert_eq!(outcome, IngestOutcome::Filtered(FilterReason::AnonymousLinkIdentifier));
    }

    #[tokio::test]
    async fn short_phone_is_invalid() {
        let h = harness();
        let mut body = inbound_text("MSG1");
        body["message"]["sender"] = json!("123456789@s.whatsapp.net");

        let outcome = h.pipeline.ingest(body, &HeaderMap::new()).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Failed {
                stage: IngestStage::PhoneResolved,
                error: IngestError::InvalidPhoneNumber(_)
            }
        ));
    }

    #[tokio::test]
    async fn unknown_instance_fails() {
        let h = harness();
        let mut body = inbound_text("MSG1");
        body["instanceName"] = json!("nope");

        let outcome = h.pipeline.ingest(body, &HeaderMap::new()).await;
        assert_eq!(
            outcome,
            IngestOutcome::failed(
                IngestStage::IdentityResolved,
                IngestError::InstanceNotFound("nope".to_string())
            )
        );
    }

    #[tokio::test]
    async fn missing_id_fails() {
        let h = harness();
        let mut body = inbound_text("MSG1");
        body["message"].as_object_mut().unwrap().remove("id");

        let outcome = h.pipeline.ingest(body, &HeaderMap::new()).await;
        assert_eq!(
            outcome,
            IngestOutcome::failed(IngestStage::Filtered, IngestError::MissingMessageId)
        );
    }

    #[tokio::test]
    async fn noise_without_id_is_filtered() {
        let h = harness();

        let mut group = inbound_text("MSG1");
        group["message"]["isGroup"] = json!(true);
        group["message"].as_object_mut().unwrap().remove("id");
        let outcome = h.pipeline.ingest(group, &HeaderMap::new()).await;
        assert_eq!(outcome, IngestOutcome::Filtered(FilterReason::GroupMessage));

        let mut lid = inbound_text("MSG1");
        lid["message"]["sender"] = json!("abc@lid");
        lid["message"].as_object_mut().unwrap().remove("id");
        let outcome = h.pipeline.ingest(lid, &HeaderMap::new()).await;
        assert_eq!(outcome, IngestOutcome::Filtered(FilterReason::AnonymousLinkIdentifier));
    }

    #[tokio::test]
    async fn invalid_json_fails_as_unrecognized() {
        let h = harness();
        let outcome = h.pipeline.ingest_bytes(b"{not json", &HeaderMap::new()).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Failed {
                stage: IngestStage::Received,
                error: IngestError::UnrecognizedPayload(_)
            }
        ));
    }

    #[tokio::test]
    async fn outbound_uses_chat_id_and_keeps_contact_name() {
        let h = harness();
        h.pipeline.ingest(inbound_text("MSG1"), &HeaderMap::new()).await;

        let body = json!({
            "EventType": "messages",
            "instanceName": "inst-1",
            "owner": "5511900000000",
            "message": {
                "sender": "5511900000000@s.whatsapp.net",
                "chatid": "5511988887777@s.whatsapp.net",
                "senderName": "Acme Support",
                "fromMe": true,
                "deviceSent": true,
                "messageType": "conversation",
                "text": "Tudo bem?",
                "messageid": "MSG2"
            }
        });
        let outcome = h.pipeline.ingest(body, &HeaderMap::new()).await;
        let IngestOutcome::Stored(ids) = outcome else {
            panic!("expected stored, got {outcome:?}");
        };

        let first = MessageRepo::new(h.pool.clone())
            .find_by_provider_id("MSG1")
            .unwrap()
            .unwrap();
        assert_eq!(first.conversation_id, ids.conversation_id);

        let reply = MessageRepo::new(h.pool.clone())
            .find_by_provider_id("MSG2")
            .unwrap()
            .unwrap();
        assert_eq!(reply.direction, Direction::Outbound);
        assert_eq!(reply.sender_phone, "5511900000000");
        assert_eq!(reply.status, "sent");

        let contact = crate::db::ContactRepo::new(h.pool)
            .find_by_id(&ids.contact_id)
            .unwrap()
            .unwrap();
        assert_eq!(contact.phone, "5511988887777");
        assert_ne!(contact.name, "Acme Support");
    }

    #[tokio::test]
    async fn api_echo_is_filtered() {
        let h = harness();
        let body = json!({
            "instanceName": "inst-1",
            "message": {
                "chatid": "5511988887777@s.whatsapp.net",
                "fromMe": true,
                "wasSentByApi": true,
                "text": "sent from the CRM",
                "id": "MSG3"
            }
        });
        let outcome = h.pipeline.ingest(body, &HeaderMap::new()).await;
        assert_eq!(outcome, IngestOutcome::Filtered(FilterReason::ApiEchoed));
    }

    #[tokio::test]
    async fn media_is_stored_once() {
        let h = harness();
        let body = json!({
            "instanceName": "inst-1",
            "message": {
                "sender": "5511988887777@s.whatsapp.net",
                "messageType": "imageMessage",
                "media": { "url": "https://mmg.whatsapp.net/img.enc" },
                "id": "IMG1"
            }
        });

        h.pipeline.ingest(body.clone(), &HeaderMap::new()).await;
        let second = h.pipeline.ingest(body, &HeaderMap::new()).await;
        assert!(matches!(second, IngestOutcome::Duplicate(_)));
        assert_eq!(*h.store.calls.lock().unwrap(), 1);

        let stored = MessageRepo::new(h.pool)
            .find_by_provider_id("IMG1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, "[image]");
        assert_eq!(stored.message_type, "image");
        assert_eq!(
            stored.media_url.as_deref(),
            Some(format!("https://files.example.com/{}/IMG1", stored.company_id).as_str())
        );
    }

    #[tokio::test]
    async fn strict_media_failure_records_nothing() {
        let settings = PipelineSettings {
            strict_media: true,
            ..PipelineSettings::default()
        };
        let h = harness_with(settings, true);
        let body = json!({
            "instanceName": "inst-1",
            "message": {
                "sender": "5511988887777@s.whatsapp.net",
                "messageType": "imageMessage",
                "media": { "url": "https://mmg.whatsapp.net/img.enc" },
                "id": "IMG1"
            }
        });

        let outcome = h.pipeline.ingest(body, &HeaderMap::new()).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Failed {
                error: IngestError::MediaFetch(_),
                ..
            }
        ));
        assert_eq!(MessageRepo::new(h.pool).count().unwrap(), 0);
    }

    #[test]
    fn timestamps_in_seconds_and_millis() {
        let secs = event_time(Some(1_700_000_000));
        let millis = event_time(Some(1_700_000_000_000));
        assert_eq!(secs, millis);
        assert_eq!(secs.timestamp(), 1_700_000_000);

        let before = Utc::now();
        assert!(event_time(None) >= before);
        assert!(event_time(Some(-5)) >= before);
    }
}
