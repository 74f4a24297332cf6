//! WhatsApp provider webhook endpoint
//!
//! Every POST is answered with 200 and a JSON body describing the outcome,
//! including failures: the provider retries on non-2xx, and a retry cannot
//! fix an unknown instance or a malformed payload. Redeliveries that do get
//! through are absorbed by the duplicate check.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::ApiState;
use crate::ingest::{FilterReason, IngestError, IngestOutcome, IngestStage};

const ALLOWED_METHODS: &str = "POST, OPTIONS";

/// Webhook response body
#[derive(Debug, Default, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FilterReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IngestStage>,
}

impl WebhookResponse {
    fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

impl From<&IngestOutcome> for WebhookResponse {
    fn from(outcome: &IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Stored(ids) => Self {
                success: true,
                message_id: Some(ids.message_id.clone()),
                contact_id: Some(ids.contact_id.clone()),
                conversation_id: Some(ids.conversation_id.clone()),
                ..Self::default()
            },
            IngestOutcome::Duplicate(ids) => Self {
                success: true,
                message_id: Some(ids.message_id.clone()),
                contact_id: Some(ids.contact_id.clone()),
                conversation_id: Some(ids.conversation_id.clone()),
                duplicate: Some(true),
                ..Self::default()
            },
            IngestOutcome::Filtered(reason) => Self {
                success: true,
                filtered: Some(true),
                reason: Some(*reason),
                ..Self::default()
            },
            IngestOutcome::Failed { stage, error } => Self {
                success: false,
                error: Some(error.to_string()),
                code: Some(error.code()),
                stage: Some(*stage),
                ..Self::default()
            },
        }
    }
}

/// Handle a provider delivery
pub async fn handle_webhook(
    State(state): State<Arc<ApiState>>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method == Method::OPTIONS {
        return (
            StatusCode::OK,
            [
                (header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS)),
                (
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static(ALLOWED_METHODS),
                ),
            ],
        )
            .into_response();
    }

    if method != Method::POST {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS))],
            Json(WebhookResponse::rejected(format!("method {method} not allowed"))),
        )
            .into_response();
    }

    // Oversized or unreadable bodies still answer 200
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "webhook body could not be read");
            let outcome = IngestOutcome::Failed {
                stage: IngestStage::Received,
                error: IngestError::UnrecognizedPayload(format!("unreadable body: {rejection}")),
            };
            return (StatusCode::OK, Json(WebhookResponse::from(&outcome))).into_response();
        }
    };

    tracing::debug!(bytes = body.len(), "webhook delivery received");

    let outcome = state.pipeline.ingest_bytes(&body, &headers).await;

    (StatusCode::OK, Json(WebhookResponse::from(&outcome))).into_response()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ingest::IngestedIds;

    fn ids() -> IngestedIds {
        IngestedIds {
            message_id: "m1".to_string(),
            contact_id: "ct1".to_string(),
            conversation_id: "cv1".to_string(),
        }
    }

    #[test]
    fn stored_body() {
        let body = serde_json::to_value(WebhookResponse::from(&IngestOutcome::Stored(ids()))).unwrap();
        assert_eq!(
            body,
            json!({
                "success": true,
                "message_id": "m1",
                "contact_id": "ct1",
                "conversation_id": "cv1"
            })
        );
    }

    #[test]
    fn duplicate_body() {
        let body =
            serde_json::to_value(WebhookResponse::from(&IngestOutcome::Duplicate(ids()))).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["duplicate"], true);
        assert_eq!(body["message_id"], "m1");
    }

    #[test]
    fn filtered_body() {
        let outcome = IngestOutcome::Filtered(FilterReason::GroupMessage);
        let body = serde_json::to_value(WebhookResponse::from(&outcome)).unwrap();
        assert_eq!(
            body,
            json!({ "success": true, "filtered": true, "reason": "group_message" })
        );
    }

    #[test]
    fn failed_body() {
        let outcome = IngestOutcome::Failed {
            stage: IngestStage::IdentityResolved,
            error: IngestError::InstanceNotFound("ghost".to_string()),
        };
        let body = serde_json::to_value(WebhookResponse::from(&outcome)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "instance not found: ghost");
        assert_eq!(body["code"], "instance_not_found");
        assert_eq!(body["stage"], "identity_resolved");
        assert!(body.get("message_id").is_none());
    }
}
