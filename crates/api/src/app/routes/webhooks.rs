//! Inbound webhook receivers.
//!
//! These routes sit outside the bearer-token middleware: the relay
//! authenticates with a signed payload (`svix-id`/`svix-timestamp`/
//! `svix-signature`) instead. Verification happens before the body is
//! parsed or trusted in any way.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use funil_core::{EntityKind, RecordId, TenantId};
use funil_inbox::{Message, MessageDirection, MessageId, MessageStatus};
use funil_integrations::WebhookError;
use funil_timeline::{HistoryEntry, HistoryKind};

use crate::app::{errors, AppServices};

pub fn router() -> Router {
    Router::new().route("/whatsapp", post(whatsapp))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RelayEvent {
    #[serde(rename = "message.received")]
    MessageReceived {
        tenant_id: Uuid,
        from: String,
        body: String,
        message_id: String,
        occurred_at: Option<DateTime<Utc>>,
    },
    #[serde(rename = "message.status")]
    MessageStatus {
        tenant_id: Uuid,
        message_id: String,
        status: MessageStatus,
    },
}

fn webhook_error_to_response(err: WebhookError) -> axum::response::Response {
    match err {
        WebhookError::PayloadTooLarge => errors::json_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "payload exceeds the size limit",
        ),
        other => {
            tracing::warn!(error = %other, "webhook rejected");
            errors::json_error(StatusCode::UNAUTHORIZED, "invalid_signature", "unauthorized")
        }
    }
}

async fn whatsapp(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(verifier) = &services.webhook_verifier else {
        return errors::json_error(
            StatusCode::UNAUTHORIZED,
            "webhook_not_configured",
            "unauthorized",
        );
    };

    let header = |name: &str| -> Option<&str> { headers.get(name).and_then(|v| v.to_str().ok()) };
    let (Some(id), Some(timestamp), Some(signatures)) = (
        header("svix-id"),
        header("svix-timestamp"),
        header("svix-signature"),
    ) else {
        return errors::json_error(
            StatusCode::UNAUTHORIZED,
            "missing_signature_headers",
            "unauthorized",
        );
    };

    if let Err(e) = verifier.verify(id, timestamp, signatures, &body, Utc::now()) {
        return webhook_error_to_response(e);
    }

    let event: RelayEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_payload",
                format!("invalid json body: {e}"),
            )
        }
    };

    match event {
        RelayEvent::MessageReceived {
            tenant_id,
            from,
            body: text,
            message_id,
            occurred_at,
        } => {
            let tenant = TenantId::from_uuid(tenant_id);
            let now = occurred_at.unwrap_or_else(Utc::now);

            let person = match services.contacts.person_by_whatsapp(tenant, &from).await {
                Ok(person) => person,
                Err(e) => return errors::store_error_to_response(e),
            };
            let person_id = person.as_ref().map(|p| p.id);

            let conversation = match services
                .inbox
                .conversation_for_phone(tenant, &from, person_id, now)
                .await
            {
                Ok(conversation) => conversation,
                Err(e) => return errors::store_error_to_response(e),
            };

            let message = match Message::new(
                MessageId::new(RecordId::new()),
                tenant,
                conversation.id,
                MessageDirection::Inbound,
                text,
                Some(message_id),
                now,
            ) {
                Ok(message) => message,
                Err(e) => return errors::domain_error_to_response(e),
            };
            if let Err(e) = services.inbox.record_message(message.clone()).await {
                return errors::store_error_to_response(e);
            }

            if let Some(person) = person {
                let entry = HistoryEntry::new(
                    tenant,
                    EntityKind::Person,
                    person.id.record(),
                    HistoryKind::MessageReceived,
                    "Mensagem recebida pelo WhatsApp",
                    serde_json::json!({ "conversation_id": conversation.id }),
                    // Inbound events have no acting user; attribute to the
                    // contact owner.
                    person.owner_id,
                    now,
                );
                if let Err(e) = services.timeline.append_history(entry).await {
                    tracing::warn!(error = %e, "history append failed");
                }
            } else {
                tracing::debug!(phone = %from, "inbound message from unknown number");
            }

            (
                StatusCode::OK,
                Json(serde_json::json!({ "message_id": message.id.to_string() })),
            )
                .into_response()
        }
        RelayEvent::MessageStatus {
            tenant_id,
            message_id,
            status,
        } => {
            let tenant = TenantId::from_uuid(tenant_id);
            match services
                .inbox
                .update_message_status(tenant, &message_id, status)
                .await
            {
                Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "updated": true })))
                    .into_response(),
                Err(e) => errors::store_error_to_response(e),
            }
        }
    }
}
