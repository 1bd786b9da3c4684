use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use funil_contacts::PersonId;
use funil_core::{EntityKind, RecordId};
use funil_inbox::{ConversationId, Message, MessageDirection, MessageId};
use funil_timeline::{HistoryEntry, HistoryKind};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id", get(get_conversation))
        .route("/conversations/:id/messages", get(list_messages))
        .route("/conversations/:id/read", post(mark_read))
        .route("/conversations/:id/link", post(link_person))
        .route("/messages", post(send_message))
}

fn parse_id(raw: &str) -> Result<ConversationId, axum::response::Response> {
    raw.parse::<RecordId>().map(ConversationId::new).map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            "invalid conversation id",
        )
    })
}

async fn list_conversations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "inbox.read") {
        return errors::forbidden(e);
    }

    match services.inbox.conversations(tenant.tenant_id()).await {
        Ok(items) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": items.iter().map(dto::conversation_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn get_conversation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "inbox.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.inbox.conversation(tenant.tenant_id(), id).await {
        Ok(conversation) => (
            StatusCode::OK,
            Json(dto::conversation_to_json(&conversation)),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn list_messages(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "inbox.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.inbox.messages(tenant.tenant_id(), id).await {
        Ok(items) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": items.iter().map(dto::message_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn mark_read(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "inbox.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .inbox
        .mark_conversation_read(tenant.tenant_id(), id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn link_person(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::LinkConversationRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "inbox.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .inbox
        .link_conversation_person(
            tenant.tenant_id(),
            id,
            PersonId::new(RecordId::from_uuid(body.person_id)),
        )
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Send an outbound WhatsApp message through the relay and record it.
async fn send_message(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::SendWhatsappRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "inbox.send") {
        return errors::forbidden(e);
    }
    let Some(relay) = &services.whatsapp else {
        return errors::integration_not_configured();
    };

    let delivery = match relay.send_message(&body.phone, &body.body).await {
        Ok(delivery) => delivery,
        Err(e) => return errors::upstream_error_to_response(e),
    };

    let now = Utc::now();
    let conversation = match services
        .inbox
        .conversation_for_phone(tenant.tenant_id(), &body.phone, None, now)
        .await
    {
        Ok(conversation) => conversation,
        Err(e) => return errors::store_error_to_response(e),
    };

    let message = match Message::new(
        MessageId::new(RecordId::new()),
        tenant.tenant_id(),
        conversation.id,
        MessageDirection::Outbound,
        body.body,
        Some(delivery.message_id),
        now,
    ) {
        Ok(message) => message,
        Err(e) => return errors::domain_error_to_response(e),
    };
    if let Err(e) = services.inbox.record_message(message.clone()).await {
        return errors::store_error_to_response(e);
    }

    if let Some(person_id) = conversation.person_id {
        let entry = HistoryEntry::new(
            tenant.tenant_id(),
            EntityKind::Person,
            person_id.record(),
            HistoryKind::MessageSent,
            "Mensagem enviada pelo WhatsApp",
            serde_json::json!({ "conversation_id": conversation.id }),
            principal.user_id(),
            now,
        );
        if let Err(e) = services.timeline.append_history(entry).await {
            tracing::warn!(error = %e, "history append failed");
        }
    }

    (StatusCode::CREATED, Json(dto::message_to_json(&message))).into_response()
}
