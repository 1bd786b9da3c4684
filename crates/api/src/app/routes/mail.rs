use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use funil_contacts::{OrganizationId, PersonId};
use funil_core::{EntityKind, RecordId};
use funil_integrations::DraftRequest;
use funil_outreach::{OutboundEmail, SentEmail};
use funil_timeline::{HistoryEntry, HistoryKind};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/draft", post(draft))
        .route("/send", post(send))
}

/// Generate an email draft for a contact through the AI gateway.
async fn draft(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::DraftMailRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "mail.draft") {
        return errors::forbidden(e);
    }
    let Some(ai) = &services.ai else {
        return errors::integration_not_configured();
    };

    let person_id = PersonId::new(RecordId::from_uuid(body.person_id));
    let person = match services.contacts.person(tenant.tenant_id(), person_id).await {
        Ok(person) => person,
        Err(e) => return errors::store_error_to_response(e),
    };

    let company = match person.organization_id {
        Some(org_id) => services
            .contacts
            .organization(tenant.tenant_id(), org_id)
            .await
            .ok()
            .map(|org| org.name),
        None => None,
    };

    let request = DraftRequest {
        recipient_name: person.name.clone(),
        company,
        objective: body.objective,
        tone: body.tone,
    };
    let generated = match ai.draft(&request).await {
        Ok(generated) => generated,
        Err(e) => return errors::upstream_error_to_response(e),
    };

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        EntityKind::Person,
        person.id.record(),
        HistoryKind::EmailDrafted,
        "Rascunho de e-mail gerado",
        serde_json::json!({ "subject": generated.subject }),
        principal.user_id(),
        Utc::now(),
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "subject": generated.subject,
            "body": generated.body,
        })),
    )
        .into_response()
}

/// Send one transactional email and record it on the linked records.
async fn send(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::SendMailRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "mail.send") {
        return errors::forbidden(e);
    }
    let Some(mailer) = &services.mailer else {
        return errors::integration_not_configured();
    };

    let person_id = body.person_id.map(|id| PersonId::new(RecordId::from_uuid(id)));
    let organization_id = body
        .organization_id
        .map(|id| OrganizationId::new(RecordId::from_uuid(id)));

    let person = match person_id {
        Some(id) => match services.contacts.person(tenant.tenant_id(), id).await {
            Ok(person) => Some(person),
            Err(e) => return errors::store_error_to_response(e),
        },
        None => None,
    };

    let to = match body.to.or_else(|| person.as_ref().and_then(|p| p.email.clone())) {
        Some(to) => to,
        None => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "missing_recipient",
                "Informe o destinatário ou um contato com e-mail.",
            )
        }
    };

    let email = OutboundEmail {
        to: to.clone(),
        subject: body.subject.clone(),
        body: body.body,
    };
    if let Err(e) = mailer.send(&email).await {
        return errors::json_error(
            StatusCode::BAD_GATEWAY,
            "send_failed",
            format!("Falha ao enviar e-mail: {e}"),
        );
    }

    let now = Utc::now();
    let record = SentEmail::new(
        tenant.tenant_id(),
        organization_id,
        person_id,
        None,
        to,
        body.subject.clone(),
        now,
    );
    if let Err(e) = services.outreach.record_sent_email(record).await {
        return errors::store_error_to_response(e);
    }

    for (kind, parent) in [
        (
            EntityKind::Person,
            person_id.map(|id| id.record()),
        ),
        (
            EntityKind::Organization,
            organization_id.map(|id| id.record()),
        ),
    ] {
        let Some(parent) = parent else { continue };
        let entry = HistoryEntry::new(
            tenant.tenant_id(),
            kind,
            parent,
            HistoryKind::EmailSent,
            format!("E-mail enviado: {}", body.subject),
            serde_json::json!({}),
            principal.user_id(),
            now,
        );
        if let Err(e) = services.timeline.append_history(entry).await {
            tracing::warn!(error = %e, "history append failed");
        }
    }

    (StatusCode::OK, Json(serde_json::json!({ "sent": true }))).into_response()
}
