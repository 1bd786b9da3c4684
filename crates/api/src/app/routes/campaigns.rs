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
use funil_outreach::{
    send_pending, Campaign, CampaignId, RecipientStatus, SentEmail, INTER_SEND_DELAY,
};
use funil_timeline::{HistoryEntry, HistoryKind};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/:id", get(get_one))
        .route("/:id/recipients", post(add_recipients))
        .route("/:id/send", post(send))
        .route("/:id/cancel", post(cancel))
}

fn parse_id(raw: &str) -> Result<CampaignId, axum::response::Response> {
    raw.parse::<RecordId>().map(CampaignId::new).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid campaign id")
    })
}

async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateCampaignRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "campaigns.manage") {
        return errors::forbidden(e);
    }

    let campaign = match Campaign::new(
        CampaignId::new(RecordId::new()),
        tenant.tenant_id(),
        body.name,
        body.subject,
        body.body,
        principal.user_id(),
        Utc::now(),
    ) {
        Ok(campaign) => campaign,
        Err(e) => return errors::domain_error_to_response(e),
    };

    if let Err(e) = services.outreach.insert_campaign(campaign.clone()).await {
        return errors::store_error_to_response(e);
    }
    (StatusCode::CREATED, Json(dto::campaign_to_json(&campaign))).into_response()
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "campaigns.manage") {
        return errors::forbidden(e);
    }

    match services.outreach.campaigns(tenant.tenant_id()).await {
        Ok(items) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": items.iter().map(dto::campaign_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "campaigns.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.outreach.campaign(tenant.tenant_id(), id).await {
        Ok(campaign) => (StatusCode::OK, Json(dto::campaign_to_json(&campaign))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn add_recipients(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddRecipientsRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "campaigns.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut campaign = match services.outreach.campaign(tenant.tenant_id(), id).await {
        Ok(campaign) => campaign,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    for recipient in body.recipients {
        let person_id = recipient
            .person_id
            .map(|id| PersonId::new(RecordId::from_uuid(id)));
        if let Err(e) = campaign.add_recipient(recipient.email, person_id, now) {
            return errors::domain_error_to_response(e);
        }
    }

    if let Err(e) = services.outreach.update_campaign(campaign.clone()).await {
        return errors::store_error_to_response(e);
    }
    (StatusCode::OK, Json(dto::campaign_to_json(&campaign))).into_response()
}

/// Send the campaign: a bounded sequential loop with a fixed inter-send
/// delay. Admin-only.
async fn send(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "campaigns.send") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(mailer) = services.mailer.clone() else {
        return errors::integration_not_configured();
    };

    let mut campaign = match services.outreach.campaign(tenant.tenant_id(), id).await {
        Ok(campaign) => campaign,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    if let Err(e) = campaign.start_sending(now) {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.outreach.update_campaign(campaign.clone()).await {
        return errors::store_error_to_response(e);
    }

    let outcome = send_pending(&mut campaign, mailer.as_ref(), INTER_SEND_DELAY).await;
    tracing::info!(
        campaign = %campaign.id,
        attempted = outcome.attempted,
        sent = outcome.sent,
        failed = outcome.failed,
        "campaign send finished"
    );

    if let Err(e) = services.outreach.update_campaign(campaign.clone()).await {
        return errors::store_error_to_response(e);
    }

    // One sent-email row per delivered recipient; people linked to a
    // recipient also get a history entry.
    for recipient in &campaign.recipients {
        let RecipientStatus::Sent { sent_at } = recipient.status else {
            continue;
        };
        let email = SentEmail::new(
            tenant.tenant_id(),
            None,
            recipient.person_id,
            Some(campaign.id),
            recipient.email.clone(),
            campaign.subject.clone(),
            sent_at,
        );
        if let Err(e) = services.outreach.record_sent_email(email).await {
            tracing::warn!(error = %e, "sent-email record failed");
        }
        if let Some(person_id) = recipient.person_id {
            let entry = HistoryEntry::new(
                tenant.tenant_id(),
                EntityKind::Person,
                person_id.record(),
                HistoryKind::EmailSent,
                format!("E-mail enviado: {}", campaign.subject),
                serde_json::json!({ "campaign_id": campaign.id }),
                principal.user_id(),
                sent_at,
            );
            if let Err(e) = services.timeline.append_history(entry).await {
                tracing::warn!(error = %e, "history append failed");
            }
        }
    }

    (StatusCode::OK, Json(dto::campaign_to_json(&campaign))).into_response()
}

async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "campaigns.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut campaign = match services.outreach.campaign(tenant.tenant_id(), id).await {
        Ok(campaign) => campaign,
        Err(e) => return errors::store_error_to_response(e),
    };
    if let Err(e) = campaign.cancel(Utc::now()) {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.outreach.update_campaign(campaign.clone()).await {
        return errors::store_error_to_response(e);
    }

    (StatusCode::OK, Json(dto::campaign_to_json(&campaign))).into_response()
}
