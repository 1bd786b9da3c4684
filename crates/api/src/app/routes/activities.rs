use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use funil_core::{EntityKind, RecordId};
use funil_timeline::{Activity, ActivityId};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/:id", get(get_one).delete(delete_one))
        .route("/:id/complete", post(complete))
        .route("/:id/reopen", post(reopen))
}

fn parse_id(raw: &str) -> Result<ActivityId, axum::response::Response> {
    raw.parse::<RecordId>().map(ActivityId::new).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid activity id")
    })
}

async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateActivityRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "activities.manage") {
        return errors::forbidden(e);
    }

    let now = Utc::now();
    let mut activity = match Activity::new(
        ActivityId::new(RecordId::new()),
        tenant.tenant_id(),
        body.parent_kind,
        RecordId::from_uuid(body.parent_id),
        body.kind,
        body.subject,
        principal.user_id(),
        now,
    ) {
        Ok(activity) => activity,
        Err(e) => return errors::domain_error_to_response(e),
    };
    activity.due_at = body.due_at;

    if let Err(e) = services.timeline.insert_activity(activity.clone()).await {
        return errors::store_error_to_response(e);
    }

    (StatusCode::CREATED, Json(dto::activity_to_json(&activity))).into_response()
}

#[derive(Debug, Deserialize)]
struct ActivityListParams {
    parent_kind: Option<EntityKind>,
    parent_id: Option<Uuid>,
    /// "me" limits the list to the caller's activities.
    owner: Option<String>,
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<ActivityListParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "activities.manage") {
        return errors::forbidden(e);
    }

    let result = match (&params.parent_kind, &params.parent_id) {
        (Some(kind), Some(parent_id)) => {
            services
                .timeline
                .activities_for(tenant.tenant_id(), *kind, RecordId::from_uuid(*parent_id))
                .await
        }
        _ if params.owner.as_deref() == Some("me") => {
            services
                .timeline
                .activities_for_owner(tenant.tenant_id(), principal.user_id())
                .await
        }
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "missing_filter",
                "pass parent_kind + parent_id, or owner=me",
            )
        }
    };

    match result {
        Ok(items) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": items.iter().map(dto::activity_to_json).collect::<Vec<_>>(),
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
    if let Err(e) = authz::require(&tenant, &principal, "activities.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.timeline.activity(tenant.tenant_id(), id).await {
        Ok(activity) => (StatusCode::OK, Json(dto::activity_to_json(&activity))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn complete(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    toggle_done(services, tenant, principal, id, true).await
}

async fn reopen(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    toggle_done(services, tenant, principal, id, false).await
}

async fn toggle_done(
    services: Arc<AppServices>,
    tenant: TenantContext,
    principal: PrincipalContext,
    id: String,
    done: bool,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "activities.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut activity = match services.timeline.activity(tenant.tenant_id(), id).await {
        Ok(activity) => activity,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    let result = if done {
        activity.complete(now)
    } else {
        activity.reopen(now)
    };
    if let Err(e) = result {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.timeline.update_activity(activity.clone()).await {
        return errors::store_error_to_response(e);
    }

    (StatusCode::OK, Json(dto::activity_to_json(&activity))).into_response()
}

async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "activities.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.timeline.delete_activity(tenant.tenant_id(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
