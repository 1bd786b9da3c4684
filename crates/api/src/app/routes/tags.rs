use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use funil_core::RecordId;
use funil_timeline::{Tag, TagId};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/:id", axum::routing::delete(delete_one))
        .route("/assign", post(assign))
        .route("/unassign", post(unassign))
        .route("/of/:kind/:parent_id", get(tags_of))
}

async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateTagRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "tags.manage") {
        return errors::forbidden(e);
    }

    let tag = match Tag::new(
        TagId::new(RecordId::new()),
        tenant.tenant_id(),
        body.name,
        body.color,
        Utc::now(),
    ) {
        Ok(tag) => tag,
        Err(e) => return errors::domain_error_to_response(e),
    };

    if let Err(e) = services.tags.insert_tag(tag.clone()).await {
        return errors::store_error_to_response(e);
    }
    (StatusCode::CREATED, Json(dto::tag_to_json(&tag))).into_response()
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "tags.read") {
        return errors::forbidden(e);
    }

    match services.tags.tags(tenant.tenant_id()).await {
        Ok(tags) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": tags.iter().map(dto::tag_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "tags.manage") {
        return errors::forbidden(e);
    }
    let id = match id.parse::<RecordId>() {
        Ok(id) => TagId::new(id),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid tag id")
        }
    };

    match services.tags.delete_tag(tenant.tenant_id(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn assign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::TagLinkRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "tags.manage") {
        return errors::forbidden(e);
    }

    match services
        .tags
        .assign_tag(
            tenant.tenant_id(),
            TagId::new(RecordId::from_uuid(body.tag_id)),
            body.parent_kind,
            RecordId::from_uuid(body.parent_id),
        )
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn unassign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::TagLinkRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "tags.manage") {
        return errors::forbidden(e);
    }

    match services
        .tags
        .unassign_tag(
            tenant.tenant_id(),
            TagId::new(RecordId::from_uuid(body.tag_id)),
            body.parent_kind,
            RecordId::from_uuid(body.parent_id),
        )
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn tags_of(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((kind, parent_id)): Path<(String, String)>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "tags.read") {
        return errors::forbidden(e);
    }
    let Ok(kind) = kind.parse::<funil_core::EntityKind>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_kind", "unknown entity kind");
    };
    let Ok(parent) = parent_id.parse::<RecordId>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid record id");
    };

    match services.tags.tags_of(tenant.tenant_id(), kind, parent).await {
        Ok(tags) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": tags.iter().map(dto::tag_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
