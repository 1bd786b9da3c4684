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
use funil_timeline::{HistoryEntry, HistoryKind, Note, NoteId};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/:id", get(get_one).patch(edit).delete(delete_one))
        .route("/:id/pin", post(pin))
        .route("/:id/unpin", post(unpin))
}

fn parse_id(raw: &str) -> Result<NoteId, axum::response::Response> {
    raw.parse::<RecordId>()
        .map(NoteId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid note id"))
}

async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateNoteRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "notes.manage") {
        return errors::forbidden(e);
    }

    let now = Utc::now();
    let note = match Note::new(
        NoteId::new(RecordId::new()),
        tenant.tenant_id(),
        body.parent_kind,
        RecordId::from_uuid(body.parent_id),
        body.body,
        principal.user_id(),
        now,
    ) {
        Ok(note) => note,
        Err(e) => return errors::domain_error_to_response(e),
    };

    if let Err(e) = services.timeline.insert_note(note.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        note.parent_kind,
        note.parent_id,
        HistoryKind::NoteAdded,
        "Nota adicionada",
        serde_json::json!({ "note_id": note.id }),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": note.id.to_string() })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct NoteListParams {
    parent_kind: EntityKind,
    parent_id: Uuid,
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<NoteListParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "notes.manage") {
        return errors::forbidden(e);
    }

    match services
        .timeline
        .notes_for(
            tenant.tenant_id(),
            params.parent_kind,
            RecordId::from_uuid(params.parent_id),
        )
        .await
    {
        Ok(notes) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": notes.iter().map(dto::note_view_to_json).collect::<Vec<_>>(),
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
    if let Err(e) = authz::require(&tenant, &principal, "notes.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.timeline.note(tenant.tenant_id(), id).await {
        Ok(note) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": note.id.to_string(),
                "body": note.body,
                "pinned": note.pinned,
                "created_at": note.created_at,
                "updated_at": note.updated_at,
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn edit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::EditNoteRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "notes.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut note = match services.timeline.note(tenant.tenant_id(), id).await {
        Ok(note) => note,
        Err(e) => return errors::store_error_to_response(e),
    };
    if let Err(e) = note.edit(body.body, Utc::now()) {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.timeline.update_note(note).await {
        return errors::store_error_to_response(e);
    }

    StatusCode::NO_CONTENT.into_response()
}

async fn pin(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    set_pinned(services, tenant, principal, id, true).await
}

async fn unpin(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    set_pinned(services, tenant, principal, id, false).await
}

async fn set_pinned(
    services: Arc<AppServices>,
    tenant: TenantContext,
    principal: PrincipalContext,
    id: String,
    pinned: bool,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "notes.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut note = match services.timeline.note(tenant.tenant_id(), id).await {
        Ok(note) => note,
        Err(e) => return errors::store_error_to_response(e),
    };
    note.set_pinned(pinned, Utc::now());
    if let Err(e) = services.timeline.update_note(note).await {
        return errors::store_error_to_response(e);
    }

    StatusCode::NO_CONTENT.into_response()
}

async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "notes.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.timeline.delete_note(tenant.tenant_id(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
