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
use funil_timeline::{FileAttachment, FileId, HistoryEntry, HistoryKind};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register).get(list))
        .route("/:id", get(get_one).delete(delete_one))
}

fn parse_id(raw: &str) -> Result<FileId, axum::response::Response> {
    raw.parse::<RecordId>()
        .map(FileId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid file id"))
}

/// Register uploaded-file metadata; the bytes live in external object
/// storage under the returned `storage_path`.
async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RegisterFileRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "files.manage") {
        return errors::forbidden(e);
    }

    let now = Utc::now();
    let file = match FileAttachment::new(
        FileId::new(RecordId::new()),
        tenant.tenant_id(),
        body.parent_kind,
        RecordId::from_uuid(body.parent_id),
        body.file_name,
        body.content_type,
        body.size_bytes,
        principal.user_id(),
        now,
    ) {
        Ok(file) => file,
        Err(e) => return errors::domain_error_to_response(e),
    };

    if let Err(e) = services.timeline.insert_file(file.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        file.parent_kind,
        file.parent_id,
        HistoryKind::FileAttached,
        format!("Arquivo anexado: {}", file.file_name),
        serde_json::json!({ "file_id": file.id }),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (StatusCode::CREATED, Json(dto::file_to_json(&file))).into_response()
}

#[derive(Debug, Deserialize)]
struct FileListParams {
    parent_kind: EntityKind,
    parent_id: Uuid,
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<FileListParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "files.manage") {
        return errors::forbidden(e);
    }

    match services
        .timeline
        .files_for(
            tenant.tenant_id(),
            params.parent_kind,
            RecordId::from_uuid(params.parent_id),
        )
        .await
    {
        Ok(files) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": files.iter().map(dto::file_to_json).collect::<Vec<_>>(),
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
    if let Err(e) = authz::require(&tenant, &principal, "files.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.timeline.file(tenant.tenant_id(), id).await {
        Ok(file) => (StatusCode::OK, Json(dto::file_to_json(&file))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "files.manage") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.timeline.delete_file(tenant.tenant_id(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
