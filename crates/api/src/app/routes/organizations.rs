use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use funil_contacts::{suggest_primary, Organization, OrganizationId, OrganizationPatch};
use funil_core::{EntityKind, RecordId};
use funil_enrichment::{BulkEnrichment, CancelToken, EnrichTarget};
use funil_infra::{export, OrganizationFilter, Pagination};
use funil_timeline::{HistoryEntry, HistoryKind, TagId};

use crate::app::{dto, errors, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/export", get(export_csv))
        .route("/merge-suggestion", get(merge_suggestion))
        .route("/merge-backups", get(list_backups))
        .route("/merge-backups/:id/undo", post(undo_merge))
        .route("/enrich-bulk", post(enrich_bulk))
        .route("/:id", get(get_one).patch(update).delete(delete_one))
        .route("/:id/enrich", post(enrich))
        .route("/:id/merge", post(merge))
        .route("/:id/history", get(history))
}

fn parse_id(raw: &str) -> Result<OrganizationId, axum::response::Response> {
    raw.parse::<RecordId>().map(OrganizationId::new).map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            "invalid organization id",
        )
    })
}

fn filter_from_params(params: &dto::ListParams) -> OrganizationFilter {
    OrganizationFilter {
        search: params.search.clone(),
        owner_ids: dto::ListParams::uuid_list(&params.owner_ids)
            .into_iter()
            .map(Into::into)
            .collect(),
        has_cnpj: params.has_cnpj,
        created_from: params.created_from,
        created_to: params.created_to,
        tag_ids: dto::ListParams::uuid_list(&params.tags)
            .into_iter()
            .map(|id| TagId::new(RecordId::from_uuid(id)))
            .collect(),
    }
}

async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateOrganizationRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.create") {
        return errors::forbidden(e);
    }

    let now = Utc::now();
    let owner = body.owner_id.unwrap_or_else(|| principal.user_id());
    let mut org = match Organization::new(
        OrganizationId::new(RecordId::new()),
        tenant.tenant_id(),
        body.name,
        owner,
        now,
    ) {
        Ok(org) => org,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let patch = OrganizationPatch {
        legal_name: body.legal_name,
        cnpj: body.cnpj,
        email: body.email,
        phone: body.phone,
        website: body.website,
        address: body.address,
        ..Default::default()
    };
    if let Err(e) = org.apply_patch(patch, now) {
        return errors::domain_error_to_response(e);
    }

    // Friendly duplicate check; the store's unique constraint is the backstop.
    if let Some(cnpj) = &org.cnpj {
        match services
            .contacts
            .organization_by_cnpj(tenant.tenant_id(), cnpj)
            .await
        {
            Ok(Some(existing)) => {
                return errors::json_error(
                    StatusCode::CONFLICT,
                    "duplicate",
                    format!("Já existe uma organização com este CNPJ: {}", existing.name),
                )
            }
            Ok(None) => {}
            Err(e) => return errors::store_error_to_response(e),
        }
    }

    if let Err(e) = services.contacts.insert_organization(org.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        EntityKind::Organization,
        org.id.record(),
        HistoryKind::Created,
        "Organização criada",
        serde_json::json!({}),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (StatusCode::CREATED, Json(dto::organization_to_json(&org))).into_response()
}

async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<dto::ListParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.read") {
        return errors::forbidden(e);
    }

    let filter = filter_from_params(&params);
    let page = Pagination::new(params.page.unwrap_or(1), params.per_page.unwrap_or(25));

    match services
        .contacts
        .organizations(tenant.tenant_id(), &filter, page)
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(dto::page_to_json(result, dto::organization_to_json)),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn export_csv(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<dto::ListParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "export.run") {
        return errors::forbidden(e);
    }

    let filter = filter_from_params(&params);
    let mut all = Vec::new();
    let mut page_no = 1;
    loop {
        let page = Pagination::new(page_no, 100);
        let result = match services
            .contacts
            .organizations(tenant.tenant_id(), &filter, page)
            .await
        {
            Ok(result) => result,
            Err(e) => return errors::store_error_to_response(e),
        };
        let fetched = result.items.len();
        all.extend(result.items);
        if all.len() as u64 >= result.total || fetched == 0 {
            break;
        }
        page_no += 1;
    }

    let csv = export::organizations_to_csv(&all);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"organizacoes.csv\"",
            ),
        ],
        csv,
    )
        .into_response()
}

async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.contacts.organization(tenant.tenant_id(), id).await {
        Ok(org) => (StatusCode::OK, Json(dto::organization_to_json(&org))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(patch): Json<OrganizationPatch>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.update") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let mut org = match services.contacts.organization(tenant.tenant_id(), id).await {
        Ok(org) => org,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    if let Err(e) = org.apply_patch(patch, now) {
        return errors::domain_error_to_response(e);
    }
    if let Err(e) = services.contacts.update_organization(org.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        EntityKind::Organization,
        org.id.record(),
        HistoryKind::Updated,
        "Organização atualizada",
        serde_json::json!({}),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (StatusCode::OK, Json(dto::organization_to_json(&org))).into_response()
}

async fn delete_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.delete") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .contacts
        .delete_organization(tenant.tenant_id(), id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.read") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .timeline
        .history_for(tenant.tenant_id(), EntityKind::Organization, id.record())
        .await
    {
        Ok(entries) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": entries.iter().map(dto::history_view_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn enrich(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "enrichment.run") {
        return errors::forbidden(e);
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(registry) = &services.registry else {
        return errors::integration_not_configured();
    };

    let mut org = match services.contacts.organization(tenant.tenant_id(), id).await {
        Ok(org) => org,
        Err(e) => return errors::store_error_to_response(e),
    };
    let Some(cnpj) = org.cnpj.clone() else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_cnpj",
            "Organização sem CNPJ cadastrado.",
        );
    };

    let record = match registry.lookup(&cnpj).await {
        Ok(record) => record,
        Err(e) => return errors::upstream_error_to_response(e),
    };

    let now = Utc::now();
    org.apply_enrichment(record.into_enrichment(), now);
    if let Err(e) = services.contacts.update_organization(org.clone()).await {
        return errors::store_error_to_response(e);
    }

    let entry = HistoryEntry::new(
        tenant.tenant_id(),
        EntityKind::Organization,
        org.id.record(),
        HistoryKind::Enriched,
        "Dados enriquecidos pela Receita",
        serde_json::json!({ "cnpj": cnpj }),
        principal.user_id(),
        now,
    );
    if let Err(e) = services.timeline.append_history(entry).await {
        tracing::warn!(error = %e, "history append failed");
    }

    (StatusCode::OK, Json(dto::organization_to_json(&org))).into_response()
}

/// At most this many organizations per bulk-enrichment request.
const BULK_ENRICH_LIMIT: usize = 50;

async fn enrich_bulk(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::BulkEnrichRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "enrichment.run") {
        return errors::forbidden(e);
    }
    if body.organization_ids.len() > BULK_ENRICH_LIMIT {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "too_many_targets",
            format!("Envie no máximo {BULK_ENRICH_LIMIT} organizações por vez."),
        );
    }
    if services.registry.is_none() {
        return errors::integration_not_configured();
    }

    // Targets resolve up front; missing CNPJs surface as per-item errors so
    // the caller sees them in the same progress report.
    let mut targets = Vec::new();
    for raw in &body.organization_ids {
        let id = OrganizationId::new(RecordId::from_uuid(*raw));
        match services.contacts.organization(tenant.tenant_id(), id).await {
            Ok(org) => targets.push(EnrichTarget {
                id: org.id,
                name: org.name.clone(),
                cnpj: org.cnpj.clone().unwrap_or_default(),
            }),
            Err(e) => return errors::store_error_to_response(e),
        }
    }

    let tenant_id = tenant.tenant_id();
    let actor = principal.user_id();
    let token = CancelToken::new();
    let runner = BulkEnrichment::default();

    let progress = runner
        .run(
            targets,
            |target| {
                let services = services.clone();
                let target = target.clone();
                async move {
                    if target.cnpj.is_empty() {
                        return Err("organização sem CNPJ cadastrado".to_string());
                    }
                    let registry = services
                        .registry
                        .as_ref()
                        .ok_or_else(|| "integração não configurada".to_string())?;

                    let record = registry
                        .lookup(&target.cnpj)
                        .await
                        .map_err(|e| e.to_string())?;

                    let now = Utc::now();
                    let mut org = services
                        .contacts
                        .organization(tenant_id, target.id)
                        .await
                        .map_err(|e| e.to_string())?;
                    org.apply_enrichment(record.into_enrichment(), now);
                    services
                        .contacts
                        .update_organization(org)
                        .await
                        .map_err(|e| e.to_string())?;

                    let entry = HistoryEntry::new(
                        tenant_id,
                        EntityKind::Organization,
                        target.id.record(),
                        HistoryKind::Enriched,
                        "Dados enriquecidos pela Receita",
                        serde_json::json!({ "cnpj": target.cnpj }),
                        actor,
                        now,
                    );
                    services
                        .timeline
                        .append_history(entry)
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(())
                }
            },
            &token,
            |_| {},
        )
        .await;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "current": progress.current,
            "total": progress.total,
            "success_count": progress.success_count,
            "error_count": progress.error_count,
            "errors": progress.errors.iter().map(|e| serde_json::json!({
                "organization_id": e.id.to_string(),
                "name": e.name,
                "message": e.message,
            })).collect::<Vec<_>>(),
            "cancelled": progress.cancelled,
        })),
    )
        .into_response()
}

async fn merge(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::MergeOrganizationsRequest>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.merge") {
        return errors::forbidden(e);
    }
    let keep = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let delete = OrganizationId::new(RecordId::from_uuid(body.delete_id));

    match services
        .contacts
        .merge_organizations(
            tenant.tenant_id(),
            keep,
            delete,
            &body.choices,
            principal.user_id(),
            Utc::now(),
        )
        .await
    {
        Ok((kept, outcome)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "organization": dto::organization_to_json(&kept),
                "backup_id": outcome.backup_id.to_string(),
                "transferred_children": outcome.transferred.total(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

#[derive(Debug, serde::Deserialize)]
struct SuggestionParams {
    a: Uuid,
    b: Uuid,
}

async fn merge_suggestion(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<SuggestionParams>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.merge") {
        return errors::forbidden(e);
    }

    let a = match services
        .contacts
        .organization(
            tenant.tenant_id(),
            OrganizationId::new(RecordId::from_uuid(params.a)),
        )
        .await
    {
        Ok(org) => org,
        Err(e) => return errors::store_error_to_response(e),
    };
    let b = match services
        .contacts
        .organization(
            tenant.tenant_id(),
            OrganizationId::new(RecordId::from_uuid(params.b)),
        )
        .await
    {
        Ok(org) => org,
        Err(e) => return errors::store_error_to_response(e),
    };

    let (keep, delete) = suggest_primary(&a, &b);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "keep_id": keep.id.to_string(),
            "delete_id": delete.id.to_string(),
        })),
    )
        .into_response()
}

async fn list_backups(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.merge") {
        return errors::forbidden(e);
    }

    match services.contacts.merge_backups(tenant.tenant_id()).await {
        Ok(backups) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": backups.iter().map(dto::backup_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn undo_merge(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&tenant, &principal, "organizations.merge") {
        return errors::forbidden(e);
    }
    let backup_id = match id.parse::<RecordId>() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid backup id")
        }
    };

    match services
        .contacts
        .undo_merge(
            tenant.tenant_id(),
            backup_id,
            principal.user_id(),
            Utc::now(),
        )
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
